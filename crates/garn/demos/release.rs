//! Example build script: compile, test, pack and publish a project
//!
//! Run with `cargo run --example release -- <task> [--flags]`, e.g.
//! `cargo run --example release -- publish --version v1.2.0 --skip-tests`.

use std::process::ExitCode;

use anyhow::Context;
use serde_json::json;

use garn::{
    exec, BuildEvent, ConfigError, ExecOptions, Flag, HookPayload, HookStage, ParallelProgram,
    ParallelRunner, Parallelism, Registry, TaskContext, Value, VersionTag,
};

const SKIP_TESTS: &str = "skip-tests";

fn main() -> ExitCode {
    let mut registry = Registry::new();
    if let Err(e) = declare(&mut registry) {
        eprintln!("Invalid build script: {}", e);
        return ExitCode::FAILURE;
    }
    garn::main(registry)
}

fn declare(registry: &mut Registry) -> Result<(), ConfigError> {
    registry.flag(Flag::boolean(SKIP_TESTS));

    registry
        .task("compile", |ctx: TaskContext, _| async move {
            let mode = ctx.mode().await?;
            exec::spawn("echo", &["compiling in", mode.as_str(), "mode"], &ExecOptions::default())
                .await?;
            Ok(json!({ "mode": mode.as_str() }))
        })?
        .on_init(|_, payload| async move {
            if let HookPayload::Init(tasks) = payload {
                println!("About to run: {}", tasks.join(", "));
            }
            Ok(())
        });

    registry
        .task_with_deps("test", &["compile"], |ctx, compiled| async move {
            if ctx.flags().get(SKIP_TESTS).await?.is_some_and(|v| v.as_bool()) {
                println!("Skipping tests");
                return Ok(compiled);
            }
            let suites = ["unit", "integration", "e2e"]
                .into_iter()
                .map(|suite| {
                    ParallelProgram::new("echo", ["running", suite]).with_prefix(format!("[{}] ", suite))
                })
                .collect();
            ParallelRunner::new(ctx.engine().reporter().clone())
                .run(suites, Parallelism::max(2))
                .await?;
            Ok(compiled)
        })?
        .with_sub_args(["--skip-tests"]);

    registry
        .internal_task("clean", &[], |ctx, _| async move {
            let cache = ctx.workspaces().build_cache_path();
            println!("Cleaning {}", cache.display());
            Ok(Value::Null)
        })?;

    registry
        .production_task("pack", &["clean", "test"], |_, compiled| async move {
            Ok(json!({ "artifact": "dist/app.tar.gz", "build": compiled }))
        })?
        .on_done(|_, payload| async move {
            if let HookPayload::Interrupted = payload {
                println!("Pack interrupted, removing partial artifact");
            }
            Ok(())
        });

    registry.task_group("docker", |registry| {
        registry
            .task_with_deps("build", &["pack"], |_, packed| async move {
                exec::spawn("echo", &["docker build ."], &ExecOptions::default()).await?;
                Ok(packed)
            })?
            .run_on(HookStage::Error, &["report"]);
        registry.internal_task("report", &[], |_, error| async move {
            eprintln!("docker build failed: {}", error);
            Ok(Value::Null)
        })?;
        registry.on_build_done(|event| async move {
            if let BuildEvent::Done(tasks) = event {
                println!("docker tasks done: {}", tasks.len());
            }
            Ok(())
        });
        Ok(())
    })?;

    registry
        .production_task("publish", &["docker:build"], |ctx, packed| async move {
            let current = ctx.workspaces().current().map(|pkg| pkg.name.clone());
            let raw = ctx
                .flags()
                .version()
                .await?
                .context("publish needs --version")?;
            let tag = VersionTag::for_package(&raw, current.as_deref())?;
            if let Some(pre) = tag.prerelease() {
                println!("Publishing pre-release {} #{}", pre.tag, pre.number);
            }
            let name = tag.to_string();
            exec::spawn("git", &["tag", name.as_str()], &ExecOptions::default()).await?;
            Ok(json!({ "tag": name, "artifact": packed["artifact"] }))
        })?
        .on_success(|_, payload| async move {
            if let HookPayload::Success(result) = payload {
                println!("Published {}", result["tag"]);
            }
            Ok(())
        });

    registry.alias("release", &["publish"])?;

    registry.on_build_error(|event| async move {
        if let BuildEvent::Error { task, error } = event {
            eprintln!("{} failed: {}", task, error);
        }
        Ok(())
    });

    Ok(())
}
