//! The built-in `default` task

use std::fmt::Write;

use console::style;
use serde_json::Value;
use tracing::warn;

use crate::engine::Engine;
use crate::registry::DEFAULT_TASK;
use crate::task::{runner, Runner};
use crate::workspace::WORKSPACE_PLUGIN;

/// Runner of the `default` task: prints what this garn can do
pub fn default_task_runner() -> Runner {
    runner(|ctx, _| async move {
        print!("{}", overview(ctx.engine()));
        Ok(Value::Null)
    })
}

/// Help text listing internal tasks, workspace packages and runnable tasks
pub fn overview(engine: &Engine) -> String {
    let registry = engine.registry();
    let mut out = String::new();

    let internal: Vec<String> = registry
        .tasks()
        .filter(|d| d.is_internal())
        .map(|d| d.full_name())
        .collect();
    if !internal.is_empty() {
        let _ = writeln!(out, "{}", style("Internal tasks:").dim());
        for name in internal {
            let _ = writeln!(out, "  {}", style(name).dim());
        }
        let _ = writeln!(out);
    }

    match engine.workspaces().list() {
        Ok(Some(packages)) if !packages.is_empty() => {
            let _ = writeln!(out, "{}", style("Available workspaces:").bold());
            for pkg in packages {
                let _ = writeln!(out, "  {}", style(&pkg.name).cyan());
            }
            let _ = writeln!(
                out,
                "Run a task in them with: garn {} <task>",
                WORKSPACE_PLUGIN
            );
            let _ = writeln!(out);
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to list workspace packages: {}", e),
    }

    let mut runnable: Vec<String> = registry
        .runnable_task_names()
        .into_iter()
        .filter(|name| name != DEFAULT_TASK)
        .collect();
    runnable.sort();

    let _ = writeln!(out, "{}", style("Available tasks:").bold());
    if runnable.is_empty() {
        let _ = writeln!(out, "  {}", style("(none)").dim());
    }
    for name in runnable {
        let _ = writeln!(out, "  {}", style(name).green());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{test_engine, TaskContext};
    use crate::registry::Registry;
    use std::fs;
    use tempfile::TempDir;

    async fn noop(_: TaskContext, _: Value) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_overview_lists_tasks() {
        console::set_colors_enabled(false);
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.task("test", noop).unwrap();
        registry.task("build", noop).unwrap();
        registry.internal_task("compile", &[], noop).unwrap();
        registry
            .task_group("docker", |r| {
                r.task("push", noop)?;
                Ok(())
            })
            .unwrap();
        let engine = test_engine(registry, dir.path().join("buildsystem"), &[]);

        let text = overview(&engine);
        assert!(text.contains("Internal tasks:\n  compile\n"));
        assert!(text.ends_with("Available tasks:\n  build\n  docker:push\n  test\n"));
        assert!(!text.contains("Available workspaces"));
    }

    #[test]
    fn test_overview_lists_workspaces() {
        console::set_colors_enabled(false);
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"workspaces": ["packages/*"]}"#).unwrap();
        fs::create_dir_all(dir.path().join("packages/web")).unwrap();
        fs::write(dir.path().join("packages/web/garn"), "").unwrap();
        let engine = test_engine(Registry::new(), dir.path().join("buildsystem"), &[]);

        let text = overview(&engine);
        assert!(text.starts_with("Available workspaces:\n  web\n"));
        assert!(text.contains("  (none)"));
    }

    #[tokio::test]
    async fn test_default_task_runs() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(Registry::new(), dir.path().join("buildsystem"), &[]);
        assert_eq!(
            engine.run_task(DEFAULT_TASK, None, Value::Null).await.unwrap(),
            Value::Null
        );
    }
}
