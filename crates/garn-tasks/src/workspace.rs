//! Monorepo support: the `workspace` plugin and workspace-wide task fan-out

use std::collections::BTreeMap;

use console::style;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};

use garn_core::config::{BUILDSYSTEM_PATH_ARG, CHILD_GARN_ARG, DEFAULT_TASK, REFRESH_META_ARG};
use garn_core::error::{ConfigError, GarnError, ProcessError, WorkspaceError};
use garn_core::exec::{self, ExecOptions};
use garn_core::monorepo::WorkspacePackage;
use garn_core::version::{version_tags_at_head, VersionTag};

use crate::engine::Engine;
use crate::metadata::{load_for_package, MetaDataError};
use crate::parallel::{FanOutError, FanOutSummary, ParallelProgram, ParallelRunner, Parallelism};
use crate::plugin::Plugin;

/// Pseudo-task name of the workspace plugin
pub const WORKSPACE_PLUGIN: &str = "workspace";

/// Errors of workspace-wide task runs
#[derive(Debug, Error)]
pub enum WorkspaceTaskError {
    #[error("No workspace packages found")]
    NoPackages,

    #[error("No package with the name '{name}' could be found in this workspace. Existing packages are: {existing}")]
    UnknownPackage { name: String, existing: String },

    #[error("The --version flag '{0}' is not in a valid format, it should either be in the format 'v1.2.3' or 'my-package@1.2.3'")]
    InvalidVersion(String),

    #[error("No workspace packages found that has a version tag on the current commit")]
    NoTaggedPackages,

    #[error("No workspace packages has a task called '{0}'")]
    NoPackageHasTask(String),

    #[error("The currently tagged workspace package(s) ({packages}) does not have a task called '{task}'")]
    TaggedPackagesLackTask { packages: String, task: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    MetaData(#[from] MetaDataError),

    #[error(transparent)]
    FanOut(#[from] FanOutError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Garn(#[from] GarnError),
}

fn package_names(packages: &[WorkspacePackage]) -> String {
    packages
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn listed_packages(engine: &Engine) -> Result<Option<Vec<WorkspacePackage>>, WorkspaceError> {
    Ok(engine
        .workspaces()
        .list()?
        .filter(|packages| !packages.is_empty()))
}

/// Run `task` in every workspace package that declares it, or only in
/// `package`.
///
/// `--version <package>@x.y.z` limits the run to that package and
/// `--tagged-workspaces` to packages with a version tag at `HEAD`. Packages
/// run one at a time unless `--parallel` is set.
#[instrument(skip(engine))]
pub async fn run_workspace_task(
    engine: &Engine,
    task: &str,
    package: Option<&str>,
) -> Result<FanOutSummary, WorkspaceTaskError> {
    let packages = listed_packages(engine)?.ok_or(WorkspaceTaskError::NoPackages)?;
    let flags = engine.flags();

    let mut selected: Vec<&WorkspacePackage> = packages
        .iter()
        .filter(|p| package.map_or(true, |name| p.name == name))
        .collect();

    if let Some(raw) = flags.version().await? {
        let version =
            VersionTag::parse(&raw).map_err(|_| WorkspaceTaskError::InvalidVersion(raw.clone()))?;
        if let Some(name) = &version.package_name {
            let named = packages.iter().find(|p| &p.name == name).ok_or_else(|| {
                WorkspaceTaskError::UnknownPackage {
                    name: name.clone(),
                    existing: package_names(&packages),
                }
            })?;
            selected = vec![named];
        }
    }

    let tagged_only = flags.tagged_workspaces().await;
    let tags = if tagged_only {
        version_tags_at_head(Some(engine.workspaces().project_path())).await?
    } else {
        Vec::new()
    };
    if tagged_only && tags.is_empty() {
        return Err(WorkspaceTaskError::NoTaggedPackages);
    }
    let is_tagged = |pkg: &WorkspacePackage| {
        tags.iter()
            .any(|t| t.package_name.as_deref() == Some(pkg.name.as_str()))
    };

    let refresh = flags.args().refresh_meta();
    let child_args = flags.child_args().await?;
    let mut names = Vec::new();
    let mut programs = Vec::new();

    for pkg in selected {
        let meta = load_for_package(pkg, refresh).await?;
        if !meta.has_task(task) || (tagged_only && !is_tagged(pkg)) {
            continue;
        }

        let mut args = vec![task.to_string()];
        args.extend(child_args.iter().cloned());
        names.push(pkg.name.clone());
        programs.push(
            ParallelProgram::new(pkg.garn_path.to_string_lossy(), args)
                .with_cwd(&pkg.workspace_path)
                .with_prefix(format!("[{}] ", pkg.name)),
        );
    }

    if names.is_empty() {
        return Err(if tagged_only {
            WorkspaceTaskError::TaggedPackagesLackTask {
                packages: tags
                    .iter()
                    .filter_map(|t| t.package_name.as_deref())
                    .collect::<Vec<_>>()
                    .join(", "),
                task: task.to_string(),
            }
        } else {
            WorkspaceTaskError::NoPackageHasTask(task.to_string())
        });
    }

    info!("Running task '{}' in packages {}", task, names.join(", "));
    let parallelism = if flags.parallel().await {
        Parallelism::Unbounded
    } else {
        Parallelism::sequential()
    };
    Ok(ParallelRunner::new(engine.reporter().clone())
        .run(programs, parallelism)
        .await?)
}

/// The built-in `workspace` pseudo-task.
///
/// - `garn workspace` lists the packages
/// - `garn workspace <package> [task] [args...]` runs a task in one package
/// - `garn workspace <task>` runs a task in every package that has it
#[derive(Debug, Default)]
pub struct WorkspacePlugin;

#[async_trait::async_trait]
impl Plugin for WorkspacePlugin {
    fn name(&self) -> &str {
        WORKSPACE_PLUGIN
    }

    async fn run(&self, engine: &Engine) -> anyhow::Result<()> {
        let Some(packages) = listed_packages(engine)? else {
            info!("No workspace packages found");
            return Ok(());
        };
        let positionals = engine.flags().args().positionals();
        let named = positionals
            .get(1)
            .and_then(|name| packages.iter().find(|p| &p.name == name));

        match (positionals, named) {
            ([] | [_], _) => {
                print_packages(&packages);
                Ok(())
            }
            ([_, _, rest @ ..], Some(pkg)) => run_in_package(engine, pkg, rest).await,
            ([_, task], None) => {
                run_workspace_task(engine, task, None).await?;
                Ok(())
            }
            ([_, name, ..], None) => Err(WorkspaceTaskError::UnknownPackage {
                name: name.clone(),
                existing: package_names(&packages),
            }
            .into()),
        }
    }

    async fn metadata(&self, engine: &Engine) -> anyhow::Result<Option<Value>> {
        let Some(packages) = listed_packages(engine)? else {
            return Ok(None);
        };
        let refresh = engine.flags().args().refresh_meta();

        let mut meta = serde_json::Map::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for pkg in &packages {
            let package_meta = load_for_package(pkg, refresh).await?;
            for task in package_meta.tasks.keys() {
                *counts.entry(task.clone()).or_default() += 1;
            }
            meta.insert(pkg.name.clone(), serde_json::to_value(&package_meta.tasks)?);
        }
        for (task, count) in counts {
            if count > 1 {
                meta.entry(task).or_insert_with(|| Value::Object(Default::default()));
            }
        }

        Ok(Some(Value::Object(meta)))
    }
}

fn print_packages(packages: &[WorkspacePackage]) {
    println!();
    println!("The following packages are included in this workspace:");
    println!("{}", style("------------------------------------------------------").dim());
    for pkg in packages {
        println!(" {}", style(&pkg.name).cyan());
    }
    println!();
    println!("You can run a task in all packages by calling:");
    println!("{}", style("$ garn workspace the-name-of-my-task").bold());
    println!();
    println!("You can run a task in a single package by calling:");
    println!(
        "{}",
        style("$ garn workspace the-name-of-my-package the-name-of-my-task").bold()
    );
}

/// Arguments for a package's garn: the task, extra positionals, this
/// process's flags and unknown options, then `--` passthrough
async fn package_args(engine: &Engine, rest: &[String]) -> Result<Vec<String>, ConfigError> {
    let flags = engine.flags();
    let cli = flags.args();

    let mut args = vec![rest
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_TASK.to_string())];
    args.extend(rest.iter().skip(1).cloned());
    args.extend(flags.child_args().await?);

    let reserved = [BUILDSYSTEM_PATH_ARG, CHILD_GARN_ARG, REFRESH_META_ARG];
    for (name, value) in cli.options() {
        if reserved.contains(&name) || flags.flags().any(|f| f.name == name) {
            continue;
        }
        args.push(format!("--{}", name));
        if let Some(value) = value {
            args.push(value.to_string());
        }
    }

    if !cli.passthrough().is_empty() {
        args.push("--".to_string());
        args.extend(cli.passthrough().iter().cloned());
    }
    Ok(args)
}

async fn run_in_package(
    engine: &Engine,
    pkg: &WorkspacePackage,
    rest: &[String],
) -> anyhow::Result<()> {
    let args = package_args(engine, rest).await?;
    exec::spawn(
        &pkg.garn_path.to_string_lossy(),
        &args,
        &ExecOptions::default().with_cwd(&pkg.workspace_path),
    )
    .await?;
    Ok(())
}
