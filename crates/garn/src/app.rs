//! Top-level run of a garn invocation
//!
//! [`Garn`] owns the engine for one process. [`Garn::run`] dispatches to a
//! plugin or runs the requested task with build-progress listeners around it;
//! [`Garn::run_to_completion`] additionally races the run against Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use garn_core::config::{self, CliArgs};
use garn_core::error::{ConfigError, GarnError, PromptError};
use garn_core::monorepo::{Workspaces, BUILDSYSTEM_DIR};
use garn_core::prompt::{Choice, Prompter};
use garn_core::similarity;
use garn_tasks::metadata::{self, MetaDataError};
use garn_tasks::reporter::format_duration;
use garn_tasks::{
    BuildEvent, Engine, EngineOptions, Registry, TaskError, TaskReporter, TracingReporter, DEFAULT_TASK,
};

use crate::output;

const QUIT_CHOICE: &str = "";

/// Errors ending a top-level run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    MetaData(#[from] MetaDataError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Garn(#[from] GarnError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested task doesn't exist and no replacement was picked
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// A plugin's run failed
    #[error("Plugin '{name}' failed: {error:#}")]
    Plugin { name: String, error: anyhow::Error },
}

/// How a run ended
#[derive(Debug)]
pub enum Outcome {
    Finished(Result<(), RunError>),
    /// Ctrl+C; `cleaned` tasks had their `onDone` hooks run
    Interrupted { cleaned: usize },
}

/// One garn invocation
#[derive(Debug, Clone)]
pub struct Garn {
    engine: Engine,
}

impl Garn {
    /// Resolve flags and workspaces for `raw_args` (without the program name)
    pub fn new<I, S>(registry: Registry, raw_args: I) -> Result<Self, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_reporter(registry, raw_args, Arc::new(TracingReporter))
    }

    /// Like [`Garn::new`] with a custom task reporter
    pub fn with_reporter<I, S>(
        registry: Registry,
        raw_args: I,
        reporter: Arc<dyn TaskReporter>,
    ) -> Result<Self, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw_args: Vec<String> = raw_args.into_iter().map(Into::into).collect();

        let buildsystem_path = match CliArgs::parse(raw_args.iter().cloned(), &[]).buildsystem_path() {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?.join(BUILDSYSTEM_DIR),
        };
        let workspaces = Workspaces::new(buildsystem_path);
        let workspace = workspaces.current().map(|pkg| pkg.name.clone());
        debug!(workspace = ?workspace, "resolved current workspace package");

        let flags = config::load_flags(
            raw_args,
            registry.flags().to_vec(),
            config::environment(),
            workspace,
        )?;
        let options = EngineOptions::new(flags, workspaces).with_reporter(reporter);
        Ok(Self {
            engine: Engine::new(registry, options),
        })
    }

    /// The engine running this invocation
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run the requested task or plugin
    pub async fn run(&self) -> Result<(), RunError> {
        let engine = &self.engine;
        let flags = engine.flags();
        let args = flags.args();

        if flags.asap().await && !args.is_child() {
            output::asap_banner();
        }

        let requested = args.task_name().to_string();
        if let Some(plugin) = engine.registry().get_plugin(&requested) {
            debug!(plugin = %requested, "dispatching to plugin");
            return plugin.run(engine).await.map_err(|error| RunError::Plugin {
                name: requested,
                error,
            });
        }

        metadata::write_meta_data(engine, args.refresh_meta()).await?;

        let task_name = self.resolve_task_name(&requested).await?;
        let plan = engine.plan(&[task_name.as_str()], None)?;
        engine.pin_production_mode(&plan)?;
        let requested_ids = vec![engine.descriptor(&task_name, None)?.id.clone()];

        let start = Instant::now();
        engine
            .notify_build(BuildEvent::Init(requested_ids.clone()), plan.tasks())
            .await;

        match engine.run_tasks(&[&task_name], None, Value::Null).await {
            Ok(_) => {
                if task_name != DEFAULT_TASK {
                    engine
                        .notify_build(BuildEvent::Success(requested_ids.clone()), &requested_ids)
                        .await;
                    engine
                        .notify_build(BuildEvent::Done(requested_ids.clone()), &requested_ids)
                        .await;
                    output::info(&format!(
                        "Build time (task '{}'): {}",
                        task_name,
                        format_duration(start.elapsed())
                    ));
                }
                Ok(())
            }
            Err(error) => {
                let failed = engine
                    .failed_task()
                    .unwrap_or_else(|| requested_ids[0].clone());
                engine
                    .notify_build(
                        BuildEvent::Error {
                            task: failed.clone(),
                            error: error.clone(),
                        },
                        std::slice::from_ref(&failed),
                    )
                    .await;
                engine
                    .notify_build(BuildEvent::Done(requested_ids), plan.tasks())
                    .await;
                output::error(&format!("{} failed", failed));
                Err(error.into())
            }
        }
    }

    /// Run until the build finishes or Ctrl+C arrives. On interrupt the
    /// `onDone` hooks of every started task run once.
    pub async fn run_to_completion(&self) -> Outcome {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = self.run() => Outcome::Finished(result),
            () = interrupted => {
                info!("Interrupted, running onDone hooks");
                let cleaned = self.engine.run_shutdown_hooks().await;
                Outcome::Interrupted { cleaned }
            }
        }
    }

    /// Map an unknown task name to a runnable one, offering close matches
    /// when prompting is allowed
    async fn resolve_task_name(&self, requested: &str) -> Result<String, RunError> {
        let registry = self.engine.registry();
        // Internal tasks only run as dependencies
        if registry
            .get_by_key(requested)
            .is_some_and(|d| !d.is_internal())
        {
            return Ok(requested.to_string());
        }

        output::error(&format!("Unknown task '{}'", requested));
        let runnable = registry.runnable_task_names();
        let matches = similarity::suggestions(requested, runnable.iter().map(String::as_str));
        let prompter = Prompter::new(self.engine.flags().no_prompt().await);
        if matches.is_empty() || !prompter.is_interactive() {
            return Err(RunError::UnknownTask(requested.to_string()));
        }

        let mut choices: Vec<Choice> = matches.iter().map(|m| Choice::from(m.as_str())).collect();
        choices.push(Choice::new("Quit", QUIT_CHOICE));
        match prompter.select_option("Did you mean...", &choices, None)? {
            picked if picked == QUIT_CHOICE => Err(RunError::UnknownTask(requested.to_string())),
            picked => Ok(picked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use garn_core::config::Mode;
    use garn_tasks::metadata::META_FILE;
    use garn_tasks::{Plugin, TaskContext, TaskId};
    use tempfile::TempDir;

    type Log = Arc<Mutex<Vec<String>>>;

    fn garn(registry: Registry, dir: &TempDir, args: &[&str]) -> Garn {
        let mut raw: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        raw.push("--buildsystem-path".to_string());
        raw.push(dir.path().join("buildsystem").display().to_string());
        raw.push("--no-prompt".to_string());
        Garn::new(registry, raw).unwrap()
    }

    fn names(ids: &[TaskId]) -> String {
        ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
    }

    fn describe(event: &BuildEvent) -> String {
        match event {
            BuildEvent::Init(ids) => format!("init {}", names(ids)),
            BuildEvent::Success(ids) => format!("success {}", names(ids)),
            BuildEvent::Error { task, .. } => format!("error {}", task),
            BuildEvent::Done(ids) => format!("done {}", names(ids)),
        }
    }

    fn listen_all(registry: &mut Registry, log: &Log) {
        let push = |log: Log| {
            move |event: BuildEvent| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(describe(&event));
                    Ok(())
                }
            }
        };
        registry.on_build_init(push(log.clone()));
        registry.on_build_success(push(log.clone()));
        registry.on_build_error(push(log.clone()));
        registry.on_build_done(push(log.clone()));
    }

    fn recording_task(registry: &mut Registry, log: &Log, name: &str, deps: &[&str], fail: bool) {
        let log = log.clone();
        let label = name.to_string();
        registry
            .task_with_deps(name, deps, move |_, _| {
                let log = log.clone();
                let label = label.clone();
                async move {
                    log.lock().unwrap().push(format!("run {}", label));
                    if fail {
                        Err(anyhow!("{} broke", label))
                    } else {
                        Ok(Value::Null)
                    }
                }
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_notifies_listeners_around_the_task() {
        let dir = TempDir::new().unwrap();
        let log = Log::default();
        let mut registry = Registry::new();
        listen_all(&mut registry, &log);
        recording_task(&mut registry, &log, "compile", &[], false);
        recording_task(&mut registry, &log, "pack", &["compile"], false);

        garn(registry, &dir, &["pack"]).run().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["init pack", "run compile", "run pack", "success pack", "done pack"]
        );
    }

    #[tokio::test]
    async fn test_failed_run_reports_the_failing_task() {
        let dir = TempDir::new().unwrap();
        let log = Log::default();
        let mut registry = Registry::new();
        listen_all(&mut registry, &log);
        recording_task(&mut registry, &log, "compile", &[], true);
        recording_task(&mut registry, &log, "pack", &["compile"], false);

        let err = garn(registry, &dir, &["pack"]).run().await.unwrap_err();

        assert!(matches!(err, RunError::Task(TaskError::Failed { ref task, .. }) if task == "compile"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["init pack", "run compile", "error pack", "done pack"]
        );
    }

    #[tokio::test]
    async fn test_default_task_skips_success_listeners() {
        let dir = TempDir::new().unwrap();
        let log = Log::default();
        let mut registry = Registry::new();
        listen_all(&mut registry, &log);

        garn(registry, &dir, &[]).run().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["init default"]);
    }

    #[tokio::test]
    async fn test_production_dependency_pins_mode() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let mut registry = Registry::new();
        let recorded = seen.clone();
        registry
            .task("pack", move |ctx: TaskContext, _| {
                let recorded = recorded.clone();
                async move {
                    *recorded.lock().unwrap() = Some(ctx.mode().await?);
                    Ok(Value::Null)
                }
            })
            .unwrap();
        registry
            .production_task("publish", &["pack"], |_, input| async move { Ok(input) })
            .unwrap();
        registry.alias("release", &["publish"]).unwrap();

        garn(registry, &dir, &["release"]).run().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(Mode::Production));
    }

    #[tokio::test]
    async fn test_unknown_task_without_prompt() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.task("build", |_, _| async { Ok(Value::Null) }).unwrap();

        let err = garn(registry, &dir, &["biuld"]).run().await.unwrap_err();

        assert!(matches!(err, RunError::UnknownTask(ref name) if name == "biuld"));
    }

    #[tokio::test]
    async fn test_internal_task_is_not_a_target() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let counter = calls.clone();
        registry
            .internal_task("secret", &[], move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .unwrap();

        let err = garn(registry, &dir, &["secret"]).run().await.unwrap_err();

        assert!(matches!(err, RunError::UnknownTask(ref name) if name == "secret"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_writes_metadata() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.task("build", |_, _| async { Ok(Value::Null) }).unwrap();

        garn(registry, &dir, &["build"]).run().await.unwrap();

        let meta = dir.path().join("buildsystem/.buildcache").join(META_FILE);
        let content = std::fs::read_to_string(meta).unwrap();
        assert!(content.contains("\"build\""));
    }

    struct CountingPlugin(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "count"
        }

        async fn run(&self, _engine: &Engine) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_plugin_takes_over_the_run() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.plugin(Arc::new(CountingPlugin(calls.clone())));

        garn(registry, &dir, &["count"]).run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("buildsystem/.buildcache").join(META_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_to_completion_finishes() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.task("build", |_, _| async { Ok(Value::Null) }).unwrap();

        let outcome = garn(registry, &dir, &["build"]).run_to_completion().await;

        assert!(matches!(outcome, Outcome::Finished(Ok(()))));
    }
}
