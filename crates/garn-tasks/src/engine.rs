//! Task execution engine
//!
//! Every task runs at most once per engine. The first request starts the
//! execution and stores it as a shared future; later or concurrent requests
//! await that same future, so a failure is replayed to every caller.
//!
//! Running a task:
//! 1. fire the `onInit` hooks of its whole dependency closure (each task's
//!    hooks at most once)
//! 2. run its dependencies one after another, each one receiving the previous
//!    one's result
//! 3. run its own body with the last dependency's result
//! 4. run `onSuccess` + `onDone` hooks, or `onError` + `onDone` hooks

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use garn_core::config::{FlagSet, Mode};
use garn_core::error::GarnError;
use garn_core::exec::{self, ExecOptions, ExecOutput};
use garn_core::monorepo::{garn_executable, Workspaces};
use garn_core::prompt::Prompter;

use crate::plan::ExecutionPlan;
use crate::registry::{BuildEvent, Registry};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::shutdown::ShutdownRegistry;
use crate::task::{
    Hook, HookPayload, HookStage, TaskDescriptor, TaskError, TaskId, TaskOutcome,
};

type SharedOutcome = Shared<BoxFuture<'static, TaskOutcome>>;

/// Execution state of one task (or of one task's `onInit` hooks)
pub enum ExecutionState {
    NotStarted,
    Running(SharedOutcome),
    Completed(TaskOutcome),
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Running(_) => write!(f, "Running"),
            Self::Completed(outcome) => f.debug_tuple("Completed").field(outcome).finish(),
        }
    }
}

/// Summary of a task's [`ExecutionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// What the engine needs besides the registry
pub struct EngineOptions {
    pub flags: FlagSet,
    pub workspaces: Workspaces,
    pub reporter: Arc<dyn TaskReporter>,
}

impl EngineOptions {
    /// Options reporting through tracing
    pub fn new(flags: FlagSet, workspaces: Workspaces) -> Self {
        Self {
            flags,
            workspaces,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Use a different reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

struct EngineInner {
    registry: Registry,
    flags: FlagSet,
    workspaces: Workspaces,
    reporter: Arc<dyn TaskReporter>,
    shutdown: ShutdownRegistry,
    executions: Mutex<HashMap<String, ExecutionState>>,
    inits: Mutex<HashMap<String, ExecutionState>>,
    running: Mutex<Vec<TaskId>>,
    failed: Mutex<Option<TaskId>>,
}

/// Runs tasks of a frozen [`Registry`]. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("tasks", &self.inner.registry.tasks().count())
            .field("failed", &self.failed_task())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Freeze a registry into an engine
    pub fn new(registry: Registry, options: EngineOptions) -> Self {
        let not_started = || {
            registry
                .tasks()
                .map(|d| (d.full_name(), ExecutionState::NotStarted))
                .collect::<HashMap<_, _>>()
        };
        let executions = Mutex::new(not_started());
        let inits = Mutex::new(not_started());

        Self {
            inner: Arc::new(EngineInner {
                registry,
                flags: options.flags,
                workspaces: options.workspaces,
                reporter: options.reporter,
                shutdown: ShutdownRegistry::new(),
                executions,
                inits,
                running: Mutex::new(Vec::new()),
                failed: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn flags(&self) -> &FlagSet {
        &self.inner.flags
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.inner.workspaces
    }

    pub fn reporter(&self) -> &Arc<dyn TaskReporter> {
        &self.inner.reporter
    }

    pub fn shutdown(&self) -> &ShutdownRegistry {
        &self.inner.shutdown
    }

    /// The last task that failed, if any
    pub fn failed_task(&self) -> Option<TaskId> {
        lock(&self.inner.failed).clone()
    }

    /// Execution status of a task by full name
    pub fn status(&self, full_name: &str) -> Option<ExecutionStatus> {
        lock(&self.inner.executions)
            .get(full_name)
            .map(|state| match state {
                ExecutionState::NotStarted => ExecutionStatus::NotStarted,
                ExecutionState::Running(_) => ExecutionStatus::Running,
                ExecutionState::Completed(Ok(_)) => ExecutionStatus::Succeeded,
                ExecutionState::Completed(Err(_)) => ExecutionStatus::Failed,
            })
    }

    /// Look up a task, logging unknown names
    pub fn descriptor(&self, name: &str, group: Option<&str>) -> Result<&TaskDescriptor, TaskError> {
        self.inner.registry.get(name, group).ok_or_else(|| {
            let err = TaskError::UnknownTask(name.to_string());
            error!("{}", err);
            err
        })
    }

    /// Dependency closure of `names`
    pub fn plan(&self, names: &[&str], group: Option<&str>) -> Result<ExecutionPlan, TaskError> {
        ExecutionPlan::build(&self.inner.registry, names, group)
    }

    /// Pin `mode=production` if the plan contains a production task
    pub fn pin_production_mode(&self, plan: &ExecutionPlan) -> Result<bool, TaskError> {
        if plan.requires_production(&self.inner.registry) {
            debug!("plan contains a production task, forcing production mode");
            self.inner.flags.set_mode(Mode::Production)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn innermost_group(&self) -> Option<String> {
        lock(&self.inner.running)
            .last()
            .and_then(|id| id.group.clone())
    }

    /// Run a task. Without an explicit group the group of the innermost
    /// running task is used.
    pub fn run_task(
        &self,
        name: &str,
        group: Option<&str>,
        input: Value,
    ) -> BoxFuture<'static, TaskOutcome> {
        let group = group.map(String::from).or_else(|| self.innermost_group());
        match self.descriptor(name, group.as_deref()) {
            Ok(descriptor) => self.run_key(descriptor.full_name(), input),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    /// Run tasks one after another, stopping at the first failure. The
    /// `onInit` hooks of all of them fire before the first one starts.
    pub fn run_tasks<S: AsRef<str>>(
        &self,
        names: &[S],
        group: Option<&str>,
        input: Value,
    ) -> BoxFuture<'static, Result<Vec<Value>, TaskError>> {
        let engine = self.clone();
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let group = group.map(String::from).or_else(|| self.innermost_group());

        async move {
            let plan = {
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                engine.plan(&refs, group.as_deref())?
            };
            engine.fire_init_hooks(&plan).await?;

            let mut results = Vec::with_capacity(names.len());
            for name in &names {
                results.push(engine.run_task(name, group.as_deref(), input.clone()).await?);
            }
            Ok(results)
        }
        .boxed()
    }

    /// Run a task by full name, joining an execution already in flight
    fn run_key(&self, key: String, input: Value) -> BoxFuture<'static, TaskOutcome> {
        let shared = {
            let mut executions = lock(&self.inner.executions);
            match executions.get(&key) {
                Some(ExecutionState::Completed(outcome)) => {
                    return future::ready(outcome.clone()).boxed();
                }
                Some(ExecutionState::Running(running)) => running.clone(),
                Some(ExecutionState::NotStarted) | None => {
                    let engine = self.clone();
                    let task_key = key.clone();
                    let execution = async move { engine.execute(task_key, input).await }
                        .boxed()
                        .shared();
                    executions.insert(key, ExecutionState::Running(execution.clone()));
                    execution
                }
            }
        };
        shared.boxed()
    }

    #[instrument(skip(self, input), fields(task = %key))]
    async fn execute(&self, key: String, input: Value) -> TaskOutcome {
        let Some(descriptor) = self.inner.registry.get_by_key(&key) else {
            return Err(TaskError::UnknownTask(key));
        };
        self.inner
            .shutdown
            .register(&descriptor.id, &descriptor.hooks.done);

        let outcome = self.run_body(descriptor, input).await;
        let outcome = self.settle(descriptor, outcome).await;

        lock(&self.inner.executions).insert(key, ExecutionState::Completed(outcome.clone()));
        outcome
    }

    async fn run_body(&self, descriptor: &TaskDescriptor, input: Value) -> TaskOutcome {
        let plan = ExecutionPlan::for_task(&self.inner.registry, descriptor)?;
        self.fire_init_hooks(&plan).await?;

        let mut previous = Value::Null;
        for dependency in &descriptor.dependencies {
            let key = self.descriptor(dependency, descriptor.group())?.full_name();
            previous = self.run_key(key, previous).await?;
        }
        let input = if descriptor.dependencies.is_empty() {
            input
        } else {
            previous
        };

        let id = &descriptor.id;
        self.push_frame(id);
        self.inner
            .reporter
            .report(&TaskEvent::Started { id: id.clone() });
        let start = Instant::now();
        let result = (descriptor.runner)(self.context(id), input).await;
        self.pop_frame(id);

        match result {
            Ok(value) => {
                self.inner.reporter.report(&TaskEvent::Completed {
                    id: id.clone(),
                    duration: start.elapsed(),
                });
                Ok(value)
            }
            Err(e) => {
                error!("Task {} failed with {:#}", id, e);
                let error = TaskError::from_runner(id, e);
                self.inner.reporter.report(&TaskEvent::Failed {
                    id: id.clone(),
                    duration: start.elapsed(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn settle(&self, descriptor: &TaskDescriptor, outcome: TaskOutcome) -> TaskOutcome {
        let id = &descriptor.id;
        match outcome {
            Ok(value) => {
                let payload = HookPayload::Success(value.clone());
                for stage in [HookStage::Success, HookStage::Done] {
                    let hooks = descriptor.hooks.stage(stage);
                    if let Err(error) = self.run_hooks(id, stage, hooks, &payload).await {
                        self.report_hook_failure(id, stage, &error);
                        self.set_failed(id);
                        return Err(error);
                    }
                }
                Ok(value)
            }
            Err(error) => {
                let payload = HookPayload::Error(error.clone());
                for stage in [HookStage::Error, HookStage::Done] {
                    let hooks = descriptor.hooks.stage(stage);
                    if let Err(hook_error) = self.run_hooks(id, stage, hooks, &payload).await {
                        self.report_hook_failure(id, stage, &hook_error);
                    }
                }
                self.set_failed(id);
                Err(error)
            }
        }
    }

    async fn run_hooks(
        &self,
        id: &TaskId,
        stage: HookStage,
        hooks: &[Hook],
        payload: &HookPayload,
    ) -> Result<(), TaskError> {
        for hook in hooks {
            match hook {
                Hook::Callback(callback) => {
                    callback(self.context(id), payload.clone())
                        .await
                        .map_err(|e| TaskError::from_hook(id, stage, e))?;
                }
                Hook::Tasks(names) => {
                    self.run_tasks(names, id.group.as_deref(), payload.as_input())
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Fire `onInit` hooks of every task in the plan, each task's at most
    /// once per engine
    async fn fire_init_hooks(&self, plan: &ExecutionPlan) -> Result<(), TaskError> {
        let names = plan.full_names();

        for descriptor in plan.descriptors(&self.inner.registry) {
            if descriptor.hooks.init.is_empty() {
                continue;
            }
            let key = descriptor.full_name();

            let shared = {
                let mut inits = lock(&self.inner.inits);
                match inits.get(&key) {
                    Some(ExecutionState::Completed(Ok(_))) => continue,
                    Some(ExecutionState::Completed(Err(e))) => return Err(e.clone()),
                    Some(ExecutionState::Running(running)) => running.clone(),
                    Some(ExecutionState::NotStarted) | None => {
                        let engine = self.clone();
                        let id = descriptor.id.clone();
                        let payload = HookPayload::Init(names.clone());
                        let firing = async move { engine.run_init_hooks(id, payload).await }
                            .boxed()
                            .shared();
                        inits.insert(key.clone(), ExecutionState::Running(firing.clone()));
                        firing
                    }
                }
            };

            let outcome = shared.await;
            lock(&self.inner.inits).insert(key, ExecutionState::Completed(outcome.clone()));
            outcome?;
        }
        Ok(())
    }

    async fn run_init_hooks(&self, id: TaskId, payload: HookPayload) -> TaskOutcome {
        let Some(descriptor) = self.inner.registry.get_by_key(&id.full_name()) else {
            return Err(TaskError::UnknownTask(id.full_name()));
        };
        match self
            .run_hooks(&id, HookStage::Init, &descriptor.hooks.init, &payload)
            .await
        {
            Ok(()) => Ok(Value::Null),
            Err(error) => {
                self.report_hook_failure(&id, HookStage::Init, &error);
                self.set_failed(&id);
                Err(error)
            }
        }
    }

    /// Run the `onDone` hooks of every started task that has some, once.
    /// Failures are logged. Returns how many tasks were cleaned up.
    pub async fn run_shutdown_hooks(&self) -> usize {
        let entries = self.inner.shutdown.drain();
        for entry in &entries {
            debug!(task = %entry.task, "running onDone hooks on interrupt");
            if let Err(error) = self
                .run_hooks(
                    &entry.task,
                    HookStage::Done,
                    &entry.hooks,
                    &HookPayload::Interrupted,
                )
                .await
            {
                self.report_hook_failure(&entry.task, HookStage::Done, &error);
            }
        }
        entries.len()
    }

    /// Call the build-progress listeners of `event`'s stage whose group is
    /// touched by `scope`. Listener failures are logged, never propagated.
    pub async fn notify_build(&self, event: BuildEvent, scope: &[TaskId]) {
        let stage = event.stage();
        let listeners: Vec<_> = self
            .inner
            .registry
            .build_listeners(stage)
            .filter(|l| l.applies_to(scope.iter().map(|id| id.group.as_deref())))
            .cloned()
            .collect();

        for listener in listeners {
            if let Err(e) = (listener.callback)(event.clone()).await {
                error!("Error occured in build progress listener: {:#}", e);
            }
        }
    }

    fn report_hook_failure(&self, id: &TaskId, stage: HookStage, error: &TaskError) {
        warn!(task = %id, stage = %stage, "hook failed: {}", error);
        self.inner.reporter.report(&TaskEvent::HookFailed {
            id: id.clone(),
            stage,
            error: error.to_string(),
        });
    }

    fn set_failed(&self, id: &TaskId) {
        *lock(&self.inner.failed) = Some(id.clone());
    }

    fn push_frame(&self, id: &TaskId) {
        lock(&self.inner.running).push(id.clone());
    }

    fn pop_frame(&self, id: &TaskId) {
        let mut running = lock(&self.inner.running);
        if let Some(pos) = running.iter().rposition(|frame| frame == id) {
            running.remove(pos);
        }
    }

    fn context(&self, id: &TaskId) -> TaskContext {
        TaskContext {
            engine: self.clone(),
            task: id.clone(),
        }
    }
}

/// Handle passed to task bodies and hooks
#[derive(Clone)]
pub struct TaskContext {
    engine: Engine,
    task: TaskId,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// The task this context belongs to
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn flags(&self) -> &FlagSet {
        self.engine.flags()
    }

    pub fn workspaces(&self) -> &Workspaces {
        self.engine.workspaces()
    }

    /// Current build mode
    pub async fn mode(&self) -> Result<Mode, TaskError> {
        Ok(self.flags().mode().await?)
    }

    /// Prompts honouring `--no-prompt`
    pub async fn prompter(&self) -> Prompter {
        Prompter::new(self.flags().no_prompt().await)
    }

    /// Run another task, resolved within this task's group first
    pub fn run_task(&self, name: &str, input: Value) -> BoxFuture<'static, TaskOutcome> {
        self.engine.run_task(name, self.task.group.as_deref(), input)
    }

    /// Run several tasks in order
    pub fn run_tasks<S: AsRef<str>>(
        &self,
        names: &[S],
        input: Value,
    ) -> BoxFuture<'static, Result<Vec<Value>, TaskError>> {
        self.engine
            .run_tasks(names, self.task.group.as_deref(), input)
    }

    /// Run a task in a separate garn process of this project, forwarding
    /// this process's flags
    pub async fn spawn_task(&self, name: &str, group: Option<&str>) -> Result<ExecOutput, GarnError> {
        let full_name = match group {
            Some(group) => format!("{}:{}", group, name),
            None => name.to_string(),
        };

        let mut args = vec![full_name.clone()];
        for arg in self.flags().child_args().await? {
            if !args.contains(&arg) {
                args.push(arg);
            }
        }

        let project = self.workspaces().project_path().to_path_buf();
        let garn = project.join(garn_executable());
        debug!("Spawning 'garn {}'", full_name);
        Ok(exec::spawn(
            &garn.to_string_lossy(),
            &args,
            &ExecOptions::default().with_cwd(project),
        )
        .await?)
    }
}

/// Engine over `registry` with the given raw arguments and an empty environment
#[cfg(test)]
pub(crate) fn test_engine(
    registry: Registry,
    buildsystem_path: impl Into<std::path::PathBuf>,
    args: &[&str],
) -> Engine {
    let flags = garn_core::config::load_flags(
        args.iter().copied(),
        registry.flags().to_vec(),
        HashMap::new(),
        None,
    )
    .unwrap();
    Engine::new(
        registry,
        EngineOptions::new(flags, Workspaces::new(buildsystem_path)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use serde_json::json;

    use garn_core::config::load_flags;

    use crate::reporter::CollectingReporter;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn trace() -> Trace {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(trace: &Trace) -> Vec<String> {
        lock(trace).clone()
    }

    fn engine_with(registry: Registry) -> (Engine, Arc<CollectingReporter>) {
        let flags = load_flags(
            Vec::<String>::new(),
            registry.flags().to_vec(),
            HashMap::new(),
            None,
        )
        .unwrap();
        let workspaces = Workspaces::new(std::env::temp_dir().join("garn-engine-tests/buildsystem"));
        let reporter = Arc::new(CollectingReporter::default());
        let options = EngineOptions::new(flags, workspaces).with_reporter(reporter.clone());
        (Engine::new(registry, options), reporter)
    }

    fn traced_task(registry: &mut Registry, name: &'static str, deps: &[&str], trace: &Trace) {
        let run_trace = trace.clone();
        let init_trace = trace.clone();
        registry
            .task_with_deps(name, deps, move |_, input| {
                let trace = run_trace.clone();
                async move {
                    lock(&trace).push(format!("run:{}", name));
                    Ok(json!({ "name": name, "input": input }))
                }
            })
            .unwrap()
            .on_init(move |_, _| {
                let trace = init_trace.clone();
                async move {
                    lock(&trace).push(format!("init:{}", name));
                    Ok(())
                }
            });
    }

    #[tokio::test]
    async fn test_chain_threads_results_and_inits_first() {
        let trace = trace();
        let mut registry = Registry::empty();
        traced_task(&mut registry, "a", &[], &trace);
        traced_task(&mut registry, "b", &["a"], &trace);
        traced_task(&mut registry, "c", &["b"], &trace);
        let (engine, reporter) = engine_with(registry);

        let result = engine.run_task("c", None, Value::Null).await.unwrap();

        assert_eq!(
            result,
            json!({
                "name": "c",
                "input": { "name": "b", "input": { "name": "a", "input": null } }
            })
        );
        assert_eq!(
            entries(&trace),
            vec!["init:a", "init:b", "init:c", "run:a", "run:b", "run:c"]
        );
        assert_eq!(reporter.started(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_dependencies_thread_results_in_order() {
        let mut registry = Registry::empty();
        registry.task("one", |_, _| async { Ok(json!(1)) }).unwrap();
        registry
            .task("plus-one", |_, input: Value| async move {
                Ok(json!(input.as_i64().unwrap_or(0) + 1))
            })
            .unwrap();
        registry
            .task_with_deps("total", &["one", "plus-one"], |_, input| async move { Ok(input) })
            .unwrap();
        let (engine, _) = engine_with(registry);

        let result = engine.run_task("total", None, json!("ignored")).await.unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn test_task_without_dependencies_gets_input() {
        let mut registry = Registry::empty();
        registry
            .task("echo", |_, input| async move { Ok(input) })
            .unwrap();
        let (engine, _) = engine_with(registry);

        assert_eq!(
            engine.run_task("echo", None, json!("hi")).await.unwrap(),
            json!("hi")
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = Registry::empty();
        registry
            .task("slow", move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("done"))
                }
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        let (first, second) = tokio::join!(
            engine.run_task("slow", None, Value::Null),
            engine.run_task("slow", None, Value::Null)
        );
        assert_eq!(first.unwrap(), json!("done"));
        assert_eq!(second.unwrap(), json!("done"));

        engine.run_task("slow", None, Value::Null).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status("slow"), Some(ExecutionStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_failure_is_replayed_to_every_caller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = Registry::empty();
        registry
            .task("flaky", move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(anyhow!("boom"))
                }
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        let (first, second) = tokio::join!(
            engine.run_task("flaky", None, Value::Null),
            engine.run_task("flaky", None, Value::Null)
        );
        assert_eq!(first.unwrap_err().to_string(), "Task 'flaky' failed: boom");
        assert_eq!(second.unwrap_err().to_string(), "Task 'flaky' failed: boom");
        assert!(engine.run_task("flaky", None, Value::Null).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status("flaky"), Some(ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn test_failure_runs_error_then_done_hooks() {
        let trace = trace();
        let (t1, t2, t3) = (trace.clone(), trace.clone(), trace.clone());
        let mut registry = Registry::empty();
        registry
            .task("broken", |_, _| async { Err(anyhow!("nope")) })
            .unwrap()
            .on_success(move |_, _| {
                let t = t1.clone();
                async move {
                    lock(&t).push("success".into());
                    Ok(())
                }
            })
            .on_error(move |_, payload| {
                let t = t2.clone();
                async move {
                    assert!(matches!(payload, HookPayload::Error(_)));
                    lock(&t).push("error".into());
                    Ok(())
                }
            })
            .on_done(move |_, _| {
                let t = t3.clone();
                async move {
                    lock(&t).push("done".into());
                    Ok(())
                }
            });
        let (engine, reporter) = engine_with(registry);

        let err = engine.run_task("broken", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { ref task, .. } if task == "broken"));
        assert_eq!(entries(&trace), vec!["error", "done"]);
        assert_eq!(engine.failed_task(), Some(TaskId::new("broken")));
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Failed { id, .. } if id.name == "broken")));
    }

    #[tokio::test]
    async fn test_success_runs_success_then_done_hooks() {
        let trace = trace();
        let (t1, t2, t3) = (trace.clone(), trace.clone(), trace.clone());
        let mut registry = Registry::empty();
        registry
            .task("build", |_, _| async { Ok(json!("artifact")) })
            .unwrap()
            .on_error(move |_, _| {
                let t = t1.clone();
                async move {
                    lock(&t).push("error".into());
                    Ok(())
                }
            })
            .on_success(move |_, payload| {
                let t = t2.clone();
                async move {
                    lock(&t).push(format!("success:{}", payload.as_input()));
                    Ok(())
                }
            })
            .on_done(move |_, _| {
                let t = t3.clone();
                async move {
                    lock(&t).push("done".into());
                    Ok(())
                }
            });
        let (engine, _) = engine_with(registry);

        engine.run_task("build", None, Value::Null).await.unwrap();
        assert_eq!(entries(&trace), vec!["success:\"artifact\"", "done"]);
        assert_eq!(engine.failed_task(), None);
    }

    #[tokio::test]
    async fn test_failing_success_hook_fails_task() {
        let mut registry = Registry::empty();
        registry
            .task("build", |_, _| async { Ok(Value::Null) })
            .unwrap()
            .on_success(|_, _| async { Err(anyhow!("notify failed")) });
        let (engine, reporter) = engine_with(registry);

        let err = engine.run_task("build", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Hook { stage: HookStage::Success, .. }));
        assert_eq!(engine.failed_task(), Some(TaskId::new("build")));
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::HookFailed { .. })));
    }

    #[tokio::test]
    async fn test_error_hook_failure_keeps_original_error() {
        let mut registry = Registry::empty();
        registry
            .task("build", |_, _| async { Err(anyhow!("compile error")) })
            .unwrap()
            .on_error(|_, _| async { Err(anyhow!("hook error")) });
        let (engine, _) = engine_with(registry);

        let err = engine.run_task("build", None, Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Task 'build' failed: compile error");
    }

    #[tokio::test]
    async fn test_dependency_failure_aborts_dependant() {
        let trace = trace();
        let run_trace = trace.clone();
        let error_trace = trace.clone();
        let mut registry = Registry::empty();
        registry
            .task("compile", |_, _| async { Err(anyhow!("syntax error")) })
            .unwrap();
        registry
            .task_with_deps("pack", &["compile"], move |_, _| {
                let t = run_trace.clone();
                async move {
                    lock(&t).push("run:pack".into());
                    Ok(Value::Null)
                }
            })
            .unwrap()
            .on_error(move |_, _| {
                let t = error_trace.clone();
                async move {
                    lock(&t).push("error:pack".into());
                    Ok(())
                }
            });
        let (engine, _) = engine_with(registry);

        let err = engine.run_task("pack", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { ref task, .. } if task == "compile"));
        assert_eq!(entries(&trace), vec!["error:pack"]);
        assert_eq!(engine.failed_task(), Some(TaskId::new("pack")));
        assert_eq!(engine.status("compile"), Some(ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn test_run_tasks_stops_at_first_failure() {
        let mut registry = Registry::empty();
        registry.task("ok", |_, _| async { Ok(json!(1)) }).unwrap();
        registry
            .task("bad", |_, _| async { Err(anyhow!("bad")) })
            .unwrap();
        registry.task("never", |_, _| async { Ok(json!(3)) }).unwrap();
        let (engine, _) = engine_with(registry);

        assert!(engine
            .run_tasks(&["ok", "bad", "never"], None, Value::Null)
            .await
            .is_err());
        assert_eq!(engine.status("ok"), Some(ExecutionStatus::Succeeded));
        assert_eq!(engine.status("never"), Some(ExecutionStatus::NotStarted));

        let results = engine.run_tasks(&["ok"], None, Value::Null).await.unwrap();
        assert_eq!(results, vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_run_tasks_fires_all_inits_first() {
        let trace = trace();
        let mut registry = Registry::empty();
        traced_task(&mut registry, "lint", &[], &trace);
        traced_task(&mut registry, "test", &[], &trace);
        let (engine, _) = engine_with(registry);

        engine
            .run_tasks(&["lint", "test"], None, Value::Null)
            .await
            .unwrap();
        assert_eq!(
            entries(&trace),
            vec!["init:lint", "init:test", "run:lint", "run:test"]
        );
    }

    #[tokio::test]
    async fn test_init_hooks_fire_once_across_paths() {
        let trace = trace();
        let mut registry = Registry::empty();
        traced_task(&mut registry, "base", &[], &trace);
        traced_task(&mut registry, "left", &["base"], &trace);
        traced_task(&mut registry, "right", &["base"], &trace);
        traced_task(&mut registry, "top", &["left", "right"], &trace);
        let (engine, _) = engine_with(registry);

        engine.run_task("top", None, Value::Null).await.unwrap();
        engine.run_task("left", None, Value::Null).await.unwrap();

        let trace = entries(&trace);
        assert_eq!(trace.iter().filter(|t| *t == "init:base").count(), 1);
        assert_eq!(trace.iter().filter(|t| *t == "run:base").count(), 1);
        assert_eq!(&trace[..4], &["init:base", "init:left", "init:right", "init:top"]);
    }

    #[tokio::test]
    async fn test_failed_init_hook_fails_run() {
        let mut registry = Registry::empty();
        registry
            .task("deploy", |_, _| async { Ok(Value::Null) })
            .unwrap()
            .on_init(|_, _| async { Err(anyhow!("missing credentials")) });
        let (engine, _) = engine_with(registry);

        let err = engine.run_task("deploy", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Hook { stage: HookStage::Init, .. }));
        assert_eq!(engine.failed_task(), Some(TaskId::new("deploy")));
    }

    #[tokio::test]
    async fn test_task_list_hook_gets_result() {
        let seen = trace();
        let sink = seen.clone();
        let mut registry = Registry::empty();
        registry
            .task("build", |_, _| async { Ok(json!("v1.2.3")) })
            .unwrap()
            .run_on(HookStage::Success, &["notify"]);
        registry
            .task("notify", move |_, input| {
                let sink = sink.clone();
                async move {
                    lock(&sink).push(input.to_string());
                    Ok(Value::Null)
                }
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        engine.run_task("build", None, Value::Null).await.unwrap();
        assert_eq!(entries(&seen), vec!["\"v1.2.3\""]);
    }

    #[tokio::test]
    async fn test_nested_run_inherits_group() {
        let mut registry = Registry::empty();
        registry
            .task("build", |_, _| async { Ok(json!("root build")) })
            .unwrap();
        registry
            .task_group("docker", |r| {
                r.task("build", |_, _| async { Ok(json!("docker build")) })?;
                r.task("push", |ctx: TaskContext, _| async move {
                    Ok(ctx.run_task("build", Value::Null).await?)
                })?;
                Ok(())
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        assert_eq!(
            engine.run_task("push", Some("docker"), Value::Null).await.unwrap(),
            json!("docker build")
        );
        assert_eq!(
            engine.run_task("build", None, Value::Null).await.unwrap(),
            json!("root build")
        );
    }

    #[tokio::test]
    async fn test_nested_failure_is_not_rewrapped() {
        let mut registry = Registry::empty();
        registry
            .task("inner", |_, _| async { Err(anyhow!("inner broke")) })
            .unwrap();
        registry
            .task("outer", |ctx: TaskContext, _| async move {
                Ok(ctx.run_task("inner", Value::Null).await?)
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        let err = engine.run_task("outer", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { ref task, .. } if task == "inner"));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (engine, _) = engine_with(Registry::empty());
        let err = engine.run_task("nope", None, Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown task: nope");
    }

    #[tokio::test]
    async fn test_cycle_fails_instead_of_recursing() {
        let mut registry = Registry::empty();
        registry.alias("a", &["b"]).unwrap();
        registry.alias("b", &["a"]).unwrap();
        let (engine, _) = engine_with(registry);

        let err = engine.run_task("a", None, Value::Null).await.unwrap_err();
        assert!(matches!(err, TaskError::Cycle(_)));
    }

    #[tokio::test]
    async fn test_production_task_in_closure_pins_mode() {
        let mut registry = Registry::empty();
        registry
            .production_task("publish", &[], |ctx: TaskContext, _| async move {
                Ok(json!(ctx.mode().await?.as_str()))
            })
            .unwrap();
        registry.alias("release", &["publish"]).unwrap();
        registry.task("test", |_, _| async { Ok(Value::Null) }).unwrap();
        let (engine, _) = engine_with(registry);

        let plain = engine.plan(&["test"], None).unwrap();
        assert!(!engine.pin_production_mode(&plain).unwrap());
        assert_eq!(engine.flags().mode().await.unwrap(), Mode::Development);

        let plan = engine.plan(&["release"], None).unwrap();
        assert!(engine.pin_production_mode(&plan).unwrap());
        engine.run_task("release", None, Value::Null).await.unwrap();
        assert_eq!(engine.flags().mode().await.unwrap(), Mode::Production);
        assert_eq!(
            engine.run_task("publish", None, Value::Null).await.unwrap(),
            json!("production")
        );
    }

    #[tokio::test]
    async fn test_shutdown_runs_done_hooks_of_started_tasks() {
        let interrupted = Arc::new(AtomicUsize::new(0));
        let counter = interrupted.clone();
        let mut registry = Registry::empty();
        registry
            .task("serve", |_, _| async {
                future::pending::<()>().await;
                Ok(Value::Null)
            })
            .unwrap()
            .on_done(move |_, payload| {
                let counter = counter.clone();
                async move {
                    if matches!(payload, HookPayload::Interrupted) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            });
        registry
            .task("idle", |_, _| async { Ok(Value::Null) })
            .unwrap()
            .on_done(|_, _| async { Ok(()) });
        let (engine, _) = engine_with(registry);

        let handle = tokio::spawn(engine.run_task("serve", None, Value::Null));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.status("serve"), Some(ExecutionStatus::Running));

        assert_eq!(engine.run_shutdown_hooks().await, 1);
        assert_eq!(interrupted.load(Ordering::SeqCst), 1);
        assert_eq!(engine.run_shutdown_hooks().await, 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_build_listeners_respect_group_scope() {
        let trace = trace();
        let (t1, t2) = (trace.clone(), trace.clone());
        let mut registry = Registry::empty();
        registry.task("build", |_, _| async { Ok(Value::Null) }).unwrap();
        registry.on_build_init(move |_| {
            let t = t1.clone();
            async move {
                lock(&t).push("global".into());
                Ok(())
            }
        });
        registry
            .task_group("docker", |r| {
                r.on_build_init(move |_| {
                    let t = t2.clone();
                    async move {
                        lock(&t).push("docker".into());
                        Err(anyhow!("listener errors are only logged"))
                    }
                });
                Ok(())
            })
            .unwrap();
        let (engine, _) = engine_with(registry);

        let scope = vec![TaskId::new("build")];
        engine
            .notify_build(BuildEvent::Init(scope.clone()), &scope)
            .await;
        assert_eq!(entries(&trace), vec!["global"]);

        let scope = vec![TaskId::grouped("docker", "push")];
        engine
            .notify_build(BuildEvent::Init(scope.clone()), &scope)
            .await;
        assert_eq!(entries(&trace), vec!["global", "global", "docker"]);
    }
}
