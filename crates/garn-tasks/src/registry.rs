//! Task registry
//!
//! Build scripts declare their tasks here before anything runs. Once the
//! registry is handed to an [`Engine`](crate::engine::Engine) it is frozen.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use garn_core::config::Flag;
use garn_core::error::ConfigError;

use crate::builtin;
use crate::engine::TaskContext;
use crate::plugin::Plugin;
use crate::task::{
    is_valid_name, noop_runner, runner, Hook, HookPayload, HookStage, Runner, TaskDescriptor,
    TaskId, TaskKind,
};
use crate::workspace::WorkspacePlugin;

/// Name of the task that runs when none is given
pub const DEFAULT_TASK: &str = garn_core::config::DEFAULT_TASK;

/// What a build-progress listener is told
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// The build is about to start with these requested tasks
    Init(Vec<TaskId>),
    /// The requested tasks succeeded
    Success(Vec<TaskId>),
    /// A task failed
    Error {
        task: TaskId,
        error: crate::task::TaskError,
    },
    /// The build finished, successfully or not
    Done(Vec<TaskId>),
}

impl BuildEvent {
    /// Stage this event belongs to
    pub fn stage(&self) -> HookStage {
        match self {
            Self::Init(_) => HookStage::Init,
            Self::Success(_) => HookStage::Success,
            Self::Error { .. } => HookStage::Error,
            Self::Done(_) => HookStage::Done,
        }
    }
}

/// Build-progress listener callback
pub type BuildListenerFn =
    Arc<dyn Fn(BuildEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A build-progress listener, optionally limited to one task group
#[derive(Clone)]
pub struct BuildListener {
    pub stage: HookStage,
    pub group: Option<String>,
    pub callback: BuildListenerFn,
}

impl BuildListener {
    /// Whether this listener cares about a build touching `groups`
    pub fn applies_to<'a>(&self, mut groups: impl Iterator<Item = Option<&'a str>>) -> bool {
        match &self.group {
            None => true,
            Some(own) => groups.any(|g| g == Some(own.as_str())),
        }
    }
}

/// All declared tasks, flags, listeners and plugins of a build script
pub struct Registry {
    tasks: BTreeMap<String, TaskDescriptor>,
    current_group: Option<String>,
    listeners: Vec<BuildListener>,
    flags: Vec<Flag>,
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl Registry {
    /// Create a registry holding the built-in `default` task and the
    /// `workspace` plugin
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(
            DEFAULT_TASK,
            Vec::new(),
            builtin::default_task_runner(),
            TaskKind::TASK,
        );
        registry.plugin(Arc::new(WorkspacePlugin));
        registry
    }

    /// Create a registry without built-ins
    pub fn empty() -> Self {
        Self {
            tasks: BTreeMap::new(),
            current_group: None,
            listeners: Vec::new(),
            flags: Vec::new(),
            plugins: BTreeMap::new(),
        }
    }

    /// Declare a task without dependencies
    pub fn task<F, Fut>(&mut self, name: &str, f: F) -> Result<TaskHandle<'_>, ConfigError>
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.declare(name, Vec::new(), runner(f), TaskKind::TASK)
    }

    /// Declare a task that runs `dependencies` first
    pub fn task_with_deps<F, Fut>(
        &mut self,
        name: &str,
        dependencies: &[&str],
        f: F,
    ) -> Result<TaskHandle<'_>, ConfigError>
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.declare(name, to_owned(dependencies), runner(f), TaskKind::TASK)
    }

    /// Declare a task that only runs its dependencies
    pub fn alias(&mut self, name: &str, dependencies: &[&str]) -> Result<TaskHandle<'_>, ConfigError> {
        self.declare(name, to_owned(dependencies), noop_runner(), TaskKind::TASK)
    }

    /// Declare a task that can only run as a dependency of another task
    pub fn internal_task<F, Fut>(
        &mut self,
        name: &str,
        dependencies: &[&str],
        f: F,
    ) -> Result<TaskHandle<'_>, ConfigError>
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.declare(name, to_owned(dependencies), runner(f), TaskKind::INTERNAL)
    }

    /// Declare a task that forces production mode when it is part of a run
    pub fn production_task<F, Fut>(
        &mut self,
        name: &str,
        dependencies: &[&str],
        f: F,
    ) -> Result<TaskHandle<'_>, ConfigError>
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.declare(name, to_owned(dependencies), runner(f), TaskKind::PRODUCTION)
    }

    /// Declare an internal task that forces production mode
    pub fn internal_production_task<F, Fut>(
        &mut self,
        name: &str,
        dependencies: &[&str],
        f: F,
    ) -> Result<TaskHandle<'_>, ConfigError>
    where
        F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.declare(
            name,
            to_owned(dependencies),
            runner(f),
            TaskKind::INTERNAL_PRODUCTION,
        )
    }

    /// Register a descriptor; every declaration flavour ends up here.
    ///
    /// Re-registering a full name replaces the previous descriptor and its
    /// hooks.
    pub fn declare(
        &mut self,
        name: &str,
        dependencies: Vec<String>,
        runner: Runner,
        kind: TaskKind,
    ) -> Result<TaskHandle<'_>, ConfigError> {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidTaskName(name.to_string()));
        }
        Ok(self.register(name, dependencies, runner, kind))
    }

    fn register(
        &mut self,
        name: &str,
        dependencies: Vec<String>,
        runner: Runner,
        kind: TaskKind,
    ) -> TaskHandle<'_> {
        let id = TaskId {
            group: self.current_group.clone(),
            name: name.to_string(),
        };
        let key = id.full_name();
        if self.tasks.contains_key(&key) {
            debug!(task = %key, "replacing task declaration");
        }
        self.tasks
            .insert(key.clone(), TaskDescriptor::new(id, dependencies, runner, kind));
        TaskHandle {
            registry: self,
            key,
        }
    }

    /// Declare tasks inside a task group. Groups can't be nested.
    pub fn task_group<F>(&mut self, name: &str, declare: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Registry) -> Result<(), ConfigError>,
    {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidGroupName(name.to_string()));
        }
        if let Some(outer) = &self.current_group {
            return Err(ConfigError::NestedTaskGroup {
                outer: outer.clone(),
                inner: name.to_string(),
            });
        }

        self.current_group = Some(name.to_string());
        let result = declare(self);
        self.current_group = None;
        result
    }

    /// Group currently being declared
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Look up a task. Inside a group `group:name` wins over `name`.
    pub fn get(&self, name: &str, group: Option<&str>) -> Option<&TaskDescriptor> {
        group
            .and_then(|g| self.tasks.get(&format!("{}:{}", g, name)))
            .or_else(|| self.tasks.get(name))
    }

    /// Look up a task by its full name
    pub fn get_by_key(&self, key: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(key)
    }

    /// All tasks in full-name order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.values()
    }

    /// Full names of tasks that can be requested on the command line
    pub fn runnable_task_names(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, d)| !d.is_internal())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Whether a task with this exact full name exists
    pub fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    fn listen<F, Fut>(&mut self, stage: HookStage, f: F)
    where
        F: Fn(BuildEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listeners.push(BuildListener {
            stage,
            group: self.current_group.clone(),
            callback: Arc::new(move |event| f(event).boxed()),
        });
    }

    /// Called before the build starts
    pub fn on_build_init<F, Fut>(&mut self, f: F)
    where
        F: Fn(BuildEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(HookStage::Init, f)
    }

    /// Called after a successful build
    pub fn on_build_success<F, Fut>(&mut self, f: F)
    where
        F: Fn(BuildEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(HookStage::Success, f)
    }

    /// Called after a failed build
    pub fn on_build_error<F, Fut>(&mut self, f: F)
    where
        F: Fn(BuildEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(HookStage::Error, f)
    }

    /// Called after every build
    pub fn on_build_done<F, Fut>(&mut self, f: F)
    where
        F: Fn(BuildEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(HookStage::Done, f)
    }

    /// Listeners of one stage
    pub fn build_listeners(&self, stage: HookStage) -> impl Iterator<Item = &BuildListener> {
        self.listeners.iter().filter(move |l| l.stage == stage)
    }

    /// Declare an additional flag
    pub fn flag(&mut self, flag: Flag) {
        self.flags.push(flag);
    }

    /// Flags declared by the build script
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Register a plugin; its name becomes a reserved pseudo-task
    pub fn plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    /// Look up a plugin
    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// All plugins in name order
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Fluent handle on a freshly declared task
pub struct TaskHandle<'a> {
    registry: &'a mut Registry,
    key: String,
}

impl<'a> TaskHandle<'a> {
    fn descriptor_mut(&mut self) -> Option<&mut TaskDescriptor> {
        self.registry.tasks.get_mut(&self.key)
    }

    /// The declared task
    pub fn descriptor(&self) -> Option<&TaskDescriptor> {
        self.registry.tasks.get(&self.key)
    }

    /// Full name of the declared task
    pub fn full_name(&self) -> &str {
        &self.key
    }

    /// Append a hook to one stage
    pub fn hook(mut self, stage: HookStage, hook: Hook) -> Self {
        if let Some(descriptor) = self.descriptor_mut() {
            descriptor.hooks.stage_mut(stage).push(hook);
        }
        self
    }

    /// Runs before any task of the plan starts
    pub fn on_init<F, Fut>(self, f: F) -> Self
    where
        F: Fn(TaskContext, HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookStage::Init, Hook::callback(f))
    }

    /// Runs right after the task succeeded
    pub fn on_success<F, Fut>(self, f: F) -> Self
    where
        F: Fn(TaskContext, HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookStage::Success, Hook::callback(f))
    }

    /// Runs right after the task failed
    pub fn on_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(TaskContext, HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookStage::Error, Hook::callback(f))
    }

    /// Runs after the task finished either way, and on interrupt
    pub fn on_done<F, Fut>(self, f: F) -> Self
    where
        F: Fn(TaskContext, HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookStage::Done, Hook::callback(f))
    }

    /// Run the named tasks as a hook of `stage`
    pub fn run_on(self, stage: HookStage, tasks: &[&str]) -> Self {
        self.hook(stage, Hook::tasks(tasks.iter().copied()))
    }

    /// Sub-arguments advertised in the metadata artifact
    pub fn with_sub_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        if let Some(descriptor) = self.descriptor_mut() {
            descriptor.sub_args = Some(args);
        }
        self
    }

    /// JSON file listing sub-arguments
    pub fn with_sub_args_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(descriptor) = self.descriptor_mut() {
            descriptor.sub_args_file = Some(path);
        }
        self
    }
}
