//! Task types and definitions

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use garn_core::error::ConfigError;

use crate::engine::TaskContext;

/// Valid task and task group names
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("Invalid regex"));

static NAMEIFY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("Invalid regex"));

/// Whether `name` is a valid task or task group name
pub fn is_valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// Turn an arbitrary string into a valid task name
pub fn task_nameify(s: &str) -> String {
    let lowered = s.to_lowercase().replace('.', "-");
    NAMEIFY_REGEX.replace_all(&lowered, "").into_owned()
}

/// Unique identifier for a task in the registry
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Task group, if the task was declared inside one
    pub group: Option<String>,
    /// Task name (e.g., "build", "test", "pack")
    pub name: String,
}

impl TaskId {
    /// Create an ungrouped task ID
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group: None,
            name: name.into(),
        }
    }

    /// Create a grouped task ID
    pub fn grouped(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            name: name.into(),
        }
    }

    /// Parse a task ID from "group:name" or "name" format
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((group, name)) => Self::grouped(group, name),
            None => Self::new(s),
        }
    }

    /// Registry key: "group:name" or "name"
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}", group, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Lifecycle stages of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Before any task of the plan starts
    Init,
    /// After the task succeeded
    Success,
    /// After the task failed
    Error,
    /// After the task succeeded or failed, and on interrupt
    Done,
}

impl HookStage {
    /// Get the stage name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "onInit",
            Self::Success => "onSuccess",
            Self::Error => "onError",
            Self::Done => "onDone",
        }
    }

    /// Parse stage from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "onInit" | "init" => Some(Self::Init),
            "onSuccess" | "success" => Some(Self::Success),
            "onError" | "error" => Some(Self::Error),
            "onDone" | "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Get all stages in lifecycle order
    pub fn all() -> &'static [HookStage] {
        &[Self::Init, Self::Success, Self::Error, Self::Done]
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while running tasks.
///
/// Cloneable so that a memoized failure can be handed to every awaiter.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// No task with this name exists
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The dependency graph loops back on itself
    #[error("Dependency cycle detected: {0}")]
    Cycle(String),

    /// The task's runner failed
    #[error("Task '{task}' failed: {error:#}")]
    Failed {
        task: String,
        error: Arc<anyhow::Error>,
    },

    /// A lifecycle hook failed
    #[error("{stage} hook of task '{task}' failed: {error:#}")]
    Hook {
        task: String,
        stage: HookStage,
        error: Arc<anyhow::Error>,
    },

    /// Flag or declaration problem
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TaskError {
    /// Wrap a runner error, keeping task errors raised by nested runs intact
    pub fn from_runner(task: &TaskId, error: anyhow::Error) -> Self {
        match error.downcast_ref::<TaskError>() {
            Some(inner) => inner.clone(),
            None => Self::Failed {
                task: task.full_name(),
                error: Arc::new(error),
            },
        }
    }

    /// Wrap a hook error
    pub fn from_hook(task: &TaskId, stage: HookStage, error: anyhow::Error) -> Self {
        match error.downcast_ref::<TaskError>() {
            Some(inner) => inner.clone(),
            None => Self::Hook {
                task: task.full_name(),
                stage,
                error: Arc::new(error),
            },
        }
    }
}

/// Result of a task: its value, or the error every awaiter receives
pub type TaskOutcome = Result<Value, TaskError>;

/// Body of a task. Receives the result of its last dependency, or the value
/// it was run with when it has no dependencies.
pub type Runner = Arc<dyn Fn(TaskContext, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Hook callback
pub type HookFn =
    Arc<dyn Fn(TaskContext, HookPayload) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box a closure returning a future into a [`Runner`]
pub fn runner<F, Fut>(f: F) -> Runner
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx, input| f(ctx, input).boxed())
}

/// Runner of tasks that only aggregate dependencies
pub fn noop_runner() -> Runner {
    Arc::new(|_, _| async { Ok(Value::Null) }.boxed())
}

/// What a hook is called with
#[derive(Debug, Clone)]
pub enum HookPayload {
    /// Full names of every task in the plan being initialised
    Init(Vec<String>),
    /// The task's result
    Success(Value),
    /// The task's error
    Error(TaskError),
    /// The process is being interrupted
    Interrupted,
}

impl HookPayload {
    /// Value handed to task-list hooks as their input
    pub fn as_input(&self) -> Value {
        match self {
            Self::Init(names) => Value::from(names.clone()),
            Self::Success(value) => value.clone(),
            Self::Error(error) => Value::String(error.to_string()),
            Self::Interrupted => Value::Object(Default::default()),
        }
    }
}

/// A lifecycle hook: either a callback or a list of tasks to run
#[derive(Clone)]
pub enum Hook {
    Callback(HookFn),
    Tasks(Vec<String>),
}

impl Hook {
    /// Create a callback hook
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext, HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Callback(Arc::new(move |ctx, payload| f(ctx, payload).boxed()))
    }

    /// Create a hook that runs the named tasks in order
    pub fn tasks<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tasks(names.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => write!(f, "Callback(..)"),
            Self::Tasks(names) => f.debug_tuple("Tasks").field(names).finish(),
        }
    }
}

/// Hook lists of one task
#[derive(Debug, Clone, Default)]
pub struct TaskHooks {
    pub init: Vec<Hook>,
    pub success: Vec<Hook>,
    pub error: Vec<Hook>,
    pub done: Vec<Hook>,
}

impl TaskHooks {
    /// Hooks of one stage
    pub fn stage(&self, stage: HookStage) -> &[Hook] {
        match stage {
            HookStage::Init => &self.init,
            HookStage::Success => &self.success,
            HookStage::Error => &self.error,
            HookStage::Done => &self.done,
        }
    }

    pub(crate) fn stage_mut(&mut self, stage: HookStage) -> &mut Vec<Hook> {
        match stage {
            HookStage::Init => &mut self.init,
            HookStage::Success => &mut self.success,
            HookStage::Error => &mut self.error,
            HookStage::Done => &mut self.done,
        }
    }
}

/// Kind of declaration a task came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskKind {
    /// Can only run as a dependency of another task
    pub internal: bool,
    /// Forces `mode=production` when part of a run
    pub production: bool,
}

impl TaskKind {
    pub const TASK: Self = Self {
        internal: false,
        production: false,
    };
    pub const INTERNAL: Self = Self {
        internal: true,
        production: false,
    };
    pub const PRODUCTION: Self = Self {
        internal: false,
        production: true,
    };
    pub const INTERNAL_PRODUCTION: Self = Self {
        internal: true,
        production: true,
    };
}

/// A declared task
#[derive(Clone)]
pub struct TaskDescriptor {
    /// Identifier
    pub id: TaskId,
    /// Tasks that run before this one, in order
    pub dependencies: Vec<String>,
    /// Task body
    pub runner: Runner,
    /// Internal/production attributes
    pub kind: TaskKind,
    /// Lifecycle hooks
    pub hooks: TaskHooks,
    /// Sub-arguments advertised in the metadata artifact
    pub sub_args: Option<Vec<String>>,
    /// JSON file with sub-arguments, read when the metadata is written
    pub sub_args_file: Option<PathBuf>,
}

impl TaskDescriptor {
    /// Create a descriptor
    pub fn new(id: TaskId, dependencies: Vec<String>, runner: Runner, kind: TaskKind) -> Self {
        Self {
            id,
            dependencies,
            runner,
            kind,
            hooks: TaskHooks::default(),
            sub_args: None,
            sub_args_file: None,
        }
    }

    /// Registry key
    pub fn full_name(&self) -> String {
        self.id.full_name()
    }

    /// Task group
    pub fn group(&self) -> Option<&str> {
        self.id.group.as_deref()
    }

    pub fn is_internal(&self) -> bool {
        self.kind.internal
    }

    pub fn is_production(&self) -> bool {
        self.kind.production
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("kind", &self.kind)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
