//! Garn Tasks - Task registry and execution engine
//!
//! This crate provides task declaration with hooks and groups, the memoizing
//! execution engine, bounded parallel fan-out of external programs, and the
//! workspace plugin that forwards tasks into monorepo packages.

pub mod builtin;
pub mod engine;
pub mod metadata;
pub mod parallel;
pub mod plan;
pub mod plugin;
pub mod registry;
pub mod reporter;
pub mod shutdown;
pub mod task;
pub mod workspace;

pub use engine::{Engine, EngineOptions, ExecutionStatus, TaskContext};
pub use metadata::{MetaData, MetaDataError};
pub use parallel::{FanOutError, FanOutSummary, ParallelProgram, ParallelRunner, Parallelism};
pub use plan::ExecutionPlan;
pub use plugin::Plugin;
pub use registry::{BuildEvent, Registry, TaskHandle, DEFAULT_TASK};
pub use reporter::{TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use shutdown::ShutdownRegistry;
pub use task::{Hook, HookPayload, HookStage, Runner, TaskDescriptor, TaskError, TaskId, TaskOutcome};
pub use workspace::{run_workspace_task, WorkspacePlugin, WorkspaceTaskError};
