//! Task execution reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::task::{HookStage, TaskId};

/// Events emitted during task execution
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task's runner is starting
    Started { id: TaskId },
    /// A task's runner completed successfully
    Completed { id: TaskId, duration: Duration },
    /// A task failed
    Failed {
        id: TaskId,
        duration: Duration,
        error: String,
    },
    /// A hook failed; on the error path the task's own error is kept
    HookFailed {
        id: TaskId,
        stage: HookStage,
        error: String,
    },
    /// A fan-out batch is starting
    BatchStarted { batch: usize, size: usize },
    /// A fan-out program exited
    ProgramFinished {
        program: String,
        success: bool,
        duration: Duration,
    },
    /// All fan-out batches completed
    AllCompleted {
        total: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { id } => {
                tracing::debug!("Starting {}", id);
            }
            TaskEvent::Completed { id, duration } => {
                tracing::debug!("Build time (task '{}'): {}", id, format_duration(*duration));
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                tracing::error!(
                    "Task {} failed after {} with {}",
                    id,
                    format_duration(*duration),
                    error
                );
            }
            TaskEvent::HookFailed { id, stage, error } => {
                tracing::error!("{} hook of {} failed: {}", stage, id, error);
            }
            TaskEvent::BatchStarted { batch, size } => {
                tracing::debug!("Starting batch {} ({} programs)", batch, size);
            }
            TaskEvent::ProgramFinished {
                program,
                success,
                duration,
            } => {
                if *success {
                    tracing::debug!("{} finished in {:.1}s", program, duration.as_secs_f64());
                } else {
                    tracing::warn!("{} failed after {:.1}s", program, duration.as_secs_f64());
                }
            }
            TaskEvent::AllCompleted {
                total,
                failed,
                duration,
            } => {
                tracing::info!(
                    "All programs complete: {}/{} succeeded ({:.1}s)",
                    total - failed,
                    total,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// IDs of started tasks, in order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Started { id } => Some(id.full_name()),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a duration as "Nm Ss"
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64().round() as u64;
    format!("{}m {}s", seconds / 60, seconds % 60)
}
