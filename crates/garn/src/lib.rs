//! Garn - a build-task orchestrator
//!
//! A build script declares tasks on a [`Registry`] and hands it to
//! [`main`]:
//!
//! ```no_run
//! use garn::{Registry, Value};
//!
//! fn main() -> std::process::ExitCode {
//!     let mut registry = Registry::new();
//!     registry
//!         .task("compile", |_, _| async { Ok(Value::Null) })
//!         .expect("valid task name");
//!     registry
//!         .task_with_deps("test", &["compile"], |_, input| async move { Ok(input) })
//!         .expect("valid task name");
//!     garn::main(registry)
//! }
//! ```

pub mod app;
pub mod cli;
pub mod exit_codes;
pub mod logging;
pub mod output;

use std::process::ExitCode;

use clap::Parser;

pub use app::{Garn, Outcome, RunError};
pub use async_trait::async_trait;
pub use serde_json::Value;

pub use garn_core::config::{Flag, FlagType, FlagValue, LogLevel, Mode};
pub use garn_core::error::{ConfigError, GarnError, ProcessError, PromptError};
pub use garn_core::exec::{self, ExecOptions, ExecOutput};
pub use garn_core::prompt::{Choice, Prompter};
pub use garn_core::version::{self, VersionTag};
pub use garn_core::monorepo::{WorkspacePackage, Workspaces};
pub use garn_tasks::parallel::{self, ParallelProgram, ParallelRunner, Parallelism};
pub use garn_tasks::task::task_nameify;
pub use garn_tasks::{
    BuildEvent, Engine, Hook, HookPayload, HookStage, Plugin, Registry, TaskContext, TaskError,
    TaskId, DEFAULT_TASK,
};

/// Parse the process arguments, run the requested task and return the
/// process exit code
pub fn main(registry: Registry) -> ExitCode {
    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            output::error(&format!("Failed to start the async runtime: {}", e));
            return ExitCode::from(exit_codes::ERROR);
        }
    };

    ExitCode::from(runtime.block_on(execute(registry, cli.args)))
}

async fn execute(registry: Registry, args: Vec<String>) -> u8 {
    let garn = match Garn::new(registry, args) {
        Ok(garn) => garn,
        Err(e) => {
            output::error(&e.to_string());
            return exit_codes::ERROR;
        }
    };

    let flags = garn.engine().flags();
    let test_mode = flags.args().test_mode();
    let _guard = logging::init_tracing(flags.log_level().await, !test_mode);

    let outcome = if test_mode {
        Outcome::Finished(garn.run().await)
    } else {
        garn.run_to_completion().await
    };
    report(&outcome);
    exit_code(&outcome)
}

fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Finished(Err(e)) => output::error(&format!("{:#}", e)),
        Outcome::Interrupted { cleaned } => {
            output::warning(&format!("Interrupted, cleaned up after {} task(s)", cleaned))
        }
        Outcome::Finished(Ok(())) => {}
    }
}

/// Exit code for a finished run
pub fn exit_code(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Finished(Ok(())) => exit_codes::SUCCESS,
        Outcome::Finished(Err(_)) => exit_codes::ERROR,
        Outcome::Interrupted { .. } => exit_codes::CANCELLED,
    }
}
