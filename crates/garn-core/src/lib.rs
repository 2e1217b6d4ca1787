//! Garn Core - Core library for the garn build-task orchestrator
//!
//! This crate provides error handling, flag and argument resolution, the
//! external process runner, interactive prompts and workspace discovery that
//! the task engine builds on.

pub mod config;
pub mod error;
pub mod exec;
pub mod monorepo;
pub mod prompt;
pub mod similarity;
pub mod version;

pub use config::{CliArgs, Flag, FlagSet, FlagType, FlagValue, LogLevel, Mode};
pub use error::{ConfigError, GarnError, ProcessError, PromptError, Result, WorkspaceError};
pub use exec::{ExecOptions, ExecOutput, StdioMode};
pub use monorepo::{WorkspacePackage, Workspaces};
pub use prompt::{Choice, Prompter};
pub use version::VersionTag;
