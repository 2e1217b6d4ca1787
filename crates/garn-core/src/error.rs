//! Error types for garn

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GarnError
pub type Result<T> = std::result::Result<T, GarnError>;

/// Main error type for garn-core operations
#[derive(Debug, Error)]
pub enum GarnError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// External process errors
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Workspace discovery errors
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Prompt errors
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration errors. These surface at declaration or resolution time and
/// are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Task name does not match `^[a-z0-9-]+$`
    #[error("Invalid task name: {0}")]
    InvalidTaskName(String),

    /// Task group name does not match `^[a-z0-9-]+$`
    #[error("Invalid task group name: {0}")]
    InvalidGroupName(String),

    /// A task group was declared inside another one
    #[error("Can not declare task group '{inner}' within task group '{outer}'")]
    NestedTaskGroup { outer: String, inner: String },

    /// Flag was never registered
    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    /// Flag has neither a value nor a default
    #[error("Cannot find a value for the flag '{0}'")]
    MissingFlagValue(String),

    /// Flag value is not one of the allowed values
    #[error("Invalid value '{value}' for flag '{name}', expected one of: {expected}")]
    InvalidFlagValue {
        name: String,
        value: String,
        expected: String,
    },

    /// A flag with this name already exists
    #[error("Flag '{0}' is already registered")]
    DuplicateFlag(String),

    /// Not a `vX.Y.Z` or `<package>@X.Y.Z` tag
    #[error("The tag '{0}' is not a valid version tag")]
    InvalidVersionTag(String),

    /// `--version` names a different package than the current one
    #[error("The cli flag --version was set to '{version}' but that does not match the current package which is '{current}'")]
    VersionPackageMismatch { version: String, current: String },
}

/// External process errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// Executable could not be located on PATH
    #[error("The executable '{0}' could not be found in your PATH. You should add it to the PATH or reinstall the program.")]
    NotInPath(String),

    /// Process could not be started
    #[error("{program} {args} failed: {reason}")]
    SpawnFailed {
        program: String,
        args: String,
        reason: String,
    },

    /// Process exited with a non-zero code
    #[error("{program} {args} failed with code {code}.{}", format_output(.stderr))]
    Failed {
        program: String,
        args: String,
        code: i32,
        stderr: String,
    },
}

fn format_output(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" Output:{}", stderr)
    }
}

/// Workspace discovery errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Manifest could not be parsed
    #[error("Failed to parse workspace manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// Invalid glob pattern in the manifest
    #[error("Invalid workspace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interactive prompt errors
#[derive(Debug, Error)]
pub enum PromptError {
    /// A human is required but prompting is disabled
    #[error("Can't call {0}() when running on a CI server or with the --no-prompt flag")]
    NonInteractive(&'static str),

    /// The terminal interaction failed
    #[error("Prompt failed: {0}")]
    Terminal(String),
}

impl GarnError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_message_with_output() {
        let err = ProcessError::Failed {
            program: "git".to_string(),
            args: "tag --points-at HEAD".to_string(),
            code: 128,
            stderr: "not a git repository".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git tag --points-at HEAD failed with code 128. Output:not a git repository"
        );
    }

    #[test]
    fn test_process_failed_message_without_output() {
        let err = ProcessError::Failed {
            program: "docker".to_string(),
            args: "build .".to_string(),
            code: 1,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "docker build . failed with code 1.");
    }

    #[test]
    fn test_config_error_converts() {
        let err: GarnError = ConfigError::InvalidTaskName("Build".to_string()).into();
        assert!(matches!(err, GarnError::Config(_)));
        assert_eq!(err.to_string(), "Invalid task name: Build");
    }
}
