//! External process runner
//!
//! Every integration that shells out (git, package managers, child garn
//! processes) goes through [`spawn`]. Output is either inherited from the
//! current process or captured, and a non-zero exit becomes a
//! [`ProcessError::Failed`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{LazyLock, Mutex, PoisonError};

use tokio::process::Command;
use tracing::debug;

use crate::error::ProcessError;

/// Exit code Windows reports when a console process is stopped with Ctrl+C
const WINDOWS_CTRL_C_EXIT: u32 = 3221225786;

/// Commands already confirmed to be on `PATH`
static FOUND_IN_PATH: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// How the child's stdout/stderr are wired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the parent's terminal
    #[default]
    Inherit,
    /// Collect output into [`ExecOutput`]
    Capture,
}

/// Options for [`spawn`]
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Stdio wiring
    pub stdio: StdioMode,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    /// Capture stdout/stderr
    pub fn captured() -> Self {
        Self {
            stdio: StdioMode::Capture,
            ..Default::default()
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Output of a finished process. Empty when stdio was inherited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a program to completion
pub async fn spawn<S: AsRef<str>>(
    program: &str,
    args: &[S],
    options: &ExecOptions,
) -> Result<ExecOutput, ProcessError> {
    ensure_in_path(program)?;

    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let joined = args.join(" ");
    debug!(program, args = %joined, "spawning process");

    let mut cmd = command(program, &args, options);
    let spawn_failed = |e: std::io::Error| ProcessError::SpawnFailed {
        program: program_name(program),
        args: joined.clone(),
        reason: e.to_string(),
    };

    let (status, output) = match options.stdio {
        StdioMode::Inherit => {
            let status = cmd.status().await.map_err(spawn_failed)?;
            (status, ExecOutput::default())
        }
        StdioMode::Capture => {
            let output = cmd.output().await.map_err(spawn_failed)?;
            let captured = ExecOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            (output.status, captured)
        }
    };

    match status.code() {
        Some(code) if code == 0 || is_interrupt_code(code) => Ok(output),
        // None: killed by a signal
        code => Err(ProcessError::Failed {
            program: program_name(program),
            args: joined,
            code: code.unwrap_or(-1),
            stderr: output.stderr,
        }),
    }
}

/// Build a tokio command with the given options applied
pub fn command(program: &str, args: &[&str], options: &ExecOptions) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    match options.stdio {
        StdioMode::Inherit => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        StdioMode::Capture => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
    }
    cmd
}

/// Fail with [`ProcessError::NotInPath`] for bare command names that
/// can't be found on `PATH`
pub fn ensure_in_path(program: &str) -> Result<(), ProcessError> {
    if program.contains('/') || program.contains('\\') || is_in_path(program) {
        Ok(())
    } else {
        Err(ProcessError::NotInPath(program.to_string()))
    }
}

/// Whether a command is on `PATH`; positive answers are remembered
pub fn is_in_path(program: &str) -> bool {
    let mut found = FOUND_IN_PATH
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if found.contains(program) {
        return true;
    }

    match which::which(program) {
        Ok(path) => {
            debug!(program, path = %path.display(), "found executable");
            found.insert(program.to_string());
            true
        }
        Err(e) => {
            debug!(program, error = %e, "executable not found in PATH");
            false
        }
    }
}

/// Display name of a program: the basename for absolute paths
pub fn program_name(program: &str) -> String {
    let path = Path::new(program);
    if path.is_absolute() {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string())
    } else {
        program.to_string()
    }
}

fn is_interrupt_code(code: i32) -> bool {
    code as u32 == WINDOWS_CTRL_C_EXIT
}
