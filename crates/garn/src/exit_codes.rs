//! Exit codes for the CLI

/// Success
pub const SUCCESS: u8 = 0;

/// A task failed, an unknown task was requested or the setup failed
pub const ERROR: u8 = 1;

/// Interrupted with Ctrl+C
pub const CANCELLED: u8 = 130;
