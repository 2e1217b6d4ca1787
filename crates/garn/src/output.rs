//! Output formatting utilities

use console::style;

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Printed once per top-level run when `--asap` is set
pub fn asap_banner() {
    warning(&style(ASAP_WARNING).yellow().to_string());
    println!();
}

const ASAP_WARNING: &str = "You're using asap mode which means that things might break in unexpected \
ways as a sacrifice to get that sweet, sweet speed. If things don't seem to work, try the same \
command without --asap.";
