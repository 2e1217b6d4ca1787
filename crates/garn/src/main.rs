//! Garn - run tasks without a project build script
//!
//! Only the built-in `default` task and the `workspace` plugin are
//! available, which is enough to list and drive the packages of a monorepo.

use std::process::ExitCode;

fn main() -> ExitCode {
    garn::main(garn::Registry::new())
}
