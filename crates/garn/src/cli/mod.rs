//! CLI definition

use clap::Parser;

/// garn - run the build tasks declared by this project
///
/// The first argument names the task (`default` when omitted). Everything
/// else is handed to the task engine untouched: `--<flag> [value]` options,
/// extra positionals, and arguments after `--`.
#[derive(Debug, Parser)]
#[command(name = "garn")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Task name followed by flags and task arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_everything_after_the_task() {
        let cli = Cli::try_parse_from([
            "garn",
            "pack",
            "--mode",
            "production",
            "--parallel",
            "--",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(
            cli.args,
            vec!["pack", "--mode", "production", "--parallel", "--", "--verbose"]
        );
    }

    #[test]
    fn test_version_is_a_task_flag() {
        let cli = Cli::try_parse_from(["garn", "publish", "--version", "v1.2.3"]).unwrap();
        assert_eq!(cli.args, vec!["publish", "--version", "v1.2.3"]);
    }

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["garn"]).unwrap();
        assert!(cli.args.is_empty());
    }
}
