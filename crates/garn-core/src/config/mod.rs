//! Configuration for garn: command line arguments and flags

pub mod args;
pub mod flags;

use std::collections::HashMap;

pub use args::*;
pub use flags::*;

/// Snapshot of the process environment used for flag resolution
pub fn environment() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Parse raw arguments against the given flags and build a [`FlagSet`]
pub fn load_flags<I, S>(
    raw_args: I,
    extra_flags: Vec<Flag>,
    env: HashMap<String, String>,
    workspace: Option<String>,
) -> Result<FlagSet, crate::error::ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut flags = FlagSet::builtin(&env);
    flags.extend(extra_flags);

    let booleans: Vec<&str> = flags
        .iter()
        .filter(|f| f.is_boolean())
        .map(|f| f.name.as_str())
        .collect();
    let args = CliArgs::parse(raw_args, &booleans);

    Ok(FlagSet::new(flags, args, env)?.with_workspace(workspace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_flags_with_extra_boolean() {
        let flags = load_flags(
            ["--skip-tests", "pack"],
            vec![Flag::boolean("skip-tests")],
            HashMap::new(),
            None,
        )
        .unwrap();
        assert_eq!(flags.args().task_name(), "pack");
        assert_eq!(
            flags.get("skip-tests").await.unwrap(),
            Some(FlagValue::Boolean(true))
        );
    }

    #[test]
    fn test_load_flags_rejects_duplicates() {
        let result = load_flags(
            Vec::<String>::new(),
            vec![Flag::boolean("asap")],
            HashMap::new(),
            None,
        );
        assert!(result.is_err());
    }
}
