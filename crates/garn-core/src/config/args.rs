//! Command line argument model
//!
//! garn keeps a loose, minimist-style view of its arguments: the first
//! positional names the task, `--name value` pairs feed the flag resolver and
//! everything after `--` is passed through untouched.

use std::collections::BTreeMap;

/// Path to the directory holding the build script
pub const BUILDSYSTEM_PATH_ARG: &str = "buildsystem-path";

/// Set on processes spawned by a parent garn invocation
pub const CHILD_GARN_ARG: &str = "child-garn";

/// Forces the metadata artifact to be rebuilt
pub const REFRESH_META_ARG: &str = "refresh-meta";

/// Marks a test invocation
pub const TEST_MODE_ARG: &str = "test-mode";

/// Task that runs when no task name is given
pub const DEFAULT_TASK: &str = "default";

const RESERVED_BOOLEANS: &[&str] = &[CHILD_GARN_ARG, REFRESH_META_ARG, TEST_MODE_ARG];

/// Parsed command line arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    positionals: Vec<String>,
    options: BTreeMap<String, Option<String>>,
    passthrough: Vec<String>,
}

impl CliArgs {
    /// Parse raw arguments (without the program name).
    ///
    /// `booleans` lists option names that never swallow the following token
    /// unless it is a boolean literal.
    pub fn parse<I, S>(args: I, booleans: &[&str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Self::default();
        let mut tokens = args.into_iter().map(Into::into).peekable();

        while let Some(token) = tokens.next() {
            if token == "--" {
                parsed.passthrough.extend(tokens.by_ref());
                break;
            }

            let Some(option) = token.strip_prefix("--") else {
                parsed.positionals.push(token);
                continue;
            };

            if let Some((name, value)) = option.split_once('=') {
                parsed
                    .options
                    .insert(name.to_string(), Some(value.to_string()));
                continue;
            }

            let is_boolean =
                booleans.contains(&option) || RESERVED_BOOLEANS.contains(&option);
            let takes_next = match tokens.peek() {
                Some(next) if next.starts_with("--") => false,
                Some(next) if is_boolean => parse_bool_literal(next).is_some(),
                Some(_) => true,
                None => false,
            };
            let value = if takes_next { tokens.next() } else { None };
            parsed.options.insert(option.to_string(), value);
        }

        parsed
    }

    /// Name of the requested task
    pub fn task_name(&self) -> &str {
        self.positionals
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_TASK)
    }

    /// All positional arguments, task name included
    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }

    /// Arguments after `--`
    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    /// Whether an option was given at all
    pub fn has(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Raw value of an option; `Some(None)` for a bare `--name`
    pub fn option(&self, name: &str) -> Option<Option<&str>> {
        self.options.get(name).map(|v| v.as_deref())
    }

    /// Iterate over all options in name order
    pub fn options(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Whether this process was spawned by another garn
    pub fn is_child(&self) -> bool {
        self.has(CHILD_GARN_ARG)
    }

    /// Whether the metadata artifact must be rebuilt
    pub fn refresh_meta(&self) -> bool {
        self.has(REFRESH_META_ARG)
    }

    /// Whether this is a test invocation
    pub fn test_mode(&self) -> bool {
        self.has(TEST_MODE_ARG)
    }

    /// Value of `--buildsystem-path`
    pub fn buildsystem_path(&self) -> Option<&str> {
        self.option(BUILDSYSTEM_PATH_ARG).flatten()
    }

    /// Insert an option, replacing any previous value
    pub fn set_option(&mut self, name: impl Into<String>, value: Option<String>) {
        self.options.insert(name.into(), value);
    }
}

/// Parse a boolean literal the way flags accept them
pub fn parse_bool_literal(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "t" | "y" => Some(true),
        "false" | "no" | "f" | "n" => Some(false),
        _ => None,
    }
}
