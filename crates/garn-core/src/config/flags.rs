//! Flag resolution
//!
//! A flag's value comes from, in order of precedence: a value pinned with
//! [`FlagSet::set`], a workspace-scoped CLI argument (`--<workspace>-<name>`),
//! a CLI argument (`--<name>`), a workspace-scoped environment variable, an
//! environment variable, and finally the flag's default. The first resolution
//! is cached for the rest of the process.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::ConfigError;

use super::args::{parse_bool_literal, CliArgs, CHILD_GARN_ARG, REFRESH_META_ARG};

pub const MODE: &str = "mode";
pub const NO_PROMPT: &str = "no-prompt";
pub const LOG_LEVEL: &str = "log-level";
pub const VERSION: &str = "version";
pub const ASAP: &str = "asap";
pub const PARALLEL: &str = "parallel";
pub const TAGGED_WORKSPACES: &str = "tagged-workspaces";

/// Environment variables that indicate a CI server
const CI_ENV_VARS: &[&str] = &["CI", "TEAMCITY_VERSION", "GITHUB_ACTIONS", "TF_BUILD"];

/// Value type of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagType {
    String,
    Number,
    Boolean,
}

/// A resolved flag value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl FlagValue {
    /// Boolean view; strings and numbers are truthy when non-empty/non-zero
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
        }
    }

    /// String view, if this is a string flag
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Async default computation
pub type DefaultFactory = Arc<dyn Fn() -> BoxFuture<'static, Option<FlagValue>> + Send + Sync>;

/// Where a flag's default value comes from
#[derive(Clone, Default)]
pub enum FlagDefault {
    /// No default; resolution fails when nothing else provides a value
    #[default]
    None,
    /// Explicitly undefined; resolution yields no value instead of failing
    Undefined,
    /// A fixed value
    Value(FlagValue),
    /// Computed on first resolution
    Factory(DefaultFactory),
}

impl fmt::Debug for FlagDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Undefined => write!(f, "Undefined"),
            Self::Value(v) => write!(f, "Value({:?})", v),
            Self::Factory(_) => write!(f, "Factory(..)"),
        }
    }
}

/// Declaration of a flag
#[derive(Debug, Clone)]
pub struct Flag {
    /// Flag name as used on the command line, without dashes
    pub name: String,
    /// Value type
    pub flag_type: FlagType,
    /// Default value
    pub default: FlagDefault,
    /// Allowed values (empty means anything goes)
    pub possible_values: Vec<String>,
}

impl Flag {
    /// Create a new flag without a default
    pub fn new(name: impl Into<String>, flag_type: FlagType) -> Self {
        Self {
            name: name.into(),
            flag_type,
            default: FlagDefault::None,
            possible_values: Vec::new(),
        }
    }

    /// Create a string flag
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::String)
    }

    /// Create a number flag
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::Number)
    }

    /// Create a boolean flag defaulting to `false`
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FlagType::Boolean).with_default(false)
    }

    /// Set a fixed default
    pub fn with_default(mut self, value: impl Into<FlagValue>) -> Self {
        self.default = FlagDefault::Value(value.into());
        self
    }

    /// Mark the default as explicitly undefined
    pub fn with_undefined_default(mut self) -> Self {
        self.default = FlagDefault::Undefined;
        self
    }

    /// Compute the default asynchronously on first use
    pub fn with_default_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<FlagValue>> + Send + 'static,
    {
        self.default = FlagDefault::Factory(Arc::new(move || factory().boxed()));
        self
    }

    /// Restrict the accepted values
    pub fn with_possible_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this flag is a boolean
    pub fn is_boolean(&self) -> bool {
        self.flag_type == FlagType::Boolean
    }

    /// Convert a raw string into this flag's type
    pub fn parse_value(&self, raw: &str) -> Result<FlagValue, ConfigError> {
        let value = match self.flag_type {
            FlagType::Boolean => FlagValue::Boolean(parse_bool_literal(raw).unwrap_or(false)),
            FlagType::Number => {
                let normalized = raw.replace(',', ".");
                let cleaned = NUMBER_NOISE.replace(&normalized, "");
                let n = cleaned
                    .parse::<f64>()
                    .map_err(|_| ConfigError::InvalidFlagValue {
                        name: self.name.clone(),
                        value: raw.to_string(),
                        expected: "a number".to_string(),
                    })?;
                FlagValue::Number(n)
            }
            FlagType::String => FlagValue::String(raw.to_string()),
        };

        if !self.possible_values.is_empty() && !self.possible_values.contains(&value.to_string()) {
            return Err(ConfigError::InvalidFlagValue {
                name: self.name.clone(),
                value: raw.to_string(),
                expected: self.possible_values.join(", "),
            });
        }

        Ok(value)
    }

    fn default_value(&self) -> Option<&FlagValue> {
        match &self.default {
            FlagDefault::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Anything that can't be part of a decimal number
static NUMBER_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9.]+").expect("Invalid regex"));

/// Build mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Log verbosity selected with `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Verbose,
    Info,
    Log,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verbose" => Some(Self::Verbose),
            "info" => Some(Self::Info),
            "log" => Some(Self::Log),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Matching `tracing` filter directive
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Verbose => "debug",
            Self::Info => "info",
            Self::Log | Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

struct FlagSlot {
    flag: Flag,
    pinned: Mutex<Option<FlagValue>>,
    resolved: OnceCell<Option<FlagValue>>,
}

/// The set of flags known to this process
pub struct FlagSet {
    slots: BTreeMap<String, FlagSlot>,
    args: CliArgs,
    env: HashMap<String, String>,
    workspace: Option<String>,
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagSet")
            .field("flags", &self.slots.keys().collect::<Vec<_>>())
            .field("workspace", &self.workspace)
            .finish()
    }
}

impl FlagSet {
    /// Create a flag set from declarations, parsed arguments and an
    /// environment snapshot
    pub fn new(
        flags: impl IntoIterator<Item = Flag>,
        args: CliArgs,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut slots = BTreeMap::new();
        for flag in flags {
            if slots.contains_key(&flag.name) {
                return Err(ConfigError::DuplicateFlag(flag.name));
            }
            slots.insert(
                flag.name.clone(),
                FlagSlot {
                    flag,
                    pinned: Mutex::new(None),
                    resolved: OnceCell::new(),
                },
            );
        }
        Ok(Self {
            slots,
            args,
            env,
            workspace: None,
        })
    }

    /// Scope workspace-specific overrides to the given package name
    pub fn with_workspace(mut self, workspace: Option<String>) -> Self {
        self.workspace = workspace;
        self
    }

    /// The built-in flags every garn process understands
    pub fn builtin(env: &HashMap<String, String>) -> Vec<Flag> {
        let on_ci = CI_ENV_VARS.iter().any(|name| env.contains_key(*name));
        vec![
            Flag::string(MODE)
                .with_default("development")
                .with_possible_values(["production", "development"]),
            Flag::new(NO_PROMPT, FlagType::Boolean).with_default(on_ci),
            Flag::string(LOG_LEVEL)
                .with_default("log")
                .with_possible_values(["verbose", "info", "log", "warn", "error"]),
            Flag::string(VERSION).with_undefined_default(),
            Flag::boolean(ASAP),
            Flag::boolean(PARALLEL),
            Flag::boolean(TAGGED_WORKSPACES),
        ]
    }

    /// Parsed command line arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Declarations of all flags
    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.slots.values().map(|slot| &slot.flag)
    }

    /// Resolve a flag
    pub async fn get(&self, name: &str) -> Result<Option<FlagValue>, ConfigError> {
        let slot = self.slot(name)?;

        if let Some(value) = slot
            .pinned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(Some(value));
        }

        let value = slot
            .resolved
            .get_or_try_init(|| self.resolve(&slot.flag))
            .await?;
        Ok(value.clone())
    }

    /// Pin a flag's value for the remainder of the process
    pub fn set(&self, name: &str, value: impl Into<FlagValue>) -> Result<(), ConfigError> {
        let slot = self.slot(name)?;
        let value = value.into();
        debug!(flag = name, value = %value, "pinning flag value");
        *slot.pinned.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }

    async fn resolve(&self, flag: &Flag) -> Result<Option<FlagValue>, ConfigError> {
        let scoped = self
            .workspace
            .as_ref()
            .map(|ws| format!("{}-{}", ws, flag.name));

        let mut value = None;
        let scoped_env = scoped.as_ref().and_then(|name| self.env.get(name));
        if let Some(raw) = scoped_env.or_else(|| self.env.get(&flag.name)) {
            value = Some(flag.parse_value(raw)?);
        } else {
            match &flag.default {
                FlagDefault::Value(v) => value = Some(v.clone()),
                FlagDefault::Factory(factory) => value = factory().await,
                FlagDefault::None | FlagDefault::Undefined => {}
            }
        }

        if let Some(raw) = self.args.option(&flag.name) {
            value = Some(self.arg_value(flag, raw)?);
        }
        if let Some(raw) = scoped.as_deref().and_then(|name| self.args.option(name)) {
            value = Some(self.arg_value(flag, raw)?);
        }

        if value.is_none() && matches!(flag.default, FlagDefault::None) {
            return Err(ConfigError::MissingFlagValue(flag.name.clone()));
        }

        debug!(flag = %flag.name, value = ?value, "resolved flag");
        Ok(value)
    }

    fn arg_value(&self, flag: &Flag, raw: Option<&str>) -> Result<FlagValue, ConfigError> {
        match raw {
            Some(raw) => flag.parse_value(raw),
            None if flag.is_boolean() => Ok(FlagValue::Boolean(true)),
            None => Err(ConfigError::MissingFlagValue(flag.name.clone())),
        }
    }

    fn slot(&self, name: &str) -> Result<&FlagSlot, ConfigError> {
        self.slots
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFlag(name.to_string()))
    }

    async fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .await
            .ok()
            .flatten()
            .map(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Current build mode
    pub async fn mode(&self) -> Result<Mode, ConfigError> {
        let value = self.get(MODE).await?;
        Ok(match value.as_ref().and_then(FlagValue::as_str) {
            Some("production") => Mode::Production,
            _ => Mode::Development,
        })
    }

    /// Pin the build mode
    pub fn set_mode(&self, mode: Mode) -> Result<(), ConfigError> {
        self.set(MODE, mode.as_str())
    }

    /// Whether interactive prompts are disabled
    pub async fn no_prompt(&self) -> bool {
        self.get_bool(NO_PROMPT).await
    }

    /// Selected log level
    pub async fn log_level(&self) -> LogLevel {
        self.get(LOG_LEVEL)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.as_str().and_then(LogLevel::parse))
            .unwrap_or(LogLevel::Log)
    }

    /// Whether speed is preferred over safety
    pub async fn asap(&self) -> bool {
        self.get_bool(ASAP).await
    }

    /// Whether workspace fan-out may run packages concurrently
    pub async fn parallel(&self) -> bool {
        self.get_bool(PARALLEL).await
    }

    /// Whether workspace fan-out is limited to tagged packages
    pub async fn tagged_workspaces(&self) -> bool {
        self.get_bool(TAGGED_WORKSPACES).await
    }

    /// Requested release version, if any
    pub async fn version(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.get(VERSION).await?.map(|v| v.to_string()))
    }

    /// Arguments that forward this process's settings to a child garn
    pub async fn child_args(&self) -> Result<Vec<String>, ConfigError> {
        let mut args = vec![format!("--{}", CHILD_GARN_ARG)];
        if self.args.refresh_meta() {
            args.push(format!("--{}", REFRESH_META_ARG));
        }

        for slot in self.slots.values() {
            let flag = &slot.flag;
            let value = match self.get(&flag.name).await {
                Ok(Some(value)) => value,
                Ok(None) | Err(ConfigError::MissingFlagValue(_)) => continue,
                Err(e) => return Err(e),
            };
            if flag.default_value() == Some(&value) {
                continue;
            }
            args.push(format!("--{}", flag.name));
            if value != FlagValue::Boolean(true) {
                args.push(value.to_string());
            }
        }

        Ok(args)
    }
}
