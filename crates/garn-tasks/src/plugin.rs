//! Plugin trait
//!
//! A plugin claims a pseudo-task name. When the first positional argument
//! matches it, the plugin runs instead of the task engine.

use serde_json::Value;

use crate::engine::Engine;

/// Trait for garn plugins
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Pseudo-task name the plugin answers to
    fn name(&self) -> &str;

    /// Handle an invocation whose first positional is [`Plugin::name`]
    async fn run(&self, engine: &Engine) -> anyhow::Result<()>;

    /// Entry for the `plugins` section of the metadata file
    async fn metadata(&self, engine: &Engine) -> anyhow::Result<Option<Value>> {
        let _ = engine;
        Ok(None)
    }
}
