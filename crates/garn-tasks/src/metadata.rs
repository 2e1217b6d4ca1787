//! Metadata artifact
//!
//! Every garn writes `.garn-meta.json` into its build cache: the runnable
//! tasks with their sub-arguments, the flags with their possible values and
//! whatever plugins contribute. Other garn processes (a monorepo root, shell
//! completion) read it instead of loading the build script.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, instrument};

use garn_core::config::REFRESH_META_ARG;
use garn_core::error::ProcessError;
use garn_core::exec::{self, ExecOptions};
use garn_core::monorepo::WorkspacePackage;

use crate::engine::Engine;
use crate::registry::DEFAULT_TASK;
use crate::task::TaskDescriptor;

/// File name of the metadata artifact inside a build cache
pub const META_FILE: &str = ".garn-meta.json";

/// Errors reading or producing metadata
#[derive(Debug, Error)]
pub enum MetaDataError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed meta file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Garn at '{}' does not seem to produce a meta file when executed", .0.display())]
    NotProduced(PathBuf),
}

/// Contents of the metadata artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    /// Runnable task → sub-arguments
    #[serde(default)]
    pub tasks: BTreeMap<String, Vec<String>>,
    /// `--flag` → possible values
    #[serde(default)]
    pub flags: BTreeMap<String, Vec<String>>,
    /// Plugin name → plugin-defined metadata
    #[serde(default)]
    pub plugins: BTreeMap<String, Value>,
}

impl MetaData {
    /// Location of the artifact inside a build cache directory
    pub fn path(build_cache: &Path) -> PathBuf {
        build_cache.join(META_FILE)
    }

    /// Describe everything the engine's registry declares
    pub async fn collect(engine: &Engine) -> Self {
        let registry = engine.registry();

        let tasks = registry
            .tasks()
            .filter(|d| d.full_name() != DEFAULT_TASK && !d.is_internal())
            .map(|d| (d.full_name(), sub_args(d)))
            .collect();

        let flags = engine
            .flags()
            .flags()
            .map(|f| (format!("--{}", f.name), f.possible_values.clone()))
            .collect();

        let mut plugins = BTreeMap::new();
        for plugin in registry.plugins() {
            match plugin.metadata(engine).await {
                Ok(Some(meta)) => {
                    plugins.insert(plugin.name().to_string(), meta);
                }
                Ok(None) => {}
                Err(e) => error!("Failed to collect metadata of plugin '{}': {:#}", plugin.name(), e),
            }
        }

        Self {
            tasks,
            flags,
            plugins,
        }
    }

    /// Whether a runnable task with this name is listed
    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Write the artifact into `build_cache`, creating the directory
    pub fn write(&self, build_cache: &Path) -> Result<PathBuf, MetaDataError> {
        let io = |source| MetaDataError::Io {
            path: build_cache.to_path_buf(),
            source,
        };
        fs::create_dir_all(build_cache).map_err(io)?;

        let path = Self::path(build_cache);
        let json = serde_json::to_string_pretty(self).map_err(|source| MetaDataError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| MetaDataError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "wrote meta file");
        Ok(path)
    }

    /// Read and parse an artifact
    pub fn read(path: &Path) -> Result<Self, MetaDataError> {
        let content = fs::read_to_string(path).map_err(|source| MetaDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| MetaDataError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn sub_args(descriptor: &TaskDescriptor) -> Vec<String> {
    if let Some(args) = &descriptor.sub_args {
        return args.clone();
    }
    let Some(file) = descriptor.sub_args_file.as_ref().filter(|f| f.exists()) else {
        return Vec::new();
    };

    let parsed = fs::read_to_string(file)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));
    match parsed {
        Ok(args) => args,
        Err(e) => {
            error!(
                "Error reading JSON file ({}) for task sub arguments: {}",
                file.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Write this process's artifact if it's missing, or always when `force`.
/// Returns whether it was written.
pub async fn write_meta_data(engine: &Engine, force: bool) -> Result<bool, MetaDataError> {
    let build_cache = engine.workspaces().build_cache_path();
    if !force && MetaData::path(&build_cache).exists() {
        return Ok(false);
    }
    MetaData::collect(engine).await.write(&build_cache)?;
    Ok(true)
}

/// Metadata of another workspace package.
///
/// A cached artifact is used as is; a malformed one is deleted. When none is
/// available the package's garn is run once to produce it.
#[instrument(skip_all, fields(package = %package.name))]
pub async fn load_for_package(
    package: &WorkspacePackage,
    refresh: bool,
) -> Result<MetaData, MetaDataError> {
    let path = MetaData::path(&package.build_cache_path());

    for is_retry in [false, true] {
        if path.exists() && (is_retry || !refresh) {
            match MetaData::read(&path) {
                Ok(meta) => return Ok(meta),
                Err(e) => {
                    debug!("discarding meta file: {}", e);
                    fs::remove_file(&path).map_err(|source| MetaDataError::Io {
                        path: path.clone(),
                        source,
                    })?;
                }
            }
        }
        if is_retry {
            break;
        }

        let mut args = Vec::new();
        if refresh {
            args.push(format!("--{}", REFRESH_META_ARG));
        }
        exec::spawn(
            &package.garn_path.to_string_lossy(),
            &args,
            &ExecOptions::captured().with_cwd(&package.workspace_path),
        )
        .await?;
    }

    Err(MetaDataError::NotProduced(package.garn_path.clone()))
}
