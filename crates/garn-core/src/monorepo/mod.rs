//! Monorepo support
//!
//! A monorepo root lists its packages in a manifest; every package that
//! carries its own garn launcher is a [`WorkspacePackage`] with an
//! independent task registry.

pub mod discovery;
pub mod manifest;

pub use discovery::{
    expand, garn_executable, WorkspacePackage, Workspaces, BUILDSYSTEM_DIR, BUILD_CACHE_DIR,
};
pub use manifest::{ManifestKind, WorkspaceManifest};
