//! Workspace manifests
//!
//! A project declares its workspace packages in one of:
//! - `package.json` `workspaces` (a list, or `{ "packages": [...] }`)
//! - `pnpm-workspace.yaml` `packages`
//! - `garn.toml` `[workspace] members`

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::WorkspaceError;

/// Kind of manifest the patterns were read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    PackageJson,
    Pnpm,
    GarnToml,
}

impl ManifestKind {
    /// File name of this manifest
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::PackageJson => "package.json",
            Self::Pnpm => "pnpm-workspace.yaml",
            Self::GarnToml => "garn.toml",
        }
    }

    const ALL: [ManifestKind; 3] = [Self::PackageJson, Self::Pnpm, Self::GarnToml];
}

/// Workspace patterns declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceManifest {
    /// Path of the manifest file
    pub path: PathBuf,
    /// Manifest kind
    pub kind: ManifestKind,
    /// Glob patterns relative to the manifest's directory
    pub patterns: Vec<String>,
}

#[derive(Deserialize)]
struct PackageJson {
    workspaces: Option<PackageJsonWorkspaces>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PackageJsonWorkspaces {
    List(Vec<String>),
    Object { packages: Vec<String> },
}

#[derive(Deserialize)]
struct PnpmWorkspace {
    packages: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GarnToml {
    workspace: Option<GarnTomlWorkspace>,
}

#[derive(Deserialize)]
struct GarnTomlWorkspace {
    #[serde(default)]
    members: Vec<String>,
}

impl WorkspaceManifest {
    /// Read the first manifest in `dir` that declares workspaces.
    ///
    /// Returns `Ok(None)` when no manifest exists or none declares any.
    pub fn read(dir: &Path) -> Result<Option<Self>, WorkspaceError> {
        for kind in ManifestKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            if let Some(patterns) = parse(kind, &content).map_err(|reason| {
                WorkspaceError::ManifestParse {
                    path: path.clone(),
                    reason,
                }
            })? {
                debug!(path = %path.display(), patterns = patterns.len(), "found workspace manifest");
                return Ok(Some(Self {
                    path,
                    kind,
                    patterns,
                }));
            }
        }
        Ok(None)
    }

    /// Directory the patterns are relative to
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

fn parse(kind: ManifestKind, content: &str) -> Result<Option<Vec<String>>, String> {
    match kind {
        ManifestKind::PackageJson => {
            let manifest: PackageJson =
                serde_json::from_str(content).map_err(|e| e.to_string())?;
            Ok(manifest.workspaces.map(|w| match w {
                PackageJsonWorkspaces::List(patterns) => patterns,
                PackageJsonWorkspaces::Object { packages } => packages,
            }))
        }
        ManifestKind::Pnpm => {
            let manifest: PnpmWorkspace =
                serde_yaml::from_str(content).map_err(|e| e.to_string())?;
            Ok(manifest.packages)
        }
        ManifestKind::GarnToml => {
            let manifest: GarnToml = toml::from_str(content).map_err(|e| e.to_string())?;
            Ok(manifest.workspace.map(|w| w.members))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_package_json_list() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*", "tools/cli"]}"#,
        )
        .unwrap();

        let manifest = WorkspaceManifest::read(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.kind, ManifestKind::PackageJson);
        assert_eq!(manifest.patterns, vec!["packages/*", "tools/cli"]);
        assert_eq!(manifest.root(), dir.path());
    }

    #[test]
    fn test_package_json_object() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"workspaces": {"packages": ["apps/*"], "nohoist": []}}"#,
        )
        .unwrap();

        let manifest = WorkspaceManifest::read(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.patterns, vec!["apps/*"]);
    }

    #[test]
    fn test_package_json_without_workspaces_falls_through() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "single"}"#).unwrap();
        fs::write(
            dir.path().join("garn.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n",
        )
        .unwrap();

        let manifest = WorkspaceManifest::read(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.kind, ManifestKind::GarnToml);
        assert_eq!(manifest.patterns, vec!["crates/*"]);
    }

    #[test]
    fn test_pnpm() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pnpm-workspace.yaml"),
            "packages:\n  - 'packages/*'\n",
        )
        .unwrap();

        let manifest = WorkspaceManifest::read(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.kind, ManifestKind::Pnpm);
        assert_eq!(manifest.patterns, vec!["packages/*"]);
    }

    #[test]
    fn test_no_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(WorkspaceManifest::read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{ not json").unwrap();
        let err = WorkspaceManifest::read(dir.path()).unwrap_err();
        assert!(matches!(err, WorkspaceError::ManifestParse { .. }));
    }
}
