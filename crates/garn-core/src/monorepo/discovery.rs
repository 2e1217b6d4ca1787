//! Workspace package discovery

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use glob::glob;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::WorkspaceError;

use super::manifest::WorkspaceManifest;

/// Directory inside a package that holds its build script
pub const BUILDSYSTEM_DIR: &str = "buildsystem";

/// Cache directory inside the buildsystem directory
pub const BUILD_CACHE_DIR: &str = ".buildcache";

/// File name of the garn launcher inside a package
pub fn garn_executable() -> &'static str {
    if cfg!(windows) {
        "garn.cmd"
    } else {
        "garn"
    }
}

/// A sibling package of a monorepo with its own garn installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspacePackage {
    /// Package name (the package directory's name)
    pub name: String,
    /// Path to the package's garn launcher
    pub garn_path: PathBuf,
    /// Package directory
    pub workspace_path: PathBuf,
}

impl WorkspacePackage {
    /// Build a package from the path of its garn launcher
    pub fn from_garn_path(garn_path: PathBuf) -> Option<Self> {
        let workspace_path = garn_path.parent()?.to_path_buf();
        let name = workspace_path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name,
            garn_path,
            workspace_path,
        })
    }

    /// The package's buildsystem directory
    pub fn buildsystem_path(&self) -> PathBuf {
        self.workspace_path.join(BUILDSYSTEM_DIR)
    }

    /// The package's build cache directory
    pub fn build_cache_path(&self) -> PathBuf {
        self.buildsystem_path().join(BUILD_CACHE_DIR)
    }
}

/// Expand a manifest's patterns into the packages that carry a garn launcher
pub fn expand(manifest: &WorkspaceManifest) -> Result<Vec<WorkspacePackage>, WorkspaceError> {
    let root = manifest.root();
    let mut packages = Vec::new();

    for pattern in &manifest.patterns {
        let full_pattern = root
            .join(pattern.trim_end_matches('/'))
            .join(garn_executable())
            .to_string_lossy()
            .to_string();

        let entries = glob(&full_pattern).map_err(|e| WorkspaceError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "skipping unreadable workspace path");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Some(package) = WorkspacePackage::from_garn_path(path) {
                if !packages.iter().any(|p: &WorkspacePackage| p.name == package.name) {
                    packages.push(package);
                }
            }
        }
    }

    debug!(
        manifest = %manifest.path.display(),
        count = packages.len(),
        "discovered workspace packages"
    );
    Ok(packages)
}

/// Workspace discovery for one garn invocation
#[derive(Debug)]
pub struct Workspaces {
    buildsystem_path: PathBuf,
    current: OnceLock<Option<WorkspacePackage>>,
}

impl Workspaces {
    /// Create discovery rooted at a buildsystem directory
    pub fn new(buildsystem_path: impl Into<PathBuf>) -> Self {
        Self {
            buildsystem_path: buildsystem_path.into(),
            current: OnceLock::new(),
        }
    }

    /// The buildsystem directory of this invocation
    pub fn buildsystem_path(&self) -> &Path {
        &self.buildsystem_path
    }

    /// The project directory (parent of the buildsystem directory)
    pub fn project_path(&self) -> &Path {
        self.buildsystem_path.parent().unwrap_or(Path::new("."))
    }

    /// The build cache directory of this invocation
    pub fn build_cache_path(&self) -> PathBuf {
        self.buildsystem_path.join(BUILD_CACHE_DIR)
    }

    /// Packages declared by the project's own manifest, or `None` when the
    /// project isn't a monorepo root
    pub fn list(&self) -> Result<Option<Vec<WorkspacePackage>>, WorkspaceError> {
        match WorkspaceManifest::read(self.project_path())? {
            Some(manifest) => Ok(Some(expand(&manifest)?)),
            None => Ok(None),
        }
    }

    /// Look up a package of this project by name
    pub fn find(&self, name: &str) -> Result<Option<WorkspacePackage>, WorkspaceError> {
        Ok(self
            .list()?
            .and_then(|packages| packages.into_iter().find(|p| p.name == name)))
    }

    /// The workspace package this invocation belongs to, if any.
    ///
    /// Walks upward from the project directory to the nearest manifest that
    /// declares workspaces. The answer is computed once per process.
    pub fn current(&self) -> Option<&WorkspacePackage> {
        self.current
            .get_or_init(|| self.find_current())
            .as_ref()
    }

    fn find_current(&self) -> Option<WorkspacePackage> {
        let project = normalize(self.project_path());
        let mut dir = Some(project.as_path());

        while let Some(current) = dir {
            match WorkspaceManifest::read(current) {
                Ok(Some(manifest)) => {
                    let packages = match expand(&manifest) {
                        Ok(packages) => packages,
                        Err(e) => {
                            warn!(error = %e, "failed to expand workspace manifest");
                            return None;
                        }
                    };
                    return packages
                        .into_iter()
                        .find(|p| project.starts_with(normalize(&p.workspace_path)));
                }
                Ok(None) => {}
                Err(e) => debug!(dir = %current.display(), error = %e, "ignoring manifest"),
            }
            dir = current.parent();
        }

        None
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn add_package(root: &Path, rel: &str, with_garn: bool) {
        let dir = root.join(rel);
        fs::create_dir_all(dir.join(BUILDSYSTEM_DIR)).unwrap();
        if with_garn {
            fs::write(dir.join(garn_executable()), "#!/bin/sh\n").unwrap();
        }
    }

    fn monorepo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join(BUILDSYSTEM_DIR)).unwrap();
        add_package(dir.path(), "packages/api", true);
        add_package(dir.path(), "packages/web", true);
        add_package(dir.path(), "packages/docs", false);
        dir
    }

    #[test]
    fn test_list_keeps_packages_with_garn() {
        let dir = monorepo();
        let workspaces = Workspaces::new(dir.path().join(BUILDSYSTEM_DIR));

        let packages = workspaces.list().unwrap().unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(
            packages[0].garn_path,
            dir.path().join("packages/api").join(garn_executable())
        );
        assert_eq!(
            packages[0].build_cache_path(),
            dir.path().join("packages/api/buildsystem/.buildcache")
        );
    }

    #[test]
    fn test_list_without_manifest() {
        let dir = TempDir::new().unwrap();
        let workspaces = Workspaces::new(dir.path().join(BUILDSYSTEM_DIR));
        assert!(workspaces.list().unwrap().is_none());
        assert!(workspaces.current().is_none());
    }

    #[test]
    fn test_current_from_package() {
        let dir = monorepo();
        let workspaces = Workspaces::new(dir.path().join("packages/web").join(BUILDSYSTEM_DIR));

        let current = workspaces.current().unwrap();
        assert_eq!(current.name, "web");
        // The package's own manifest-less directory has no sub-packages
        assert!(workspaces.list().unwrap().is_none());
    }

    #[test]
    fn test_current_at_root_is_none() {
        let dir = monorepo();
        let workspaces = Workspaces::new(dir.path().join(BUILDSYSTEM_DIR));
        assert!(workspaces.current().is_none());
    }

    #[test]
    fn test_current_is_memoized() {
        let dir = monorepo();
        let workspaces = Workspaces::new(dir.path().join("packages/api").join(BUILDSYSTEM_DIR));
        assert_eq!(workspaces.current().map(|p| p.name.clone()), Some("api".into()));

        fs::remove_file(dir.path().join("package.json")).unwrap();
        assert_eq!(workspaces.current().map(|p| p.name.clone()), Some("api".into()));
    }

    #[test]
    fn test_find() {
        let dir = monorepo();
        let workspaces = Workspaces::new(dir.path().join(BUILDSYSTEM_DIR));
        assert!(workspaces.find("api").unwrap().is_some());
        assert!(workspaces.find("docs").unwrap().is_none());
    }
}
