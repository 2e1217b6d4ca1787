//! Version tags
//!
//! Releases are tagged either `vX.Y.Z` (every package) or `<package>@X.Y.Z`
//! (one package of a monorepo), optionally with a pre-release suffix.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::error::{ConfigError, GarnError, Result};
use crate::exec::{self, ExecOptions};

static PACKAGE_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+@[0-9]+\.[0-9]+\.[0-9]+(-[a-zA-Z0-9.]+)?$").expect("Invalid regex")
});

static PLAIN_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v[0-9]+\.[0-9]+\.[0-9]+(-[a-zA-Z0-9.]+)?$").expect("Invalid regex")
});

static PRERELEASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z]+)\.?([0-9]+)$").expect("Invalid regex")
});

/// A parsed version tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    /// Package the tag applies to; `None` for `vX.Y.Z` tags
    pub package_name: Option<String>,
    /// Semantic version
    pub version: Version,
}

/// Pre-release part of a version, e.g. `rc` and `3` in `1.0.0-rc.3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerelease {
    pub tag: String,
    pub number: u64,
}

/// Whether `s` looks like a version tag
pub fn is_version_tag(s: &str) -> bool {
    PACKAGE_TAG_REGEX.is_match(s) || PLAIN_TAG_REGEX.is_match(s)
}

impl VersionTag {
    /// Parse a `vX.Y.Z` or `<package>@X.Y.Z` tag
    pub fn parse(tag: &str) -> std::result::Result<Self, ConfigError> {
        if !is_version_tag(tag) {
            return Err(ConfigError::InvalidVersionTag(tag.to_string()));
        }

        let (package_name, raw) = match tag.rsplit_once('@') {
            Some((package, version)) => (Some(package.to_string()), version),
            None => (None, tag.trim_start_matches('v')),
        };
        let version =
            Version::parse(raw).map_err(|_| ConfigError::InvalidVersionTag(tag.to_string()))?;

        Ok(Self {
            package_name,
            version,
        })
    }

    /// Pre-release tag and number, if any
    pub fn prerelease(&self) -> Option<Prerelease> {
        let captures = PRERELEASE_REGEX.captures(self.version.pre.as_str())?;
        Some(Prerelease {
            tag: captures[1].to_string(),
            number: captures[2].parse().ok()?,
        })
    }

    /// Whether this tag applies to the named package
    pub fn applies_to(&self, package: &str) -> bool {
        self.package_name.as_deref().map_or(true, |p| p == package)
    }

    /// Resolve a `--version` value against the current package: a plain
    /// `vX.Y.Z` is taken to mean the current package, a package tag must name
    /// it
    pub fn for_package(
        raw: &str,
        current_package: Option<&str>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut tag = Self::parse(raw)?;
        if let Some(named) = tag.package_name.as_deref() {
            if Some(named) != current_package {
                return Err(ConfigError::VersionPackageMismatch {
                    version: raw.to_string(),
                    current: current_package.unwrap_or("(none)").to_string(),
                });
            }
        } else {
            tag.package_name = current_package.map(String::from);
        }
        Ok(tag)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package_name {
            Some(package) => write!(f, "{}@{}", package, self.version),
            None => write!(f, "v{}", self.version),
        }
    }
}

/// Tags pointing at `name` (usually `HEAD`)
pub async fn tags_at(name: &str, cwd: Option<&Path>) -> Result<Vec<String>> {
    let mut options = ExecOptions::captured();
    if let Some(cwd) = cwd {
        options = options.with_cwd(cwd);
    }
    let output = exec::spawn("git", &["tag", "--points-at", name], &options)
        .await
        .map_err(GarnError::from)?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Version tags at `HEAD`
pub async fn version_tags_at_head(cwd: Option<&Path>) -> Result<Vec<VersionTag>> {
    Ok(tags_at("HEAD", cwd)
        .await?
        .iter()
        .filter_map(|tag| VersionTag::parse(tag).ok())
        .collect())
}
