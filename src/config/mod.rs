//! Project configuration.
//!
//! depforge runs inside a checkout of the package tree. Tunables live in an
//! optional `depforge.toml` at the tree root; anything not set there falls
//! back to defaults that match the production tree layout. Credentials are
//! never stored in the file - they come from the environment
//! (`DEPFORGE_ARTIFACTORY_USER` / `DEPFORGE_ARTIFACTORY_TOKEN`).
//!
//! The tree root is discovered by walking up from the current directory
//! until a directory containing `packages/` (or an explicit `depforge.toml`)
//! is found, the same way cargo finds its manifest.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::DepforgeError;

/// Environment variable naming the artifact store user.
pub const ENV_ARTIFACTORY_USER: &str = "DEPFORGE_ARTIFACTORY_USER";
/// Environment variable naming the artifact store token.
pub const ENV_ARTIFACTORY_TOKEN: &str = "DEPFORGE_ARTIFACTORY_TOKEN";
/// Environment variable overriding the conan binary location.
pub const ENV_CONAN_PATH: &str = "DEPFORGE_CONAN_PATH";

/// Settings parsed from `depforge.toml`, all optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Artifact store connection and remote repository list.
    #[serde(default)]
    pub artifactory: ArtifactorySettings,
    /// Recipe layout and parsing settings.
    #[serde(default)]
    pub recipes: RecipeSettings,
    /// Worker-pool sizes for the parallel stages.
    #[serde(default)]
    pub workers: WorkerSettings,
    /// Profile name to build-variant list, used by `build --variant auto`.
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<String>>,
}

/// Artifact store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactorySettings {
    /// Base URL of the artifact store.
    #[serde(default = "default_artifactory_url")]
    pub url: String,
    /// Namespace segment in storage paths (`storage/{remote}/{namespace}/..`).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Remote repositories queried when computing next revisions.
    #[serde(default = "default_remotes")]
    pub remotes: Vec<String>,
}

/// Recipe tree layout settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeSettings {
    /// Directory of package recipes, relative to the tree root.
    #[serde(default = "default_packages_dir")]
    pub packages_dir: String,
    /// Directory of variant recipes, relative to the tree root.
    #[serde(default = "default_variants_dir")]
    pub variants_dir: String,
    /// Base class that marks the declaring class inside a recipe.
    #[serde(default = "default_base_class")]
    pub base_class: String,
    /// Conan user/channel suffix used when exporting and uploading.
    #[serde(default = "default_user_channel")]
    pub user_channel: String,
}

/// Worker-pool sizes.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    /// Concurrent subprocesses for export/remove pools.
    #[serde(default = "default_subprocess_workers")]
    pub subprocess: usize,
    /// Concurrent in-flight remote revision queries.
    #[serde(default = "default_remote_workers")]
    pub remote: usize,
}

fn default_artifactory_url() -> String {
    "https://artifactory.example.com/artifactory".to_string()
}
fn default_namespace() -> String {
    "plex".to_string()
}
fn default_remotes() -> Vec<String> {
    vec![
        "conan-experimental".to_string(),
        "conan-stable".to_string(),
        "conan-test".to_string(),
    ]
}
fn default_packages_dir() -> String {
    "packages".to_string()
}
fn default_variants_dir() -> String {
    "variants".to_string()
}
fn default_base_class() -> String {
    "PlexConanFile".to_string()
}
fn default_user_channel() -> String {
    "plex/stable".to_string()
}
fn default_subprocess_workers() -> usize {
    6
}
fn default_remote_workers() -> usize {
    8
}

impl Default for ArtifactorySettings {
    fn default() -> Self {
        Self {
            url: default_artifactory_url(),
            namespace: default_namespace(),
            remotes: default_remotes(),
        }
    }
}

impl Default for RecipeSettings {
    fn default() -> Self {
        Self {
            packages_dir: default_packages_dir(),
            variants_dir: default_variants_dir(),
            base_class: default_base_class(),
            user_channel: default_user_channel(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            subprocess: default_subprocess_workers(),
            remote: default_remote_workers(),
        }
    }
}

/// Artifact store credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    /// Read credentials from the environment, failing with a hint when
    /// they are missing.
    pub fn from_env() -> Result<Self> {
        let user = std::env::var(ENV_ARTIFACTORY_USER).ok().filter(|v| !v.is_empty());
        let token = std::env::var(ENV_ARTIFACTORY_TOKEN).ok().filter(|v| !v.is_empty());
        match (user, token) {
            (Some(user), Some(token)) => Ok(Self { user, token }),
            _ => Err(DepforgeError::MissingCredentials.into()),
        }
    }
}

/// Resolved configuration: the tree root plus parsed settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the package tree checkout.
    pub root: PathBuf,
    /// Parsed settings (defaults where `depforge.toml` is absent).
    pub settings: Settings,
}

impl Config {
    /// Name of the optional settings file at the tree root.
    pub const SETTINGS_FILE: &'static str = "depforge.toml";

    /// Discover the package tree root and load settings.
    ///
    /// With `root_override` set, that directory is used as-is. Otherwise the
    /// search walks up from the current directory looking for a
    /// `depforge.toml` or a `packages/` directory.
    pub fn discover(root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(root) => root,
            None => {
                let cwd = std::env::current_dir().context("failed to read current directory")?;
                Self::find_root(&cwd).ok_or_else(|| DepforgeError::ConfigError {
                    message: format!(
                        "no package tree found at or above {} (expected a packages/ \
                         directory or a {})",
                        cwd.display(),
                        Self::SETTINGS_FILE
                    ),
                })?
            }
        };
        let settings = Self::load_settings(&root)?;
        Ok(Self { root, settings })
    }

    /// Build a config for an explicit root, loading `depforge.toml` when
    /// present.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let settings = Self::load_settings(&root)?;
        Ok(Self { root, settings })
    }

    fn load_settings(root: &Path) -> Result<Settings> {
        let path = root.join(Self::SETTINGS_FILE);
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = toml::from_str(&content).map_err(|e| DepforgeError::ConfigError {
            message: format!("invalid {}: {e}", path.display()),
        })?;
        Ok(settings)
    }

    fn find_root(start: &Path) -> Option<PathBuf> {
        let mut dir = start;
        loop {
            if dir.join(Self::SETTINGS_FILE).exists() || dir.join("packages").is_dir() {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }

    /// Absolute path of the packages directory.
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(&self.settings.recipes.packages_dir)
    }

    /// Absolute path of the variants directory.
    pub fn variants_dir(&self) -> PathBuf {
        self.root.join(&self.settings.recipes.variants_dir)
    }

    /// Variants configured for a profile, for `build --variant auto`.
    pub fn variants_for_profile(&self, profile: &str) -> Result<&[String]> {
        self.settings.profiles.get(profile).map(Vec::as_slice).ok_or_else(|| {
            DepforgeError::ConfigError {
                message: format!(
                    "profile '{profile}' is not in the [profiles] table (known: {})",
                    self.settings
                        .profiles
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_settings_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.settings.recipes.base_class, "PlexConanFile");
        assert_eq!(config.settings.workers.subprocess, 6);
        assert_eq!(config.settings.workers.remote, 8);
        assert_eq!(config.settings.artifactory.remotes.len(), 3);
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("depforge.toml"),
            r#"
[artifactory]
url = "https://store.internal"
remotes = ["conan-stable"]

[workers]
remote = 2

[profiles]
macos = ["desktop-x86_64", "desktop-arm64"]
"#,
        )
        .unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.settings.artifactory.url, "https://store.internal");
        assert_eq!(config.settings.artifactory.remotes, vec!["conan-stable"]);
        assert_eq!(config.settings.workers.remote, 2);
        // untouched sections keep defaults
        assert_eq!(config.settings.workers.subprocess, 6);
        assert_eq!(config.variants_for_profile("macos").unwrap().len(), 2);
    }

    #[test]
    fn unknown_profile_lists_known_ones() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("depforge.toml"), "[profiles]\nlinux = [\"ci\"]\n")
            .unwrap();
        let config = Config::load(tmp.path()).unwrap();
        let err = config.variants_for_profile("windows").unwrap_err().to_string();
        assert!(err.contains("windows"));
        assert!(err.contains("linux"));
    }

    #[test]
    fn find_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("packages/zlib")).unwrap();
        let nested = tmp.path().join("packages/zlib");
        let found = Config::find_root(&nested).unwrap();
        assert_eq!(found, tmp.path());
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("depforge.toml"), "not valid toml [").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
