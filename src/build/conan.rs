//! Subprocess plumbing for the conan binary and parsers for its outputs.
//!
//! [`ConanRunner`] wraps the conan operations the orchestrator sequences:
//! export, install, test, remove, upload, and build-order queries. The
//! binary is resolved from `DEPFORGE_CONAN_PATH` or the PATH. Per-package
//! operations report failure as `Ok(false)` so a batch can keep going;
//! only a failed `install` (the variant build itself) is a hard error.
//!
//! Three conan outputs are parsed here: the `--json` install report
//! (installed/built/failed recipes), the `conaninfo.txt` options and
//! requirement sections, and the bracketed build-order listing from
//! `conan info -bo`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{Config, ENV_CONAN_PATH};
use crate::core::DepforgeError;

/// One recipe from the install report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStatus {
    /// Reference without the user/channel suffix (`zlib/1.2.8-3`).
    pub reference: String,
    /// Whether any binary package was built (as opposed to downloaded).
    pub built: bool,
    /// Binary package ids produced for this recipe.
    pub package_ids: Vec<String>,
}

impl PackageStatus {
    /// The package name (text before `/`).
    pub fn name(&self) -> &str {
        self.reference.split('/').next().unwrap_or(&self.reference)
    }
}

/// The install report split by outcome.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<PackageStatus>,
    pub built: Vec<PackageStatus>,
    pub failed: Vec<PackageStatus>,
}

#[derive(Debug, Deserialize)]
struct BuildInfoFile {
    #[serde(default)]
    installed: Vec<InstalledEntry>,
}

#[derive(Debug, Deserialize)]
struct InstalledEntry {
    recipe: RecipeEntry,
    #[serde(default)]
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
struct RecipeEntry {
    id: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    built: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Parse the `--json` report written by `conan install`.
pub fn parse_install_report(json: &str) -> Result<InstallReport> {
    let file: BuildInfoFile =
        serde_json::from_str(json).context("malformed conan install report")?;

    let mut report = InstallReport::default();
    for entry in file.installed {
        let failed = entry.recipe.error.is_some()
            || entry.packages.iter().any(|pkg| pkg.error.is_some());
        let status = PackageStatus {
            reference: entry.recipe.id.split('@').next().unwrap_or("").to_string(),
            built: entry.packages.iter().any(|pkg| pkg.built),
            package_ids: entry.packages.iter().filter_map(|pkg| pkg.id.clone()).collect(),
        };
        if failed {
            report.failed.push(status);
        } else if status.built {
            report.built.push(status);
        } else {
            report.installed.push(status);
        }
    }
    Ok(report)
}

/// Options and testable packages from a `conaninfo.txt`.
#[derive(Debug, Default)]
pub struct InstalledOptions {
    /// `[full_options]`: package name to option name to value.
    pub options: BTreeMap<String, BTreeMap<String, String>>,
    /// Names from `[full_requires]` carrying our user/channel. Packages
    /// outside this set are private requirements whose options we cannot
    /// reconstruct, so they cannot be tested.
    pub testable: BTreeSet<String>,
}

impl InstalledOptions {
    /// Render the options as `-opkg:opt=value` conan arguments.
    pub fn as_args(&self) -> Vec<String> {
        self.options
            .iter()
            .flat_map(|(pkg, opts)| {
                opts.iter().map(move |(option, value)| format!("-o{pkg}:{option}={value}"))
            })
            .collect()
    }
}

/// Parse the `[full_options]` and `[full_requires]` sections of a
/// `conaninfo.txt`.
pub fn parse_conaninfo(content: &str, user_channel: &str) -> InstalledOptions {
    let channel_marker = format!("@{user_channel}");
    let mut parsed = InstalledOptions::default();
    let mut section = "";

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            section = line;
            continue;
        }
        if line.is_empty() {
            continue;
        }
        match section {
            "[full_options]" => {
                if let Some((key, value)) = line.split_once('=')
                    && let Some((pkg, option)) = key.split_once(':')
                {
                    parsed
                        .options
                        .entry(pkg.to_string())
                        .or_default()
                        .insert(option.to_string(), value.to_string());
                }
            }
            "[full_requires]" => {
                if line.contains(&channel_marker)
                    && let Some(name) = line.split('/').next()
                {
                    parsed.testable.insert(name.to_string());
                }
            }
            _ => {}
        }
    }
    parsed
}

/// Parse the bracketed build-order listing from `conan info -bo`:
/// `[a/1.0-0@plex/stable, b/2.0-1@plex/stable], [c/3.0-0@plex/stable]`.
pub fn parse_build_order(output: &str) -> Vec<Vec<String>> {
    let mut order = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with('[') {
            continue;
        }
        for group in line.split('[').filter(|chunk| !chunk.is_empty()) {
            let Some(end) = group.find(']') else {
                continue;
            };
            let refs: Vec<String> = group[..end]
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            if !refs.is_empty() {
                order.push(refs);
            }
        }
    }
    order
}

/// Typed operations over the conan binary.
#[derive(Debug, Clone)]
pub struct ConanRunner {
    root: PathBuf,
    profile: Option<String>,
    user_channel: String,
    quiet: bool,
}

impl ConanRunner {
    pub fn new(config: &Config, profile: Option<String>, quiet: bool) -> Self {
        Self {
            root: config.root.clone(),
            profile,
            user_channel: config.settings.recipes.user_channel.clone(),
            quiet,
        }
    }

    /// Path to the report file written by [`ConanRunner::install`].
    pub fn buildinfo_path(&self) -> PathBuf {
        self.root.join("buildinfo.json")
    }

    /// Path to the `conaninfo.txt` an install drops in the tree root.
    pub fn conaninfo_path(&self) -> PathBuf {
        self.root.join("conaninfo.txt")
    }

    pub fn user_channel(&self) -> &str {
        &self.user_channel
    }

    fn binary() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONAN_PATH)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        which::which("conan").map_err(|_| DepforgeError::ConanNotFound.into())
    }

    /// Environment every conan invocation runs with: a stable user home,
    /// the recipe linter off, and the user/channel split out for recipes
    /// that read them.
    fn environment(&self) -> Vec<(&'static str, String)> {
        let home = std::env::var("CONAN_USER_HOME").unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .display()
                .to_string()
        });
        let (user, channel) =
            self.user_channel.split_once('/').unwrap_or(("plex", "stable"));
        vec![
            ("CONAN_USER_HOME", home),
            ("CONAN_RECIPE_LINTER", "False".to_string()),
            ("CONAN_USERNAME", user.to_string()),
            ("CONAN_CHANNEL", channel.to_string()),
        ]
    }

    fn profile_args(&self) -> Vec<String> {
        match &self.profile {
            Some(profile) => {
                // named profiles live under profiles/ in the tree; anything
                // else is passed through for conan's own lookup
                let tree_profile = self.root.join("profiles").join(profile);
                let value = if tree_profile.exists() {
                    tree_profile.display().to_string()
                } else {
                    profile.clone()
                };
                vec!["--profile".to_string(), value]
            }
            None => Vec::new(),
        }
    }

    /// Run one conan subcommand, capturing output. `Ok(false)` is a
    /// non-zero exit; `Err` means conan could not be executed at all.
    async fn run(&self, operation: &str, args: &[String]) -> Result<(bool, String)> {
        let binary = Self::binary()?;
        tracing::debug!(target: "conan", "conan {operation} {}", args.join(" "));

        let mut cmd = Command::new(&binary);
        cmd.arg(operation)
            .args(args)
            .envs(self.environment())
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to execute conan {operation}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if self.quiet {
                tracing::debug!(target: "conan", "conan {operation} failed: {stderr}");
            } else {
                eprintln!("{stderr}");
            }
        }
        Ok((output.status.success(), stdout))
    }

    /// `conan export <dir> <user/channel>` for one package directory.
    pub async fn export_package(&self, package_dir: &Path) -> Result<bool> {
        let args = vec![
            package_dir.display().to_string(),
            self.user_channel.clone(),
        ];
        Ok(self.run("export", &args).await?.0)
    }

    /// `conan install <variant dir> --build=<policy> --json <report>`,
    /// parsed into an [`InstallReport`]. A non-zero install is a hard
    /// error: there is nothing meaningful to sequence after it.
    pub async fn install(
        &self,
        variant_dir: &Path,
        build_policy: &str,
        update: bool,
    ) -> Result<InstallReport> {
        let mut args = vec![
            variant_dir.display().to_string(),
            format!("--build={build_policy}"),
            "--json".to_string(),
            self.buildinfo_path().display().to_string(),
        ];
        if update {
            args.push("--update".to_string());
        }
        args.extend(self.profile_args());

        let (ok, _) = self.run("install", &args).await?;
        if !ok {
            return Err(DepforgeError::ConanCommandError {
                operation: "install".to_string(),
                stderr: format!("install of {} returned non-zero", variant_dir.display()),
            }
            .into());
        }

        let json = std::fs::read_to_string(self.buildinfo_path())
            .with_context(|| format!("failed to read {}", self.buildinfo_path().display()))?;
        parse_install_report(&json)
    }

    /// `conan test <test_package dir> <ref> --build=<policy> [options...]`.
    /// A missing `test_package` directory counts as a failure.
    pub async fn test_package(
        &self,
        reference: &str,
        build_policy: &str,
        options: &[String],
    ) -> Result<bool> {
        let name = reference.split('/').next().unwrap_or(reference);
        let test_dir = self.root.join("packages").join(name).join("test_package");
        if !test_dir.is_dir() {
            tracing::warn!("{name}: missing test_package directory ({})", test_dir.display());
            return Ok(false);
        }

        let mut args = vec![
            test_dir.display().to_string(),
            self.qualified(reference),
            format!("--build={build_policy}"),
        ];
        args.extend(options.iter().cloned());
        args.extend(self.profile_args());
        Ok(self.run("test", &args).await?.0)
    }

    /// `conan remove -f -b -s <ref>`: drop build folders and sources from
    /// the local cache, keeping binaries.
    pub async fn remove_package(&self, reference: &str) -> Result<bool> {
        let args = vec![
            "-f".to_string(),
            "-b".to_string(),
            "-s".to_string(),
            self.qualified(reference),
        ];
        Ok(self.run("remove", &args).await?.0)
    }

    /// `conan upload <ref> -r <remote> [--all | -p <id>] --confirm`.
    pub async fn upload_package(
        &self,
        reference: &str,
        remote: &str,
        binaries: bool,
        package_id: Option<&str>,
    ) -> Result<bool> {
        let mut args = vec![
            self.qualified(reference),
            "-r".to_string(),
            remote.to_string(),
            "--confirm".to_string(),
        ];
        match package_id {
            Some(id) => {
                args.push("-p".to_string());
                args.push(id.to_string());
            }
            None if binaries => args.push("--all".to_string()),
            None => {}
        }
        Ok(self.run("upload", &args).await?.0)
    }

    /// Build order of a variant via `conan info <dir> -bo ALL`.
    pub async fn build_order(&self, variant_dir: &Path) -> Result<Vec<Vec<String>>> {
        let mut args = vec![
            variant_dir.display().to_string(),
            "-bo".to_string(),
            "ALL".to_string(),
        ];
        args.extend(self.profile_args());

        let (ok, stdout) = self.run("info", &args).await?;
        if !ok {
            return Err(DepforgeError::ConanCommandError {
                operation: "info".to_string(),
                stderr: format!("build order of {} failed", variant_dir.display()),
            }
            .into());
        }
        Ok(parse_build_order(&stdout))
    }

    /// Append the user/channel when the reference does not carry one.
    fn qualified(&self, reference: &str) -> String {
        if reference.contains('@') {
            reference.to_string()
        } else {
            format!("{reference}@{}", self.user_channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "installed": [
            {
                "recipe": {"id": "zlib/1.2.8-3@plex/stable"},
                "packages": [{"id": "abc123", "built": false}]
            },
            {
                "recipe": {"id": "libpng/1.6.37-2@plex/stable"},
                "packages": [{"id": "def456", "built": true}]
            },
            {
                "recipe": {"id": "libwebp/1.2.0-0@plex/stable"},
                "packages": [{"id": "0ff0", "built": true, "error": {"type": "build"}}]
            }
        ]
    }"#;

    #[test]
    fn install_report_splits_by_outcome() {
        let report = parse_install_report(REPORT).unwrap();
        assert_eq!(report.installed.len(), 1);
        assert_eq!(report.installed[0].reference, "zlib/1.2.8-3");
        assert_eq!(report.built.len(), 1);
        assert_eq!(report.built[0].reference, "libpng/1.6.37-2");
        assert_eq!(report.built[0].package_ids, vec!["def456"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name(), "libwebp");
    }

    #[test]
    fn recipe_error_counts_as_failed() {
        let json = r#"{"installed": [{"recipe": {"id": "x/1.0-0@plex/stable",
            "error": {"type": "recipe"}}, "packages": []}]}"#;
        let report = parse_install_report(json).unwrap();
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn malformed_report_is_an_error() {
        assert!(parse_install_report("not json").is_err());
    }

    #[test]
    fn conaninfo_sections() {
        let content = "\
[settings]
    os=Linux
[full_options]
    zlib:shared=False
    zlib:fPIC=True
    libpng:shared=False
[full_requires]
    zlib/1.2.8-3@plex/stable:abc123
    libpng/1.6.37-2@plex/stable:def456
    private-thing/1.0@other/channel:0ff0
[env]
";
        let parsed = parse_conaninfo(content, "plex/stable");
        assert_eq!(parsed.options["zlib"]["shared"], "False");
        assert_eq!(parsed.options["zlib"]["fPIC"], "True");
        assert_eq!(
            parsed.testable.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["libpng", "zlib"]
        );

        let args = parsed.as_args();
        assert!(args.contains(&"-ozlib:shared=False".to_string()));
        assert!(args.contains(&"-olibpng:shared=False".to_string()));
    }

    #[test]
    fn empty_conaninfo_yields_nothing() {
        let parsed = parse_conaninfo("", "plex/stable");
        assert!(parsed.options.is_empty());
        assert!(parsed.testable.is_empty());
        assert!(parsed.as_args().is_empty());
    }

    #[test]
    fn build_order_groups() {
        let output = "\
WARN: some warning
[zlib/1.2.8-3@plex/stable, minizip/1.1-2@plex/stable], [libpng/1.6.37-2@plex/stable]
";
        let order = parse_build_order(output);
        assert_eq!(
            order,
            vec![
                vec![
                    "zlib/1.2.8-3@plex/stable".to_string(),
                    "minizip/1.1-2@plex/stable".to_string()
                ],
                vec!["libpng/1.6.37-2@plex/stable".to_string()],
            ]
        );
    }

    #[test]
    fn build_order_ignores_prose_lines() {
        assert!(parse_build_order("nothing bracketed here\n").is_empty());
    }
}
