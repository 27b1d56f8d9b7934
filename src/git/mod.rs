//! Git plumbing used by change detection.
//!
//! depforge shells out to the system `git` (like cargo does) through a small
//! builder that captures output, applies a timeout, and maps non-zero exits
//! to [`DepforgeError::GitCommandError`]. Only the two porcelain calls the
//! core needs are wrapped: `diff --name-status` against a reference and
//! `show <ref>:<path>` to read a file as of that reference.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::DepforgeError;

/// How a path changed between the working tree and the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Other(char),
}

impl ChangeStatus {
    fn from_letter(letter: char) -> Self {
        match letter {
            'A' => Self::Added,
            'M' => Self::Modified,
            'D' => Self::Deleted,
            other => Self::Other(other),
        }
    }
}

/// One entry of a `git diff --name-status` listing.
#[derive(Debug, Clone)]
pub struct ChangedPath {
    pub status: ChangeStatus,
    pub path: PathBuf,
}

/// Builder for a single git invocation with captured output.
pub struct GitCommand {
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl GitCommand {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            // git here only touches the local repository; five minutes is
            // generous headroom for very large trees
            timeout: Duration::from_secs(300),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run the command and return stdout, failing on a non-zero exit.
    pub async fn execute_stdout(self) -> Result<String> {
        ensure_git_available()?;

        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            // -C keeps the invocation independent of the process cwd
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.clone());

        tracing::debug!(target: "git", "git {}", full_args.join(" "));

        let mut cmd = Command::new("git");
        cmd.args(&full_args).stdout(Stdio::piped()).stderr(Stdio::piped());

        let operation = self.args.first().cloned().unwrap_or_default();
        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| DepforgeError::GitCommandError {
                operation: operation.clone(),
                stderr: format!("timed out after {} seconds", self.timeout.as_secs()),
            })?
            .with_context(|| format!("failed to execute git {}", full_args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(target: "git", "git {operation} failed: {stderr}");
            return Err(DepforgeError::GitCommandError { operation, stderr }.into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that git exists on PATH.
pub fn ensure_git_available() -> Result<()> {
    which::which("git").map_err(|_| DepforgeError::GitNotFound)?;
    Ok(())
}

/// `git diff --name-status <reference>` in `root`, parsed.
///
/// Lines that do not split into a status and a path (e.g. rename lines with
/// score columns are kept: the last column is the new path) are skipped.
pub async fn diff_name_status(root: &Path, reference: &str) -> Result<Vec<ChangedPath>> {
    let stdout = GitCommand::new()
        .current_dir(root)
        .args(["diff", "--name-status", reference])
        .execute_stdout()
        .await?;

    let mut changes = Vec::new();
    for line in stdout.lines() {
        let mut parts = line.split('\t');
        let Some(status) = parts.next().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        let Some(path) = parts.next_back().map(str::trim).filter(|p| !p.is_empty()) else {
            continue;
        };
        let letter = status.chars().next().unwrap_or('?');
        changes.push(ChangedPath {
            status: ChangeStatus::from_letter(letter),
            path: PathBuf::from(path),
        });
    }
    Ok(changes)
}

/// Read a file's content as of `reference` (`git show <ref>:<path>`).
///
/// `path` must be relative to the repository root, with forward slashes.
pub async fn show_file(root: &Path, reference: &str, path: &str) -> Result<String> {
    GitCommand::new()
        .current_dir(root)
        .args(["show", format!("{reference}:{path}")])
        .execute_stdout()
        .await
        .with_context(|| format!("failed to read {path} at {reference}"))
}
