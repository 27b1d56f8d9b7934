//! Error handling for depforge.
//!
//! Two layers: [`DepforgeError`] is the typed taxonomy for every failure the
//! tool can produce on its own, and application code wraps it in
//! [`anyhow::Error`] with context as it bubbles up. The CLI entry point
//! converts the final chain into a colored, actionable message via
//! [`user_friendly_error`].
//!
//! Propagation policy follows the resolution pipeline:
//! - structural recipe errors ([`DepforgeError::ManifestStructure`],
//!   [`DepforgeError::MissingField`]) abort the whole graph load; no partial
//!   graph is ever used for resolution
//! - per-remote artifact store failures are soft: they are logged and the
//!   remote simply contributes no published versions. Only when every remote
//!   hard-fails does a query surface as [`DepforgeError::RevisionUnknown`]
//! - build/test/export/upload subprocess failures are accumulated per stage
//!   and reported in aggregate; they never crash the orchestrator

use colored::Colorize;
use thiserror::Error;

/// The main error type for depforge operations.
#[derive(Error, Debug)]
pub enum DepforgeError {
    /// A recipe source is structurally unusable: no class deriving from the
    /// expected base class, or a field value that cannot be interpreted.
    #[error("malformed recipe {path}: {reason}")]
    ManifestStructure {
        /// Path of the offending recipe file.
        path: String,
        /// What made the recipe unusable.
        reason: String,
    },

    /// A recipe's declaring class is missing a required scalar field.
    #[error("recipe {path} is missing required field '{field}'")]
    MissingField {
        /// Path of the offending recipe file.
        path: String,
        /// The field that could not be found (`name`, `version`, ...).
        field: String,
    },

    /// Two package directories declared the same package name.
    #[error("package name '{name}' is declared by both {first} and {second}")]
    DuplicatePackage {
        /// The colliding package name.
        name: String,
        /// Recipe path loaded first.
        first: String,
        /// Recipe path that collided with it.
        second: String,
    },

    /// The requirement graph contains a cycle. Revision resolution refuses
    /// to run on a cyclic graph because the fixed-point iteration would
    /// never terminate.
    #[error("dependency cycle detected: {cycle}")]
    DependencyCycle {
        /// The cycle path, rendered as `a -> b -> a`.
        cycle: String,
    },

    /// Git executable not found in PATH.
    #[error("git is not installed or not found in PATH")]
    GitNotFound,

    /// A git command returned a non-zero exit code.
    #[error("git {operation} failed")]
    GitCommandError {
        /// The git subcommand that failed (e.g. "diff", "show").
        operation: String,
        /// Captured stderr from the git process.
        stderr: String,
    },

    /// Conan executable not found in PATH (and `DEPFORGE_CONAN_PATH` unset).
    #[error("conan is not installed or not found in PATH")]
    ConanNotFound,

    /// A conan command returned a non-zero exit code.
    #[error("conan {operation} failed")]
    ConanCommandError {
        /// The conan subcommand that failed (e.g. "export", "install").
        operation: String,
        /// Captured stderr from the conan process.
        stderr: String,
    },

    /// A single remote repository could not be queried. Soft failure: the
    /// remote contributes no published versions, siblings continue.
    #[error("remote '{remote}' query for '{package}' failed: {reason}")]
    RemoteQueryFailed {
        /// The remote repository name.
        remote: String,
        /// The package being queried.
        package: String,
        /// Transport error or HTTP status description.
        reason: String,
    },

    /// Every configured remote hard-failed while computing the next
    /// revision for a package. The answer is unknown, not zero; writing a
    /// guessed revision could republish an existing artifact.
    #[error("next revision for '{package}' is unknown: all remotes failed")]
    RevisionUnknown {
        /// The package whose next revision could not be determined.
        package: String,
    },

    /// Missing or invalid configuration.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Description of what is wrong.
        message: String,
    },

    /// Artifact store credentials are not set in the environment.
    #[error("artifact store credentials are not configured")]
    MissingCredentials,

    /// IO error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A displayable wrapper pairing the error chain with an optional
/// suggestion for the user.
pub struct ErrorContext {
    error: anyhow::Error,
    suggestion: Option<String>,
}

impl ErrorContext {
    /// Print the error chain and suggestion to stderr.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        for cause in self.error.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".yellow(), cause);
        }
        if let Some(ref suggestion) = self.suggestion {
            eprintln!();
            eprintln!("{} {}", "hint:".cyan().bold(), suggestion);
        }
    }
}

/// Convert any error chain into a user-friendly form, attaching a
/// suggestion when the root cause is one we can advise on.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let suggestion = error.downcast_ref::<DepforgeError>().and_then(|e| match e {
        DepforgeError::GitNotFound => {
            Some("install git and make sure it is on your PATH".to_string())
        }
        DepforgeError::ConanNotFound => Some(
            "install conan, or point DEPFORGE_CONAN_PATH at the conan binary".to_string(),
        ),
        DepforgeError::MissingCredentials => Some(
            "set DEPFORGE_ARTIFACTORY_USER and DEPFORGE_ARTIFACTORY_TOKEN; a shared \
             read-only token is available from the engineering credentials vault"
                .to_string(),
        ),
        DepforgeError::RevisionUnknown { .. } => Some(
            "check connectivity to the artifact store, or rerun with --local to \
             derive revisions from git history instead"
                .to_string(),
        ),
        DepforgeError::DependencyCycle { .. } => {
            Some("break the cycle by removing one of the listed requirements".to_string())
        }
        DepforgeError::ConfigError { .. } => {
            Some("check depforge.toml at the package tree root".to_string())
        }
        DepforgeError::ManifestStructure { .. } => {
            Some("recipes must contain a class deriving from the configured base class".to_string())
        }
        _ => None,
    });

    ErrorContext { error, suggestion }
}
