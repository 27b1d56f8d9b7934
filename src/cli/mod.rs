//! The `depforge` command-line interface.
//!
//! One module per subcommand; each exposes a clap `Args` struct with an
//! `execute` method taking the discovered [`Config`]. Global flags
//! (`--verbose`, `--quiet`, `--no-progress`, `--root`) live on the root
//! [`Cli`] and apply to every command.
//!
//! Exit codes: 0 on success, 1 for any surfaced error - including a
//! `revisions --dry-run` that finds the tree stale and a `build` run with
//! failed stages.

mod build;
mod changed;
mod revisions;
mod tree;
mod versions;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::utils::progress::ENV_NO_PROGRESS;

/// Root command.
#[derive(Parser)]
#[command(
    name = "depforge",
    about = "Dependency-version and build orchestration for the conan package tree",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only show errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Disable progress spinners and bars.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Package tree root (default: discovered from the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which packages changed relative to a reference, with their
    /// dependents.
    Changed(changed::ChangedCommand),
    /// Print the dependency tree of one or more packages.
    Tree(tree::TreeCommand),
    /// Rewrite requirement references to current package versions, without
    /// bumping revisions.
    Versions(versions::VersionsCommand),
    /// Bump revisions of changed packages and propagate through dependents.
    Revisions(revisions::RevisionsCommand),
    /// Export, build, test, and upload a build variant.
    Build(build::BuildCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        self.init_logging();
        if self.no_progress {
            // SAFETY: called once, before any worker task is spawned
            unsafe { std::env::set_var(ENV_NO_PROGRESS, "1") };
        }

        let config = Config::discover(self.root)?;
        match self.command {
            Commands::Changed(cmd) => cmd.execute(&config).await,
            Commands::Tree(cmd) => cmd.execute(&config),
            Commands::Versions(cmd) => cmd.execute(&config),
            Commands::Revisions(cmd) => cmd.execute(&config).await,
            Commands::Build(cmd) => cmd.execute(&config).await,
        }
    }

    fn init_logging(&self) {
        let default_filter = if self.verbose {
            "depforge=debug"
        } else if self.quiet {
            "depforge=error"
        } else {
            "depforge=info"
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_and_quiet_conflict() {
        let parsed = Cli::try_parse_from(["depforge", "--verbose", "--quiet", "versions"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_apply_after_the_subcommand() {
        let parsed = Cli::try_parse_from(["depforge", "changed", "--verbose"]).unwrap();
        assert!(parsed.verbose);
    }

    #[test]
    fn revisions_flags_parse() {
        let parsed = Cli::try_parse_from([
            "depforge",
            "revisions",
            "--local",
            "--increment",
            "2",
            "--bump",
            "all",
            "--dry-run",
        ]);
        assert!(parsed.is_ok());
    }
}
