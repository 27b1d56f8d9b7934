//! `depforge revisions` - bump revisions of changed packages and propagate
//! the bumps through every dependent.
//!
//! Next revisions come from the artifact store by default (one past the
//! highest already-published revision, so a rebuild can never collide with
//! an existing artifact) or, with `--local`, from the reference commit's
//! revision plus an increment. Saved packages are exported into the local
//! conan cache afterwards so downstream builds pick them up immediately.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::build::ConanRunner;
use crate::config::{Config, Credentials};
use crate::core::DepforgeError;
use crate::graph::DependencyGraph;
use crate::graph::changes::detect_changes;
use crate::recipe::Recipe;
use crate::remote::{ArtifactStore, next_revisions};
use crate::resolver::{self, ResolveOptions};
use crate::utils::ProgressBar;

#[derive(Args)]
pub struct RevisionsCommand {
    /// Derive next revisions from the reference commit instead of the
    /// artifact store.
    #[arg(long)]
    local: bool,

    /// Amount added to the reference revision in --local mode.
    #[arg(long, value_name = "N", default_value_t = 1, requires = "local")]
    increment: u32,

    /// Remote repositories to consult (defaults to the configured list).
    #[arg(long = "remote", value_name = "NAME")]
    remotes: Vec<String>,

    /// `all` to bump every package, or a branch to diff against instead of
    /// HEAD.
    #[arg(long, value_name = "TARGET")]
    bump: Option<String>,

    /// Compute everything but write nothing; exit non-zero when the tree
    /// is not already at the resolved state.
    #[arg(long)]
    dry_run: bool,

    /// Skip exporting saved packages to the local conan cache.
    #[arg(long)]
    no_export: bool,

    /// Extra variant recipe files to bring up to date.
    #[arg(value_name = "VARIANT_FILE")]
    extra_files: Vec<PathBuf>,
}

impl RevisionsCommand {
    pub async fn execute(self, config: &Config) -> Result<()> {
        let bump_all = self.bump.as_deref() == Some("all");
        let reference = match self.bump.as_deref() {
            Some("all") | None => "HEAD",
            Some(branch) => branch,
        };

        let mut graph = DependencyGraph::load(config)?;
        let report = detect_changes(&mut graph, config, reference).await?;

        let scope: Vec<String> = if bump_all {
            graph.packages.keys().cloned().collect()
        } else {
            report.changed_set.iter().cloned().collect()
        };

        let seeds = if scope.is_empty() {
            BTreeMap::new()
        } else if self.local {
            local_seeds(&graph, &scope, self.increment)
        } else {
            self.remote_seeds(config, &graph, &scope).await?
        };

        let options = ResolveOptions { seeds, bump_all, dry_run: self.dry_run };
        let outcome = resolver::resolve(&mut graph, &options)?;

        for (name, before, after) in &report.corrected {
            println!("{}: {} -> {}", name.bold(), before, after);
        }
        for bump in &outcome.bumps {
            println!("{}: {} -> {}", bump.package.bold(), bump.before, bump.after);
        }
        for rewrite in &outcome.rewrites {
            println!("{}: {} -> {}", rewrite.package.bold(), rewrite.old_ref, rewrite.new_ref);
        }

        if self.dry_run {
            if outcome.pending > 0 {
                bail!(
                    "not all versions are updated: {} file(s) would change; \
                     run `depforge revisions` before committing",
                    outcome.pending
                );
            }
            println!("Everything is up to date.");
            return Ok(());
        }

        self.update_extra_files(config, &graph)?;
        super::versions::print_saved(&graph, &outcome);

        if !self.no_export && !outcome.saved_packages.is_empty() {
            export_saved(config, &graph, &outcome.saved_packages).await?;
        }
        Ok(())
    }

    /// Ask the artifact store for the next free revision of every package
    /// in scope. Refuses to proceed when any package's answer is unknown -
    /// guessing could republish an existing revision.
    async fn remote_seeds(
        &self,
        config: &Config,
        graph: &DependencyGraph,
        scope: &[String],
    ) -> Result<BTreeMap<String, u32>> {
        let credentials = Credentials::from_env()?;
        let store = ArtifactStore::new(&config.settings.artifactory, credentials);
        let remotes = if self.remotes.is_empty() {
            config.settings.artifactory.remotes.clone()
        } else {
            self.remotes.clone()
        };

        let pairs: Vec<(String, String)> = scope
            .iter()
            .filter_map(|name| {
                graph.packages.get(name).map(|r| (r.name.clone(), r.full_version()))
            })
            .collect();

        let spinner = ProgressBar::spinner("Fetching revisions from the artifact store...");
        let next =
            next_revisions(&store, &remotes, &pairs, config.settings.workers.remote).await;
        spinner.finish_and_clear();

        if !next.unknown.is_empty() {
            return Err(DepforgeError::RevisionUnknown {
                package: next.unknown.join(", "),
            }
            .into());
        }
        Ok(next.revisions)
    }

    fn update_extra_files(&self, config: &Config, graph: &DependencyGraph) -> Result<()> {
        for path in &self.extra_files {
            let mut recipe =
                Recipe::load_variant(path, &config.settings.recipes.base_class)
                    .with_context(|| format!("failed to load {}", path.display()))?;
            for rewrite in resolver::update_extra_variant(&mut recipe, graph) {
                println!(
                    "{}: {} -> {}",
                    rewrite.package.bold(),
                    rewrite.old_ref,
                    rewrite.new_ref
                );
            }
            if recipe.save()? {
                println!("  - {}", path.display());
            }
        }
        Ok(())
    }
}

/// Next revisions from the reference commit: one increment past the head
/// revision while the version is unchanged, zero after a version change.
fn local_seeds(
    graph: &DependencyGraph,
    scope: &[String],
    increment: u32,
) -> BTreeMap<String, u32> {
    scope
        .iter()
        .filter_map(|name| graph.packages.get(name))
        .map(|recipe| {
            let next = if recipe.version == recipe.head_version {
                // an absent head revision counts as -1, so the first
                // revision a suffixless recipe gets is increment - 1
                recipe.head_revision.map_or(increment.saturating_sub(1), |rev| rev + increment)
            } else {
                0
            };
            (recipe.name.clone(), next)
        })
        .collect()
}

/// Export saved packages into the local conan cache, a few at a time.
async fn export_saved(
    config: &Config,
    graph: &DependencyGraph,
    saved: &[String],
) -> Result<()> {
    let runner = ConanRunner::new(config, None, true);
    let runner = &runner;
    let dirs: Vec<(String, PathBuf)> = saved
        .iter()
        .filter_map(|name| {
            graph
                .packages
                .get(name)
                .and_then(|recipe| recipe.path().parent())
                .map(|dir| (name.clone(), dir.to_path_buf()))
        })
        .collect();

    let bar = ProgressBar::new(dirs.len() as u64);
    bar.set_message("exporting");
    let results = stream::iter(dirs)
        .map(|(name, dir)| async move {
            let ok = runner.export_package(&dir).await.unwrap_or(false);
            (name, ok)
        })
        .buffer_unordered(config.settings.workers.subprocess)
        .inspect(|_| bar.inc(1))
        .collect::<Vec<(String, bool)>>()
        .await;
    bar.finish_and_clear();

    let failed: Vec<String> =
        results.into_iter().filter(|(_, ok)| !ok).map(|(name, _)| name).collect();
    if !failed.is_empty() {
        bail!("failed to export: {}", failed.join(", "));
    }
    Ok(())
}
