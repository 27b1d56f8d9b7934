//! `depforge versions` - align requirement references with current package
//! versions, no revision bumps.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::config::Config;
use crate::graph::DependencyGraph;
use crate::resolver;

#[derive(Args)]
pub struct VersionsCommand {}

impl VersionsCommand {
    pub fn execute(self, config: &Config) -> Result<()> {
        let mut graph = DependencyGraph::load(config)?;
        let outcome = resolver::update_versions(&mut graph, false)?;

        for rewrite in &outcome.rewrites {
            println!("{}: {} -> {}", rewrite.package.bold(), rewrite.old_ref, rewrite.new_ref);
        }
        print_saved(&graph, &outcome);
        Ok(())
    }
}

/// Shared "which files were written" footer for versions/revisions.
pub(crate) fn print_saved(graph: &DependencyGraph, outcome: &resolver::ResolveOutcome) {
    if outcome.saved_packages.is_empty() && outcome.saved_variants.is_empty() {
        println!("No packages changed.");
        return;
    }
    println!("{}", "Changed packages:".bold());
    for name in &outcome.saved_packages {
        if let Some(recipe) = graph.packages.get(name) {
            println!("  - {}", recipe.path().display());
        }
    }
    for name in &outcome.saved_variants {
        if let Some(recipe) = graph.variants.get(name) {
            println!("  - {}", recipe.path().display());
        }
    }
}
