//! `depforge tree` - dependency trees for named packages.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::config::Config;
use crate::graph::DependencyGraph;

#[derive(Args)]
pub struct TreeCommand {
    /// Packages to show.
    #[arg(required = true, value_name = "PACKAGE")]
    packages: Vec<String>,

    /// Show what each package requires instead of what requires it.
    #[arg(long)]
    requires: bool,
}

impl TreeCommand {
    pub fn execute(self, config: &Config) -> Result<()> {
        let graph = DependencyGraph::load(config)?;

        for name in &self.packages {
            if !graph.packages.contains_key(name) {
                eprintln!("{} {name} is not in the package tree", "warning:".yellow());
            }
        }

        let roots: Vec<&str> = self.packages.iter().map(String::as_str).collect();
        let rendered = if self.requires {
            graph.render_requirements_tree(&roots)
        } else {
            graph.render_dependents_tree(&roots)
        };
        print!("{rendered}");
        Ok(())
    }
}
