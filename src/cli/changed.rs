//! `depforge changed` - what did I touch, and what does that drag along?

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::config::Config;
use crate::graph::changes::detect_changes;
use crate::graph::DependencyGraph;

#[derive(Args)]
pub struct ChangedCommand {
    /// Reference commit to diff against.
    #[arg(long = "ref", value_name = "REF", default_value = "HEAD")]
    reference: String,
}

impl ChangedCommand {
    pub async fn execute(self, config: &Config) -> Result<()> {
        let mut graph = DependencyGraph::load(config)?;
        let report = detect_changes(&mut graph, config, &self.reference).await?;

        if report.is_empty() {
            println!("No packages changed relative to {}.", self.reference);
            return Ok(());
        }

        println!(
            "{} ({} changed, {} affected in total)",
            "Changed packages".bold(),
            report.modified.len(),
            report.changed_set.len()
        );
        let roots: Vec<&str> = report.modified.iter().map(String::as_str).collect();
        print!("{}", graph.render_dependents_tree(&roots));
        Ok(())
    }
}
