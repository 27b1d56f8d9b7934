//! `depforge build` - run the export/install/test/upload pipeline for a
//! variant.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;

use crate::build::{BuildOptions, BuildReport, Orchestrator};
use crate::config::Config;
use crate::graph::DependencyGraph;

#[derive(Args)]
pub struct BuildCommand {
    /// Variant to build, or `auto` to resolve via the [profiles] table.
    #[arg(long, value_name = "NAME", default_value = "auto")]
    variant: String,

    /// Conan profile (also selects the variants for `--variant auto`).
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,

    /// Export all package recipes and stop.
    #[arg(long)]
    export_only: bool,

    /// Export all package recipes, upload them (no binaries), and stop.
    #[arg(long, conflicts_with = "export_only")]
    export_and_upload: bool,

    /// Upload built-and-tested packages when the run finishes.
    #[arg(long)]
    upload: bool,

    /// Remote repository uploads go to (default: first configured remote).
    #[arg(long, value_name = "NAME")]
    upload_remote: Option<String>,

    /// Walk the variant's build order testing every package; abort on the
    /// first failure.
    #[arg(long)]
    dev_testing: bool,

    /// Rebuild everything instead of only outdated packages.
    #[arg(long)]
    force_rebuild: bool,

    /// Skip the export stage.
    #[arg(long)]
    no_export: bool,

    /// Stop at the first stage that records any failure.
    #[arg(long)]
    strict: bool,
}

impl BuildCommand {
    pub async fn execute(self, config: &Config) -> Result<()> {
        let graph = DependencyGraph::load(config)?;

        let upload_remote = self.upload_remote.clone().unwrap_or_else(|| {
            config
                .settings
                .artifactory
                .remotes
                .first()
                .cloned()
                .unwrap_or_else(|| "conan-stable".to_string())
        });
        let options = BuildOptions {
            variant: self.variant,
            profile: self.profile,
            no_export: self.no_export,
            export_only: self.export_only,
            export_and_upload: self.export_and_upload,
            upload: self.upload,
            upload_remote,
            dev_testing: self.dev_testing,
            force_rebuild: self.force_rebuild,
            strict: self.strict,
            workers: 0,
            quiet: false,
        };

        let orchestrator = Orchestrator::new(config, &graph, &options);
        let report = orchestrator.run(&options).await?;
        print_report(&report);

        if !report.is_success() {
            bail!("build pipeline finished with failures");
        }
        println!("{}", "Build pipeline finished successfully.".green());
        Ok(())
    }
}

fn print_report(report: &BuildReport) {
    if report.exported > 0 {
        println!("Exported {} packages", report.exported);
    }
    if report.installed > 0 || !report.built.is_empty() {
        println!(
            "Installed {} packages, built {}",
            report.installed,
            report.built.len()
        );
    }
    if !report.tested.is_empty() {
        println!("Tested {} packages", report.tested.len());
    }
    if !report.uploaded.is_empty() {
        println!("Uploaded {} packages", report.uploaded.len());
    }

    print_failures("export", &report.export_failures);
    print_failures("build", &report.build_failures);
    print_failures("test", &report.test_failures);
    print_failures("upload", &report.upload_failures);
}

/// Banner-framed list of failed package references for one stage.
fn print_failures(stage: &str, references: &[String]) {
    if references.is_empty() {
        return;
    }
    let banner = format!("  {} FAILED  ", stage.to_uppercase());
    println!("{}", format!("{banner:*^80}").red());
    for reference in references {
        println!("{reference}");
    }
    println!("{}", "*".repeat(80).red());
}
