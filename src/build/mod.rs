//! Build, test, and upload orchestration for a variant.
//!
//! One run walks the stages `Exporting -> Installing -> Testing ->
//! Uploading` and ends `Done` or `Failed`. Per-package failures are
//! accumulated into four independent lists on the [`BuildReport`] and, by
//! default, do not stop the pipeline - independent packages in a batch
//! should not be held up by one broken one. With `strict` set, the first
//! stage that accumulates a failure terminates the run.
//!
//! Export, cache cleanup, and upload fan out over a bounded worker pool;
//! the install and the per-package tests are sequential because conan
//! serializes the actual building anyway.

pub mod conan;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;

use crate::config::Config;
use crate::graph::DependencyGraph;

pub use conan::{ConanRunner, InstallReport, InstalledOptions, PackageStatus};

/// Where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStage {
    #[default]
    Exporting,
    Installing,
    Testing,
    Uploading,
    Done,
    Failed,
}

/// Flags for one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Variant name, or `auto` to resolve through the profile table.
    pub variant: String,
    /// Profile name, used by conan and by `auto` variant resolution.
    pub profile: Option<String>,
    /// Skip the export stage.
    pub no_export: bool,
    /// Export everything, then stop.
    pub export_only: bool,
    /// Export everything, upload recipes (no binaries), then stop.
    pub export_and_upload: bool,
    /// Upload built-and-tested packages at the end of the run.
    pub upload: bool,
    /// Remote repository uploads go to.
    pub upload_remote: String,
    /// Walk the variant build order testing each package instead of
    /// installing the variant. Aborts on the first failure.
    pub dev_testing: bool,
    /// Rebuild everything instead of only outdated packages.
    pub force_rebuild: bool,
    /// Stop at the first stage that accumulates any failure.
    pub strict: bool,
    /// Bounded worker pool size for export/clean/upload.
    pub workers: usize,
    /// Suppress subprocess output.
    pub quiet: bool,
}

/// Aggregated outcome of a run: what each stage did and what failed.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub stage: BuildStage,
    pub exported: usize,
    pub installed: usize,
    pub built: Vec<String>,
    pub tested: Vec<String>,
    pub uploaded: Vec<String>,
    pub export_failures: Vec<String>,
    pub build_failures: Vec<String>,
    pub test_failures: Vec<String>,
    pub upload_failures: Vec<String>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.export_failures.is_empty()
            && self.build_failures.is_empty()
            && self.test_failures.is_empty()
            && self.upload_failures.is_empty()
    }

    fn finish(&mut self) {
        self.stage = if self.is_success() { BuildStage::Done } else { BuildStage::Failed };
    }
}

/// Sequences conan operations over the loaded graph.
pub struct Orchestrator<'a> {
    config: &'a Config,
    graph: &'a DependencyGraph,
    runner: ConanRunner,
    workers: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, graph: &'a DependencyGraph, options: &BuildOptions) -> Self {
        let workers = if options.workers > 0 {
            options.workers
        } else {
            config.settings.workers.subprocess
        };
        Self {
            config,
            graph,
            runner: ConanRunner::new(config, options.profile.clone(), options.quiet),
            workers,
        }
    }

    /// Variants this run covers: the named one, or the profile table entry
    /// for `auto`.
    fn variants(&self, options: &BuildOptions) -> Result<Vec<String>> {
        if options.variant == "auto" {
            let profile = options.profile.as_deref().unwrap_or("default");
            Ok(self.config.variants_for_profile(profile)?.to_vec())
        } else {
            Ok(vec![options.variant.clone()])
        }
    }

    /// Run the full pipeline. Infrastructure problems (conan missing, a
    /// variant install falling over) surface as errors; per-package
    /// failures land in the report.
    pub async fn run(&self, options: &BuildOptions) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        report.stage = BuildStage::Exporting;
        if !options.no_export {
            self.export_all(&mut report).await?;
            if !report.export_failures.is_empty()
                && (options.strict || options.export_only || options.export_and_upload)
            {
                report.stage = BuildStage::Failed;
                return Ok(report);
            }
        }

        if options.export_only || options.export_and_upload {
            if options.export_and_upload {
                report.stage = BuildStage::Uploading;
                self.upload_recipes(&options.upload_remote, &mut report).await;
            }
            report.finish();
            return Ok(report);
        }

        for variant in self.variants(options)? {
            if options.dev_testing {
                self.dev_test_variant(&variant, options, &mut report).await?;
                if !report.test_failures.is_empty() {
                    report.stage = BuildStage::Failed;
                    return Ok(report);
                }
            } else {
                self.build_variant(&variant, options, &mut report).await?;
                if options.strict && !report.is_success() {
                    report.stage = BuildStage::Failed;
                    return Ok(report);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// Export every package recipe into the local cache, `workers` at a
    /// time. Failures are per-package, never fatal.
    async fn export_all(&self, report: &mut BuildReport) -> Result<()> {
        let runner = &self.runner;
        let dirs: Vec<(String, PathBuf)> = self
            .graph
            .packages
            .values()
            .filter_map(|recipe| {
                recipe
                    .path()
                    .parent()
                    .map(|dir| (recipe.name.clone(), dir.to_path_buf()))
            })
            .collect();

        let results = stream::iter(dirs)
            .map(|(name, dir)| async move {
                let ok = match runner.export_package(&dir).await {
                    Ok(ok) => ok,
                    Err(err) => {
                        tracing::warn!("export of {name} failed: {err:#}");
                        false
                    }
                };
                (name, ok)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<(String, bool)>>()
            .await;

        for (name, ok) in results {
            if ok {
                report.exported += 1;
            } else {
                report.export_failures.push(name);
            }
        }
        report.export_failures.sort_unstable();
        Ok(())
    }

    /// Upload every package recipe (no binaries) after an export-and-upload
    /// run.
    async fn upload_recipes(&self, remote: &str, report: &mut BuildReport) {
        let runner = &self.runner;
        let refs: Vec<String> =
            self.graph.packages.values().map(|recipe| recipe.package_ref()).collect();

        let results = stream::iter(refs)
            .map(|reference| async move {
                let ok = runner
                    .upload_package(&reference, remote, false, None)
                    .await
                    .unwrap_or(false);
                (reference, ok)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<(String, bool)>>()
            .await;

        for (reference, ok) in results {
            if ok {
                report.uploaded.push(reference);
            } else {
                report.upload_failures.push(reference);
            }
        }
        report.uploaded.sort_unstable();
        report.upload_failures.sort_unstable();
    }

    /// Install the variant, test what was built, clean what passed, upload
    /// what passed plus what cannot be tested.
    async fn build_variant(
        &self,
        variant: &str,
        options: &BuildOptions,
        report: &mut BuildReport,
    ) -> Result<()> {
        report.stage = BuildStage::Installing;
        let variant_dir = self.config.variants_dir().join(variant);
        let build_policy = if options.force_rebuild { "*" } else { "outdated" };

        let install = self.runner.install(&variant_dir, build_policy, true).await?;
        report.installed += install.installed.len();
        report
            .build_failures
            .extend(install.failed.iter().map(|pkg| pkg.reference.clone()));
        report.built.extend(install.built.iter().map(|pkg| pkg.reference.clone()));

        // options for the built packages come from the conaninfo.txt the
        // install dropped; packages absent from [full_requires] are private
        // requirements we cannot reconstruct options for
        let installed_options = match std::fs::read_to_string(self.runner.conaninfo_path()) {
            Ok(content) => conan::parse_conaninfo(&content, self.runner.user_channel()),
            Err(_) => {
                tracing::warn!("no conaninfo.txt found after installing {variant}");
                InstalledOptions::default()
            }
        };
        let option_args = installed_options.as_args();

        report.stage = BuildStage::Testing;
        let mut passed = Vec::new();
        for pkg in &install.built {
            if !installed_options.testable.contains(pkg.name()) {
                continue;
            }
            if self.runner.test_package(&pkg.reference, "never", &option_args).await? {
                passed.push(pkg.clone());
                report.tested.push(pkg.reference.clone());
            } else {
                report.test_failures.push(pkg.reference.clone());
            }
        }

        // passed packages are cleaned regardless of how the rest fared
        self.clean_packages(&passed).await;

        if options.upload {
            report.stage = BuildStage::Uploading;
            let untestable: Vec<PackageStatus> = install
                .built
                .iter()
                .filter(|pkg| !installed_options.testable.contains(pkg.name()))
                .cloned()
                .collect();
            let to_upload: Vec<PackageStatus> =
                passed.into_iter().chain(untestable).collect();
            self.upload_built(&to_upload, &options.upload_remote, report).await;
        }
        Ok(())
    }

    /// Remove build folders and sources of passed packages from the local
    /// cache, bounded-parallel.
    async fn clean_packages(&self, packages: &[PackageStatus]) {
        let runner = &self.runner;
        let results = stream::iter(packages)
            .map(|pkg| async move {
                let ok = runner.remove_package(&pkg.reference).await.unwrap_or(false);
                (pkg.reference.clone(), ok)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<(String, bool)>>()
            .await;

        for (reference, ok) in results {
            if !ok {
                tracing::warn!("failed to clean {reference} from the local cache");
            }
        }
    }

    /// Upload built binaries, one task per package id.
    async fn upload_built(
        &self,
        packages: &[PackageStatus],
        remote: &str,
        report: &mut BuildReport,
    ) {
        let runner = &self.runner;
        let results = stream::iter(packages)
            .map(|pkg| async move {
                let mut ok = true;
                if pkg.package_ids.is_empty() {
                    ok = runner
                        .upload_package(&pkg.reference, remote, true, None)
                        .await
                        .unwrap_or(false);
                } else {
                    for id in &pkg.package_ids {
                        ok &= runner
                            .upload_package(&pkg.reference, remote, true, Some(id))
                            .await
                            .unwrap_or(false);
                    }
                }
                (pkg.reference.clone(), ok)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<(String, bool)>>()
            .await;

        for (reference, ok) in results {
            if ok {
                report.uploaded.push(reference);
            } else {
                report.upload_failures.push(reference);
            }
        }
        report.uploaded.sort_unstable();
        report.upload_failures.sort_unstable();
    }

    /// Walk the variant's build order and `conan test` every reference.
    /// Stops at the first failure.
    async fn dev_test_variant(
        &self,
        variant: &str,
        options: &BuildOptions,
        report: &mut BuildReport,
    ) -> Result<()> {
        report.stage = BuildStage::Testing;
        let variant_dir = self.config.variants_dir().join(variant);
        let build_policy = if options.force_rebuild { "package" } else { "missing" };

        let mut passed = Vec::new();
        for group in self.runner.build_order(&variant_dir).await? {
            for reference in group {
                if self.runner.test_package(&reference, build_policy, &[]).await? {
                    report.tested.push(reference.clone());
                    passed.push(PackageStatus {
                        reference,
                        built: true,
                        package_ids: Vec::new(),
                    });
                } else {
                    report.test_failures.push(reference);
                    self.clean_packages(&passed).await;
                    return Ok(());
                }
            }
        }
        self.clean_packages(&passed).await;
        Ok(())
    }
}
