//! Change detection against a git reference.
//!
//! A package is directly changed when its `conanfile.py` differs from the
//! reference commit. The changed *set* is the closure of those packages over
//! the inverse requirement edges: a dependent of a changed package pins a
//! reference that is now stale, so it is changed too.
//!
//! For every directly changed recipe the reference commit's version and
//! revision are read back (`git show <ref>:<path>`) and recorded as the
//! recipe's head values. If the working-tree revision does not already sit
//! one past the head revision (or at zero after a version change), it is
//! corrected in place - that way a tree that was edited but not bumped gets
//! exactly one bump per run, never two.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::Config;
use crate::git::{self, ChangeStatus};
use crate::graph::DependencyGraph;
use crate::recipe::{self, RECIPE_FILE, TEST_PACKAGE_DIR};
use crate::recipe::document::RecipeDocument;

/// What change detection found.
#[derive(Debug, Default)]
pub struct ChangeReport {
    /// Packages whose recipe file differs from the reference, by name.
    pub modified: Vec<String>,
    /// `modified` closed over the inverse requirement edges.
    pub changed_set: BTreeSet<String>,
    /// Revision corrections applied to modified recipes:
    /// `(package, before, after)` full versions.
    pub corrected: Vec<(String, String, String)>,
}

impl ChangeReport {
    /// Whether nothing differs from the reference.
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
    }
}

/// Diff the working tree against `reference` and mark every directly
/// modified package recipe as changed, recording head values and correcting
/// unbumped revisions. Returns the report with the transitive changed set.
pub async fn detect_changes(
    graph: &mut DependencyGraph,
    config: &Config,
    reference: &str,
) -> Result<ChangeReport> {
    let diff = git::diff_name_status(&config.root, reference).await?;

    // recipes are keyed by package name, which need not match the
    // directory name, so resolve diff paths through the recipe paths
    let by_path: BTreeMap<PathBuf, String> = graph
        .packages
        .values()
        .map(|recipe| (recipe.path().to_path_buf(), recipe.name.clone()))
        .collect();

    let mut report = ChangeReport::default();
    let base_class = &config.settings.recipes.base_class;

    for entry in diff {
        if entry.status != ChangeStatus::Modified {
            continue;
        }
        if entry.path.file_name().and_then(|n| n.to_str()) != Some(RECIPE_FILE) {
            continue;
        }
        if entry.path.iter().any(|part| part == TEST_PACKAGE_DIR) {
            continue;
        }

        let absolute = config.root.join(&entry.path);
        let Some(name) = by_path.get(&absolute) else {
            tracing::debug!("changed {} is not a loaded package", entry.path.display());
            continue;
        };

        let relative = entry.path.to_string_lossy().replace('\\', "/");
        let head_source = git::show_file(&config.root, reference, &relative).await?;
        let recipe = graph.packages.get_mut(name).expect("name came from the map");
        recipe.changed = true;

        let head_doc = RecipeDocument::parse(&head_source, base_class);
        if head_doc.has_declaring_class() {
            match recipe::extract_version(&head_doc, recipe.path()) {
                Ok((version, revision)) => recipe.set_head(version, revision),
                Err(err) => {
                    tracing::warn!("could not read {name} at {reference}: {err:#}");
                }
            }
        } else {
            tracing::warn!("{name} at {reference} has no recognizable recipe class");
        }

        let target = recipe.new_revision();
        if recipe.revision != Some(target) {
            let before = recipe.full_version();
            recipe.set_revision(target)?;
            let after = recipe.full_version();
            tracing::debug!("{name}: changed from {reference}, correcting revision: {before} -> {after}");
            report.corrected.push((name.clone(), before, after));
        }

        report.modified.push(name.clone());
    }

    report.modified.sort_unstable();
    report.changed_set = graph.dependents_closure(report.modified.iter().cloned());
    Ok(report)
}
