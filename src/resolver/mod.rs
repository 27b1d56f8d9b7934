//! Local revision resolution.
//!
//! Brings every pinned requirement reference in the tree up to date with the
//! current `name/version-revision` of its dependency, bumping a recipe's own
//! revision the first time one of its references has to be rewritten. A bump
//! makes the recipe's *own* reference stale in everything that requires it,
//! so the pass is repeated over the dependents of whatever was rewritten
//! until an iteration rewrites nothing.
//!
//! The loop terminates only on an acyclic requirement graph, so
//! [`resolve`] refuses to start when a cycle exists and additionally caps
//! the iteration count at one pass per package.
//!
//! Variants are handled in a simpler final step: their references are
//! rewritten to the final package versions, but a variant never causes a
//! revision bump anywhere (they are sinks in the graph).

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::DepforgeError;
use crate::graph::DependencyGraph;
use crate::recipe::Recipe;

/// One pinned reference rewritten inside a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// The recipe whose file was edited.
    pub package: String,
    pub old_ref: String,
    pub new_ref: String,
}

/// One recipe revision change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionBump {
    pub package: String,
    /// Full version before (`1.2.8-3`).
    pub before: String,
    /// Full version after (`1.2.8-4`, or `2.0.0-0` after a version change).
    pub after: String,
}

/// Inputs for a resolution run.
#[derive(Debug, Default)]
pub struct ResolveOptions {
    /// Revisions to apply up front, e.g. the next free revision per package
    /// as reported by the artifact store, or values derived from local
    /// history. Seeded recipes are marked changed and are not bumped a
    /// second time when their references are rewritten later.
    pub seeds: BTreeMap<String, u32>,
    /// Force every package to its next revision before the first pass.
    pub bump_all: bool,
    /// Compute everything but write nothing to disk.
    pub dry_run: bool,
}

/// What a resolution run did (or, on a dry run, would do).
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub rewrites: Vec<Rewrite>,
    pub bumps: Vec<RevisionBump>,
    /// Package names whose files were written.
    pub saved_packages: Vec<String>,
    /// Variant names whose files were written.
    pub saved_variants: Vec<String>,
    /// Recipes that differ from their on-disk form. On a dry run this is
    /// the count of files a real run would write.
    pub pending: usize,
}

impl ResolveOutcome {
    /// True when the tree was already at the fixed point.
    pub fn is_noop(&self) -> bool {
        self.rewrites.is_empty() && self.bumps.is_empty() && self.pending == 0
    }
}

/// Run revision resolution over the whole graph until the fixed point.
pub fn resolve(graph: &mut DependencyGraph, options: &ResolveOptions) -> Result<ResolveOutcome> {
    graph.ensure_acyclic()?;

    let mut outcome = ResolveOutcome::default();

    for (name, revision) in &options.seeds {
        let Some(recipe) = graph.packages.get_mut(name) else {
            tracing::warn!("wanted to set the revision of {name}, but it is not loaded");
            continue;
        };
        apply_revision(recipe, *revision, &mut outcome.bumps)?;
    }

    if options.bump_all {
        for (name, recipe) in &mut graph.packages {
            if !options.seeds.contains_key(name) {
                let revision = recipe.new_revision();
                apply_revision(recipe, revision, &mut outcome.bumps)?;
            }
        }
    }

    // pass 1 covers every package; later passes only the dependents of
    // whatever the previous pass rewrote, since only their pins went stale
    let all_names: Vec<String> = graph.packages.keys().cloned().collect();
    let mut rewritten = process_packages(graph, &all_names, &mut outcome)?;

    let max_iterations = graph.packages.len() + 1;
    let mut iterations = 0usize;
    while !rewritten.is_empty() {
        iterations += 1;
        if iterations > max_iterations {
            return Err(DepforgeError::DependencyCycle {
                cycle: format!(
                    "resolution did not converge after {max_iterations} passes (last: {})",
                    rewritten.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            }
            .into());
        }

        let mut dependents: BTreeSet<String> = BTreeSet::new();
        for name in &rewritten {
            if let Some(recipe) = graph.packages.get(name) {
                dependents.extend(recipe.required_by.iter().cloned());
            }
        }
        let dependents: Vec<String> = dependents.into_iter().collect();
        rewritten = process_packages(graph, &dependents, &mut outcome)?;
    }

    update_variant_refs(graph, &mut outcome.rewrites);

    finalize(graph, options.dry_run, &mut outcome)?;
    Ok(outcome)
}

/// Rewrite stale requirement references in every package recipe and variant
/// recipe, without touching any revision. Saves what changed.
pub fn update_versions(graph: &mut DependencyGraph, dry_run: bool) -> Result<ResolveOutcome> {
    let mut outcome = ResolveOutcome::default();

    let names: Vec<String> = graph.packages.keys().cloned().collect();
    for name in &names {
        for (dep, dep_ref) in loaded_requirement_refs(graph, name) {
            let recipe = graph.packages.get_mut(name).expect("name came from the map");
            for (old_ref, new_ref) in recipe.rewrite_requirement_ref(&dep, &dep_ref) {
                outcome.rewrites.push(Rewrite { package: name.clone(), old_ref, new_ref });
            }
        }
    }
    update_variant_refs(graph, &mut outcome.rewrites);

    finalize(graph, dry_run, &mut outcome)?;
    Ok(outcome)
}

/// Rewrite references in a standalone variant recipe (one passed on the
/// command line rather than living under the variants directory) to the
/// current package versions. The caller saves it.
pub fn update_extra_variant(recipe: &mut Recipe, graph: &DependencyGraph) -> Vec<Rewrite> {
    let mut rewrites = Vec::new();
    for dep in graph.packages.values() {
        let dep_ref = dep.package_ref();
        for (old_ref, new_ref) in recipe.rewrite_requirement_ref(&dep.name, &dep_ref) {
            rewrites.push(Rewrite { package: recipe.name.clone(), old_ref, new_ref });
        }
    }
    rewrites
}

/// Set a recipe's revision, recording the bump and marking it changed.
fn apply_revision(recipe: &mut Recipe, revision: u32, bumps: &mut Vec<RevisionBump>) -> Result<()> {
    if recipe.revision != Some(revision) {
        let before = recipe.full_version();
        recipe.set_revision(revision)?;
        bumps.push(RevisionBump {
            package: recipe.name.clone(),
            before,
            after: recipe.full_version(),
        });
    }
    recipe.changed = true;
    Ok(())
}

/// Current `package_ref` of every loaded requirement of `name`.
fn loaded_requirement_refs(graph: &DependencyGraph, name: &str) -> Vec<(String, String)> {
    let Some(recipe) = graph.packages.get(name) else {
        return Vec::new();
    };
    recipe
        .requirements
        .values()
        .filter(|req| req.is_loaded())
        .filter_map(|req| {
            graph
                .packages
                .get(req.name())
                .map(|dep| (dep.name.clone(), dep.package_ref()))
        })
        .collect()
}

/// Run the per-package rewrite pass over `names`, returning the set that was
/// actually rewritten (and therefore had, or now has, a bumped revision).
fn process_packages(
    graph: &mut DependencyGraph,
    names: &[String],
    outcome: &mut ResolveOutcome,
) -> Result<BTreeSet<String>> {
    let mut rewritten = BTreeSet::new();

    for name in names {
        let refs = loaded_requirement_refs(graph, name);
        let mut touched = false;
        for (dep, dep_ref) in refs {
            let recipe = graph.packages.get_mut(name).expect("name came from the graph");
            for (old_ref, new_ref) in recipe.rewrite_requirement_ref(&dep, &dep_ref) {
                tracing::debug!("{name}: {old_ref} -> {new_ref}");
                outcome.rewrites.push(Rewrite { package: name.clone(), old_ref, new_ref });
                touched = true;
            }
        }
        if touched {
            let recipe = graph.packages.get_mut(name).expect("name came from the graph");
            // the first rewrite in a run bumps the recipe itself; seeded or
            // change-detected recipes already carry their new revision
            if !recipe.changed {
                let revision = recipe.new_revision();
                apply_revision(recipe, revision, &mut outcome.bumps)?;
            }
            rewritten.insert(name.clone());
        }
    }
    Ok(rewritten)
}

fn update_variant_refs(graph: &mut DependencyGraph, rewrites: &mut Vec<Rewrite>) {
    let refs: BTreeMap<String, String> = graph
        .packages
        .values()
        .map(|recipe| (recipe.name.clone(), recipe.package_ref()))
        .collect();

    for variant in graph.variants.values_mut() {
        let deps: Vec<&String> = refs
            .keys()
            .filter(|name| variant.requirements.contains_key(*name))
            .collect();
        for dep in deps {
            for (old_ref, new_ref) in variant.rewrite_requirement_ref(dep, &refs[dep]) {
                tracing::debug!("{}: {old_ref} -> {new_ref}", variant.name);
                rewrites.push(Rewrite {
                    package: variant.name.clone(),
                    old_ref,
                    new_ref,
                });
            }
        }
    }
}

/// Count dirty recipes and, unless this is a dry run, write them out.
fn finalize(graph: &mut DependencyGraph, dry_run: bool, outcome: &mut ResolveOutcome) -> Result<()> {
    let dirty_packages: Vec<String> = graph
        .packages
        .iter()
        .filter(|(_, recipe)| recipe.is_dirty())
        .map(|(name, _)| name.clone())
        .collect();
    let dirty_variants: Vec<String> = graph
        .variants
        .iter()
        .filter(|(_, recipe)| recipe.is_dirty())
        .map(|(name, _)| name.clone())
        .collect();
    outcome.pending = dirty_packages.len() + dirty_variants.len();

    if dry_run {
        return Ok(());
    }

    for name in dirty_packages {
        let recipe = graph.packages.get_mut(&name).expect("dirty name came from the map");
        if recipe.save()? {
            outcome.saved_packages.push(name);
        }
    }
    for name in dirty_variants {
        let recipe = graph.variants.get_mut(&name).expect("dirty name came from the map");
        if recipe.save()? {
            outcome.saved_variants.push(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::{package_recipe, variant_recipe, write_recipe};
    use tempfile::TempDir;

    fn tree_with(
        packages: &[(&str, &str, Option<u32>, &[&str])],
        variants: &[(&str, &[&str])],
    ) -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        for (name, version, revision, requires) in packages {
            write_recipe(
                tmp.path(),
                &format!("packages/{name}"),
                &package_recipe(name, version, *revision, requires),
            );
        }
        std::fs::create_dir_all(tmp.path().join("variants")).unwrap();
        for (name, requires) in variants {
            write_recipe(
                tmp.path(),
                &format!("variants/{name}"),
                &variant_recipe(name, requires),
            );
        }
        let config = Config::load(tmp.path()).unwrap();
        (tmp, config)
    }

    #[test]
    fn up_to_date_tree_is_a_noop() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();
        assert!(outcome.is_noop());
    }

    #[test]
    fn stale_reference_is_rewritten_and_dependent_bumped() {
        // zlib is at 1.2.8-3 but libpng still pins 1.2.8-2
        let (tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-2"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();

        assert_eq!(
            outcome.rewrites,
            vec![Rewrite {
                package: "libpng".to_string(),
                old_ref: "zlib/1.2.8-2".to_string(),
                new_ref: "zlib/1.2.8-3".to_string(),
            }]
        );
        assert_eq!(
            outcome.bumps,
            vec![RevisionBump {
                package: "libpng".to_string(),
                before: "1.6.37-2".to_string(),
                after: "1.6.37-3".to_string(),
            }]
        );
        let libpng = &graph.packages["libpng"];
        assert!(libpng.changed);
        assert_eq!(libpng.revision, Some(3));
        assert_eq!(outcome.saved_packages, vec!["libpng"]);

        let on_disk =
            std::fs::read_to_string(tmp.path().join("packages/libpng/conanfile.py")).unwrap();
        assert!(on_disk.contains("zlib/1.2.8-3"));
        assert!(on_disk.contains("plex_revision = 3"));
    }

    #[test]
    fn bumps_propagate_transitively_to_the_fixed_point() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(4), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
                ("libwebp", "1.2.0", Some(0), &["libpng/1.6.37-2"]),
                ("player", "3.1", Some(7), &["libwebp/1.2.0-0"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();

        // every dependent down the chain got exactly one bump
        assert_eq!(graph.packages["libpng"].revision, Some(3));
        assert_eq!(graph.packages["libwebp"].revision, Some(1));
        assert_eq!(graph.packages["player"].revision, Some(8));
        assert_eq!(outcome.bumps.len(), 3);

        // and their references point at the bumped versions
        let on_disk = graph.packages["player"].package_ref();
        assert_eq!(on_disk, "player/3.1-8");
        assert_eq!(
            outcome.rewrites.last().unwrap(),
            &Rewrite {
                package: "player".to_string(),
                old_ref: "libwebp/1.2.0-0".to_string(),
                new_ref: "libwebp/1.2.0-1".to_string(),
            }
        );
    }

    #[test]
    fn second_run_reaches_the_same_fixed_point() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(4), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
                ("libwebp", "1.2.0", Some(0), &["libpng/1.6.37-2"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        resolve(&mut graph, &ResolveOptions::default()).unwrap();

        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();
        assert!(outcome.is_noop());
    }

    #[test]
    fn diamond_dependents_are_bumped_once() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(4), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
                ("freetype", "2.11", Some(1), &["zlib/1.2.8-3"]),
                ("harfbuzz", "3.0", Some(5), &["libpng/1.6.37-2", "freetype/2.11-1"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();

        let harfbuzz_bumps =
            outcome.bumps.iter().filter(|b| b.package == "harfbuzz").count();
        assert_eq!(harfbuzz_bumps, 1);
        assert_eq!(graph.packages["harfbuzz"].revision, Some(6));

        // both pins were rewritten even though the bump happened once: the
        // freetype pin in the first pass, the libpng pin once libpng's own
        // bump landed in a later pass
        let refs: Vec<&str> = outcome
            .rewrites
            .iter()
            .filter(|r| r.package == "harfbuzz")
            .map(|r| r.new_ref.as_str())
            .collect();
        assert_eq!(refs, vec!["freetype/2.11-2", "libpng/1.6.37-3"]);
    }

    #[test]
    fn seeds_override_revisions_without_further_bumps() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let options = ResolveOptions {
            seeds: BTreeMap::from([
                ("zlib".to_string(), 7),
                ("libpng".to_string(), 5),
            ]),
            ..Default::default()
        };
        let outcome = resolve(&mut graph, &options).unwrap();

        assert_eq!(graph.packages["zlib"].revision, Some(7));
        // libpng keeps its seeded revision even though its zlib pin was
        // rewritten afterwards
        assert_eq!(graph.packages["libpng"].revision, Some(5));
        assert_eq!(
            outcome.rewrites,
            vec![Rewrite {
                package: "libpng".to_string(),
                old_ref: "zlib/1.2.8-3".to_string(),
                new_ref: "zlib/1.2.8-7".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_seed_names_are_ignored() {
        let (_tmp, config) = tree_with(&[("zlib", "1.2.8", Some(3), &[])], &[]);
        let mut graph = DependencyGraph::load(&config).unwrap();
        let options = ResolveOptions {
            seeds: BTreeMap::from([("openssl".to_string(), 2)]),
            ..Default::default()
        };
        let outcome = resolve(&mut graph, &options).unwrap();
        assert!(outcome.bumps.is_empty());
    }

    #[test]
    fn bump_all_touches_every_package() {
        let (_tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let options = ResolveOptions { bump_all: true, ..Default::default() };
        let outcome = resolve(&mut graph, &options).unwrap();

        assert_eq!(graph.packages["zlib"].revision, Some(4));
        assert_eq!(graph.packages["libpng"].revision, Some(3));
        assert_eq!(outcome.saved_packages, vec!["libpng", "zlib"]);
    }

    #[test]
    fn variants_follow_final_versions_but_never_bump() {
        let (tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(4), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
            ],
            &[("desktop", &["zlib/1.2.8-3", "libpng/1.6.37-2"])],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = resolve(&mut graph, &ResolveOptions::default()).unwrap();

        assert_eq!(outcome.saved_variants, vec!["desktop"]);
        let on_disk =
            std::fs::read_to_string(tmp.path().join("variants/desktop/conanfile.py")).unwrap();
        assert!(on_disk.contains("zlib/1.2.8-4"));
        assert!(on_disk.contains("libpng/1.6.37-3"));
        // only the two packages were bumped
        assert_eq!(outcome.bumps.len(), 1);
        assert_eq!(outcome.bumps[0].package, "libpng");
    }

    #[test]
    fn dry_run_reports_pending_writes_without_writing() {
        let (tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-2"]),
            ],
            &[],
        );
        let before =
            std::fs::read_to_string(tmp.path().join("packages/libpng/conanfile.py")).unwrap();

        let mut graph = DependencyGraph::load(&config).unwrap();
        let options = ResolveOptions { dry_run: true, ..Default::default() };
        let outcome = resolve(&mut graph, &options).unwrap();

        assert_eq!(outcome.pending, 1);
        assert!(outcome.saved_packages.is_empty());
        let after =
            std::fs::read_to_string(tmp.path().join("packages/libpng/conanfile.py")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn cycle_refuses_to_resolve() {
        let (_tmp, config) = tree_with(
            &[
                ("a", "1.0", Some(0), &["b/1.0-0"]),
                ("b", "1.0", Some(0), &["a/1.0-0"]),
            ],
            &[],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let err = resolve(&mut graph, &ResolveOptions::default()).unwrap_err();
        let root = err.downcast_ref::<DepforgeError>().unwrap();
        assert!(matches!(root, DepforgeError::DependencyCycle { .. }));
    }

    #[test]
    fn update_versions_rewrites_without_bumping() {
        let (tmp, config) = tree_with(
            &[
                ("zlib", "1.2.8", Some(3), &[]),
                ("libpng", "1.6.37", Some(2), &["zlib/1.2.8-2"]),
            ],
            &[("desktop", &["libpng/1.6.37-1"])],
        );
        let mut graph = DependencyGraph::load(&config).unwrap();
        let outcome = update_versions(&mut graph, false).unwrap();

        assert!(outcome.bumps.is_empty());
        assert_eq!(graph.packages["libpng"].revision, Some(2));
        assert_eq!(outcome.saved_packages, vec!["libpng"]);
        assert_eq!(outcome.saved_variants, vec!["desktop"]);
        let on_disk =
            std::fs::read_to_string(tmp.path().join("variants/desktop/conanfile.py")).unwrap();
        // the variant follows the on-disk libpng revision, untouched
        assert!(on_disk.contains("libpng/1.6.37-2"));
    }

    #[test]
    fn extra_variant_files_follow_package_versions() {
        let (tmp, config) = tree_with(
            &[("zlib", "1.2.8", Some(4), &[])],
            &[],
        );
        let extra = write_recipe(
            tmp.path(),
            "ci",
            &variant_recipe("nightly", &["zlib/1.2.8-3"]),
        );
        let graph = DependencyGraph::load(&config).unwrap();
        let mut recipe = Recipe::load_variant(&extra, "PlexConanFile").unwrap();
        let rewrites = update_extra_variant(&mut recipe, &graph);
        assert_eq!(rewrites.len(), 1);
        recipe.save().unwrap();
        assert!(std::fs::read_to_string(&extra).unwrap().contains("zlib/1.2.8-4"));
    }
}
