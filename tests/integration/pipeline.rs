//! End-to-end resolution over a real git repository: edit a recipe, detect
//! the change, resolve, and verify what landed on disk.

use depforge::config::Config;
use depforge::graph::DependencyGraph;
use depforge::graph::changes::detect_changes;
use depforge::resolver::{self, ResolveOptions};
use depforge::test_utils::{GitFixture, package_recipe, variant_recipe};
use std::collections::BTreeMap;

/// zlib <- libpng <- libwebp, with a desktop variant aggregating all three.
fn seed_tree(fixture: &GitFixture) {
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]),
    );
    fixture.write(
        "packages/libpng/conanfile.py",
        &package_recipe("libpng", "1.6.37", Some(2), &["zlib/1.2.8-3"]),
    );
    fixture.write(
        "packages/libwebp/conanfile.py",
        &package_recipe("libwebp", "1.2.0", Some(0), &["libpng/1.6.37-2", "zlib/1.2.8-3"]),
    );
    fixture.write(
        "variants/desktop/conanfile.py",
        &variant_recipe("desktop", &["zlib/1.2.8-3", "libpng/1.6.37-2", "libwebp/1.2.0-0"]),
    );
    fixture.commit("initial tree");
}

async fn detect_and_resolve(
    fixture: &GitFixture,
    options: &ResolveOptions,
) -> (DependencyGraph, resolver::ResolveOutcome) {
    let config = Config::load(fixture.path()).unwrap();
    let mut graph = DependencyGraph::load(&config).unwrap();
    detect_changes(&mut graph, &config, "HEAD").await.unwrap();
    let outcome = resolver::resolve(&mut graph, options).unwrap();
    (graph, outcome)
}

#[tokio::test]
async fn edited_package_propagates_through_the_tree() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);

    // edit zlib's build step without bumping anything
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );

    let (_, outcome) = detect_and_resolve(&fixture, &ResolveOptions::default()).await;
    assert_eq!(outcome.saved_packages, vec!["libpng", "libwebp", "zlib"]);
    assert_eq!(outcome.saved_variants, vec!["desktop"]);

    let read = |path: &str| std::fs::read_to_string(fixture.path().join(path)).unwrap();

    // zlib got the corrected revision, dependents one bump each, and every
    // pin follows the new revisions
    assert!(read("packages/zlib/conanfile.py").contains("plex_revision = 4"));
    let libpng = read("packages/libpng/conanfile.py");
    assert!(libpng.contains("plex_revision = 3"));
    assert!(libpng.contains("zlib/1.2.8-4"));
    let libwebp = read("packages/libwebp/conanfile.py");
    assert!(libwebp.contains("plex_revision = 1"));
    assert!(libwebp.contains("zlib/1.2.8-4"));
    assert!(libwebp.contains("libpng/1.6.37-3"));
    let desktop = read("variants/desktop/conanfile.py");
    assert!(desktop.contains("zlib/1.2.8-4"));
    assert!(desktop.contains("libpng/1.6.37-3"));
    assert!(desktop.contains("libwebp/1.2.0-1"));
}

#[tokio::test]
async fn resolution_is_idempotent_on_disk() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );

    let (_, first) = detect_and_resolve(&fixture, &ResolveOptions::default()).await;
    assert!(!first.is_noop());

    // the tree is now at the fixed point relative to the same reference:
    // the second run must not rewrite, bump, or save anything new
    let (_, second) = detect_and_resolve(&fixture, &ResolveOptions::default()).await;
    assert!(second.rewrites.is_empty());
    assert!(second.bumps.is_empty());
    assert!(second.saved_packages.is_empty());
    assert!(second.saved_variants.is_empty());
}

#[tokio::test]
async fn version_change_resets_the_chain_correctly() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.11", Some(3), &[]),
    );

    let (graph, _) = detect_and_resolve(&fixture, &ResolveOptions::default()).await;

    // new version starts at revision zero; dependents keep their version
    // and move one revision forward
    assert_eq!(graph.packages["zlib"].package_ref(), "zlib/1.2.11-0");
    assert_eq!(graph.packages["libpng"].package_ref(), "libpng/1.6.37-3");

    let libpng =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert!(libpng.contains("zlib/1.2.11-0"));
    assert!(!libpng.contains("zlib/1.2.8"));
}

#[tokio::test]
async fn seeded_revisions_take_precedence() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );

    // the artifact store already has 1.2.8-9 published, so the next free
    // revision for zlib is 10 and the resolver must not fall back to 4
    let options = ResolveOptions {
        seeds: BTreeMap::from([
            ("zlib".to_string(), 10),
            ("libpng".to_string(), 5),
            ("libwebp".to_string(), 2),
        ]),
        ..Default::default()
    };
    let (graph, _) = detect_and_resolve(&fixture, &options).await;

    assert_eq!(graph.packages["zlib"].package_ref(), "zlib/1.2.8-10");
    assert_eq!(graph.packages["libpng"].package_ref(), "libpng/1.6.37-5");
    assert_eq!(graph.packages["libwebp"].package_ref(), "libwebp/1.2.0-2");

    let libwebp =
        std::fs::read_to_string(fixture.path().join("packages/libwebp/conanfile.py")).unwrap();
    assert!(libwebp.contains("zlib/1.2.8-10"));
    assert!(libwebp.contains("libpng/1.6.37-5"));
}

#[tokio::test]
async fn untouched_formatting_survives_resolution() {
    let fixture = GitFixture::new();
    let source = "\
import os  # noqa

from conans import PlexConanFile


class LibpngConan(PlexConanFile):
    name = \"libpng\"
    plex_version = \"1.6.37\"
    plex_revision = 2

    # keep zlib pinned tightly
    plex_requires = (\"zlib/1.2.8-2\",)

    def build(self):
        self.run(\"make VERBOSE=1\")   # trailing comment
";
    fixture.write("packages/zlib/conanfile.py", &package_recipe("zlib", "1.2.8", Some(3), &[]));
    fixture.write("packages/libpng/conanfile.py", source);
    fixture.commit("initial");

    let (_, outcome) = detect_and_resolve(&fixture, &ResolveOptions::default()).await;
    assert_eq!(outcome.saved_packages, vec!["libpng"]);

    let expected = source
        .replace("zlib/1.2.8-2", "zlib/1.2.8-3")
        .replace("plex_revision = 2", "plex_revision = 3");
    let on_disk =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert_eq!(on_disk, expected);
}

#[tokio::test]
async fn bump_all_rolls_the_whole_tree_forward() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);

    let options = ResolveOptions { bump_all: true, ..Default::default() };
    let (graph, outcome) = detect_and_resolve(&fixture, &options).await;

    assert_eq!(graph.packages["zlib"].package_ref(), "zlib/1.2.8-4");
    assert_eq!(graph.packages["libpng"].package_ref(), "libpng/1.6.37-3");
    assert_eq!(graph.packages["libwebp"].package_ref(), "libwebp/1.2.0-1");
    assert_eq!(outcome.saved_packages.len(), 3);
}

#[tokio::test]
async fn dry_run_leaves_the_repository_untouched() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );
    let before =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();

    let options = ResolveOptions { dry_run: true, ..Default::default() };
    let (_, outcome) = detect_and_resolve(&fixture, &options).await;

    assert!(outcome.pending > 0);
    let after =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert_eq!(before, after);
}
