//! Smoke tests for the `depforge` binary over fixture repositories.

use assert_cmd::Command;
use depforge::test_utils::{GitFixture, package_recipe, variant_recipe};
use predicates::prelude::*;

fn depforge() -> Command {
    Command::cargo_bin("depforge").unwrap()
}

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
        "variants/desktop/conanfile.py",
        &variant_recipe("desktop", &["zlib/1.2.8-3", "libpng/1.6.37-2"]),
    );
    fixture.commit("initial tree");
}

#[test]
fn changed_reports_a_clean_tree() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);

    depforge()
        .current_dir(fixture.path())
        .args(["changed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No packages changed"));
}

#[test]
fn changed_prints_the_dependents_tree() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );

    depforge()
        .current_dir(fixture.path())
        .args(["changed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zlib/1.2.8-4"))
        .stdout(predicate::str::contains("└── libpng/1.6.37-2"));
}

#[test]
fn tree_renders_both_directions() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);

    depforge()
        .current_dir(fixture.path())
        .args(["tree", "zlib"])
        .assert()
        .success()
        .stdout(predicate::str::contains("└── libpng/1.6.37-2"));

    depforge()
        .current_dir(fixture.path())
        .args(["tree", "--requires", "libpng"])
        .assert()
        .success()
        .stdout(predicate::str::contains("└── zlib/1.2.8-3"));
}

#[test]
fn versions_rewrites_stale_references_without_bumping() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    // zlib moved ahead; libpng still pins the old revision
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(4), &[]),
    );
    fixture.commit("zlib ahead");

    depforge()
        .current_dir(fixture.path())
        .args(["versions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zlib/1.2.8-3 -> zlib/1.2.8-4"));

    let libpng =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert!(libpng.contains("zlib/1.2.8-4"));
    // no revision bump from the versions command
    assert!(libpng.contains("plex_revision = 2"));
}

#[test]
fn revisions_local_bumps_and_reaches_a_fixed_point() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write(
        "packages/zlib/conanfile.py",
        &package_recipe("zlib", "1.2.8", Some(3), &[]).replace("pass", "self.run(\"make\")"),
    );

    // a stale tree fails the dry run
    depforge()
        .current_dir(fixture.path())
        .args(["revisions", "--local", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not all versions are updated"));

    depforge()
        .current_dir(fixture.path())
        .args(["revisions", "--local", "--no-export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zlib: 1.2.8-3 -> 1.2.8-4"));

    let libpng =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert!(libpng.contains("zlib/1.2.8-4"));
    assert!(libpng.contains("plex_revision = 3"));
    let desktop =
        std::fs::read_to_string(fixture.path().join("variants/desktop/conanfile.py")).unwrap();
    assert!(desktop.contains("libpng/1.6.37-3"));

    // once resolved, the dry run passes
    depforge()
        .current_dir(fixture.path())
        .args(["revisions", "--local", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Everything is up to date"));
}

#[test]
fn revisions_bump_all_touches_every_package() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);

    depforge()
        .current_dir(fixture.path())
        .args(["revisions", "--local", "--bump", "all", "--no-export"])
        .assert()
        .success();

    let zlib =
        std::fs::read_to_string(fixture.path().join("packages/zlib/conanfile.py")).unwrap();
    assert!(zlib.contains("plex_revision = 4"));
    let libpng =
        std::fs::read_to_string(fixture.path().join("packages/libpng/conanfile.py")).unwrap();
    assert!(libpng.contains("plex_revision = 3"));
}

#[test]
fn missing_package_tree_fails_with_a_clear_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    depforge()
        .current_dir(tmp.path())
        .args(["changed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no package tree found"));
}

#[test]
fn malformed_recipe_aborts_the_whole_load() {
    let fixture = GitFixture::new();
    seed_tree(&fixture);
    fixture.write("packages/broken/conanfile.py", "class Broken(ConanFile):\n    pass\n");

    depforge()
        .current_dir(fixture.path())
        .args(["tree", "zlib"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed recipe"));
}
