//! Shared fixtures for unit and integration tests: recipe sources, package
//! tree layouts, and a minimal git repository wrapper.
//!
//! Available to integration tests through the `test-utils` feature.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// The declaring base class used by all fixtures.
pub const BASE_CLASS: &str = "PlexConanFile";

/// Render a package recipe source with the given fields and pinned
/// requirement references.
pub fn package_recipe(
    name: &str,
    version: &str,
    revision: Option<u32>,
    requires: &[&str],
) -> String {
    let mut source = String::new();
    source.push_str("from conans import PlexConanFile\n\n\n");
    source.push_str(&format!("class {}Conan(PlexConanFile):\n", camel(name)));
    source.push_str(&format!("    name = \"{name}\"\n"));
    source.push_str(&format!("    plex_version = \"{version}\"\n"));
    if let Some(rev) = revision {
        source.push_str(&format!("    plex_revision = {rev}\n"));
    }
    source.push_str("    settings = \"os\", \"arch\"\n");
    match requires {
        [] => {}
        [single] => source.push_str(&format!("    plex_requires = \"{single}\"\n")),
        many => {
            let joined =
                many.iter().map(|r| format!("\"{r}\"")).collect::<Vec<_>>().join(", ");
            source.push_str(&format!("    plex_requires = ({joined})\n"));
        }
    }
    source.push_str("\n    def build(self):\n        pass\n");
    source
}

/// Render a variant recipe source.
pub fn variant_recipe(name: &str, requires: &[&str]) -> String {
    let mut source = String::new();
    source.push_str("from conans import PlexConanFile\n\n\n");
    source.push_str(&format!("class {}Variant(PlexConanFile):\n", camel(name)));
    source.push_str(&format!("    name = \"{name}\"\n"));
    let joined = requires.iter().map(|r| format!("\"{r}\"")).collect::<Vec<_>>().join(", ");
    source.push_str(&format!("    plex_requires = ({joined},)\n"));
    source
}

fn camel(name: &str) -> String {
    name.split(['-', '_'])
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Write a recipe under `<root>/<dir>/conanfile.py`, creating directories.
/// Returns the recipe path.
pub fn write_recipe(root: &Path, dir: &str, source: &str) -> PathBuf {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("conanfile.py");
    std::fs::write(&path, source).unwrap();
    path
}

/// A temp directory with an initialized git repository inside.
pub struct GitFixture {
    dir: TempDir,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = Self { dir };
        fixture.git(&["init", "-q", "-b", "main"]);
        fixture.git(&["config", "user.email", "tests@depforge.invalid"]);
        fixture.git(&["config", "user.name", "depforge tests"]);
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the repository root.
    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Stage everything and commit.
    pub fn commit(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
    }

    /// Create a branch at the current commit.
    pub fn branch(&self, name: &str) {
        self.git(&["branch", name]);
    }

    fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {args:?} failed");
    }
}

impl Default for GitFixture {
    fn default() -> Self {
        Self::new()
    }
}
