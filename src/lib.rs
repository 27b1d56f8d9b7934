//! depforge - dependency-version and build orchestration for the internal
//! conan package tree.
//!
//! The package tree is a repository of conan recipes (`packages/*/conanfile.py`)
//! plus build variants (`variants/*/conanfile.py`) that aggregate them. Every
//! recipe pins its requirements to exact `name/version-revision` references,
//! so changing one package means rewriting the pinned references of every
//! transitive dependent and bumping their revisions. depforge automates that:
//!
//! - [`recipe`] parses a recipe into a structural document that can be edited
//!   field-by-field and written back byte-identical everywhere else
//! - [`graph`] loads the whole tree, resolves requirement names into graph
//!   edges, and detects which packages changed relative to a git reference
//! - [`resolver`] propagates reference rewrites and revision bumps through
//!   dependents until the tree reaches a fixed point
//! - [`remote`] asks the artifact store which revisions are already published
//!   and computes the next safe one per package
//! - [`build`] sequences export, install, test, and upload of a build variant
//!   through the conan binary
//!
//! The [`cli`] module wires these into the `depforge` command:
//!
//! ```bash
//! depforge changed              # what did I touch (plus everything downstream)?
//! depforge versions             # rewrite requirement refs to current versions
//! depforge revisions            # bump revisions (next free one per the remotes)
//! depforge build --variant auto # export, build, test, upload
//! ```

pub mod build;
pub mod cli;
pub mod config;
pub mod core;
pub mod git;
pub mod graph;
pub mod recipe;
pub mod remote;
pub mod resolver;
pub mod utils;

// Fixture helpers shared by unit and integration tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
