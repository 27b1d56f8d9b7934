//! Integration test suite for depforge.
//!
//! These tests build temporary git repositories of recipe fixtures and run
//! the full pipeline over them - graph load, change detection, revision
//! resolution, file round-trips - plus CLI smoke tests against the built
//! binary.
//!
//! ```bash
//! cargo test --test integration
//! ```

mod cli;
mod pipeline;
