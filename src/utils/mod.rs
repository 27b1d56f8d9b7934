//! Small shared helpers.

pub mod progress;

pub use progress::ProgressBar;
