//! Progress reporting for long-running stages.
//!
//! A thin wrapper around `indicatif` that turns itself off when
//! `DEPFORGE_NO_PROGRESS` is set (the `--no-progress` flag) or when stderr
//! is not a terminal, so CI logs stay clean. Every method is a no-op in
//! that state - call sites never need to branch.

use indicatif::ProgressStyle;
use std::io::IsTerminal;
use std::time::Duration;

/// Environment variable that disables all progress output.
pub const ENV_NO_PROGRESS: &str = "DEPFORGE_NO_PROGRESS";

fn enabled() -> bool {
    std::env::var_os(ENV_NO_PROGRESS).is_none() && std::io::stderr().is_terminal()
}

/// A progress bar or spinner, possibly suppressed.
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// A bar counting up to `len` items.
    pub fn new(len: u64) -> Self {
        if !enabled() {
            return Self { bar: None };
        }
        let bar = indicatif::ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .expect("static template")
                .progress_chars("=> "),
        );
        Self { bar: Some(bar) }
    }

    /// An indeterminate spinner with a message.
    pub fn spinner(message: impl Into<String>) -> Self {
        if !enabled() {
            return Self { bar: None };
        }
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}").expect("static template"),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.into());
        }
    }

    pub fn inc(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
