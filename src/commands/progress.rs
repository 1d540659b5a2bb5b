// src/commands/progress.rs
//! Terminal progress for image operations
//!
//! Renders the library's `ProgressTracker` calls with an indicatif bar when
//! stderr is a terminal, and through the log otherwise.

use indicatif::{ProgressBar, ProgressStyle};
use pkgimage::{LogProgress, ProgressTracker, SilentProgress};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

/// indicatif-backed progress tracker
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg:30} [{bar:40.green/dim}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressTracker for BarProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn length(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

/// Tracker for a command: silent with `quiet`, a bar on a terminal
pub fn tracker(quiet: bool, name: &str) -> Arc<dyn ProgressTracker> {
    if quiet {
        Arc::new(SilentProgress::new())
    } else if std::io::stderr().is_terminal() {
        Arc::new(BarProgress::new())
    } else {
        Arc::new(LogProgress::new(name))
    }
}
