// src/progress.rs

//! Progress reporting for long-running image operations
//!
//! Catalog refresh, plan evaluation, downloads, execution and index upkeep
//! all report through `ProgressTracker`; the front end decides how to show
//! it. The library ships a silent tracker, a tracing-backed one and one that
//! forwards events to a closure. The CLI adds an indicatif bar.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Stages of an image operation that report progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadCatalogs,
    RefreshCatalogs,
    Evaluate,
    Download,
    Execute,
    UpdateIndex,
    RebuildIndex,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::LoadCatalogs => "Loading catalogs",
            Phase::RefreshCatalogs => "Refreshing catalogs",
            Phase::Evaluate => "Creating plan",
            Phase::Download => "Downloading",
            Phase::Execute => "Executing actions",
            Phase::UpdateIndex => "Updating search index",
            Phase::RebuildIndex => "Rebuilding search index",
        };
        f.write_str(s)
    }
}

/// Receiver of progress reports
///
/// Downloads report from rayon workers, so implementations must be `Sync`.
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Increment progress by the given amount
    fn increment(&self, amount: u64);

    /// Set progress to a specific position
    fn set_position(&self, position: u64);

    /// Set the total (length) of the progress
    fn set_length(&self, length: u64);

    /// Get current position
    fn position(&self) -> u64;

    /// Get total length
    fn length(&self) -> u64;

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);

    /// Finish progress with an error/abandonment message
    fn finish_with_error(&self, message: &str);

    /// Check if progress is finished
    fn is_finished(&self) -> bool;

    /// Begin a phase with a known number of steps
    fn start(&self, phase: Phase, length: u64) {
        self.set_position(0);
        self.set_length(length);
        self.set_message(&phase.to_string());
    }
}

/// Position, length and completion shared by the trackers below
#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    /// Advance by `amount`; returns (old, new) positions
    fn advance(&self, amount: u64) -> (u64, u64) {
        let old = self.position.fetch_add(amount, Ordering::Relaxed);
        (old, old + amount)
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Implements the bookkeeping half of `ProgressTracker` over `self.counters`
macro_rules! counter_accessors {
    () => {
        fn set_position(&self, position: u64) {
            self.counters.position.store(position, Ordering::Relaxed);
        }

        fn set_length(&self, length: u64) {
            self.counters.length.store(length, Ordering::Relaxed);
        }

        fn position(&self) -> u64 {
            self.counters.position()
        }

        fn length(&self) -> u64 {
            self.counters.length()
        }

        fn is_finished(&self) -> bool {
            self.counters.is_finished()
        }
    };
}

/// Tracker that only counts, for quiet runs
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    counter_accessors!();

    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counters.advance(amount);
    }

    fn finish_with_message(&self, _message: &str) {
        self.counters.finish();
    }

    fn finish_with_error(&self, _message: &str) {
        self.counters.finish();
    }
}

/// Reports through tracing, about once per tenth of a phase
///
/// Used when stderr is not a terminal.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    counters: Counters,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Counters::default(),
        }
    }
}

impl ProgressTracker for LogProgress {
    counter_accessors!();

    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let (old, new) = self.counters.advance(amount);
        let length = self.counters.length();
        if length == 0 {
            return;
        }
        let step = (length / 10).max(1);
        if new / step > old / step {
            info!("{}: {}/{} ({}%)", self.name, new, length, new * 100 / length);
        }
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        warn!("{}: {}", self.name, message);
    }
}

/// What a `CallbackProgress` hands to its closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    Position { current: u64, total: u64 },
    Finished(String),
    Error(String),
}

/// Forwards every report to a closure
///
/// For embedders that render progress themselves, and for tests that check
/// the sequence of reports.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    counters: Counters,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            counters: Counters::default(),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    counter_accessors!();

    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn increment(&self, amount: u64) {
        let (_, current) = self.counters.advance(amount);
        (self.callback)(ProgressEvent::Position {
            current,
            total: self.counters.length(),
        });
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }
}
