// src/transaction/mod.rs

//! Plan execution with rollback
//!
//! Carries an evaluated `ImagePlan` through its remaining states:
//!
//! ```text
//! EVALUATED -> PREEXECUTED -> EXECUTING -> EXECUTED_OK
//!                                       \-> EXECUTED_ERROR (rolled back)
//! ```
//!
//! - **Preexecute** downloads and verifies every payload; it never touches
//!   the image.
//! - **Execute** applies actions under a journal with backup-before-overwrite
//!   and commits the installed set in one SQLite transaction.
//! - **run_transition** wraps both in a boot-environment snapshot that is
//!   activated on success and restored on any failure, panics included.

mod apply;
mod download;
mod journal;
mod recovery;

pub use journal::{JournalRecord, TransactionJournal, find_incomplete_journals};
pub use recovery::{RecoveryOutcome, recover};

use crate::bootenv::{self, BootEnvironment};
use crate::db::paths;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::manifest;
use crate::plan::{ImagePlan, PlanState};
use crate::progress::ProgressTracker;
use std::fs::{self, File};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Move a file or symlink, falling back to copy+sync+delete across filesystems
pub(crate) fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Cross-filesystem move detected ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            let meta = fs::symlink_metadata(src)?;
            if meta.file_type().is_symlink() {
                std::os::unix::fs::symlink(fs::read_link(src)?, dst)?;
            } else {
                fs::copy(src, dst)?;
                File::open(dst)?.sync_all()?;
            }

            if let Some(parent) = dst.parent()
                && let Ok(dir) = File::open(parent)
            {
                let _ = dir.sync_all();
            }

            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

/// What a transition does, for journaling and boot-environment handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Install,
    Uninstall,
    ImageUpdate,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Install => "install",
            TransitionKind::Uninstall => "uninstall",
            TransitionKind::ImageUpdate => "image-update",
        }
    }
}

/// Options for controlling execution
#[derive(Default, Clone)]
pub struct ExecOptions {
    /// Cancel token - set to true to request cancellation
    pub cancel: Option<Arc<AtomicBool>>,
    /// Progress tracker for downloads and applied actions
    pub progress: Option<Arc<dyn ProgressTracker>>,
    /// Recorded with the transition; defaults to the kind
    pub kind: Option<TransitionKind>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return Cancelled error if cancellation requested
    fn check_cancelled(&self, phase: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(phase.to_string()))
        } else {
            Ok(())
        }
    }

    fn progress(&self) -> Option<&dyn ProgressTracker> {
        self.progress.as_deref()
    }
}

/// Result of a successful execution
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Journal id of the execution; `None` when nothing ran
    pub tx_uuid: Option<String>,
    pub installed: usize,
    pub updated: usize,
    pub removed: usize,
    /// Search index failure after the installed set was committed
    pub index_warning: Option<Error>,
}

impl ExecutionOutcome {
    pub fn executed(&self) -> bool {
        self.tx_uuid.is_some()
    }
}

/// Execute the image's current plan inside a boot-environment snapshot
///
/// The plan is taken out of `image.imageplan` and consumed. A plan with
/// nothing to do, or one made with `noexecute`, returns without touching
/// the image.
pub fn run_transition(
    image: &mut Image,
    kind: TransitionKind,
    opts: &ExecOptions,
) -> Result<ExecutionOutcome> {
    let mut plan = image
        .imageplan
        .take()
        .ok_or_else(|| Error::TransactionError("no image plan to execute".to_string()))?;
    plan.require_state(PlanState::Evaluated)?;

    if plan.nothingtodo() {
        info!("No updates available for this image");
        return Ok(ExecutionOutcome::default());
    }
    if plan.noexecute() {
        debug!("Plan evaluated without execution");
        return Ok(ExecutionOutcome::default());
    }

    let mut be = bootenv::select(image.root());
    be.init_image_recovery()?;

    let mut opts = opts.clone();
    opts.kind = Some(kind);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        plan.preexecute(image, &opts)?;
        plan.execute(image, &opts)
    }));

    if let Err(e) = cleanup_downloads(image.meta_dir()) {
        warn!("Failed to clean up downloads: {}", e);
    }

    match result {
        Ok(Ok(outcome)) => {
            activate(be.as_mut(), kind)?;
            if let Err(e) = cleanup_cached_content(image, &plan) {
                warn!("Failed to clean up cached content: {}", e);
            }
            Ok(outcome)
        }
        Ok(Err(e)) => {
            restore(be.as_mut(), kind);
            Err(e)
        }
        Err(payload) => {
            restore(be.as_mut(), kind);
            panic::resume_unwind(payload)
        }
    }
}

fn activate(be: &mut dyn BootEnvironment, kind: TransitionKind) -> Result<()> {
    match kind {
        TransitionKind::ImageUpdate => be.activate_image(),
        _ => be.activate_install_uninstall(),
    }
}

fn restore(be: &mut dyn BootEnvironment, kind: TransitionKind) {
    let result = match kind {
        TransitionKind::ImageUpdate => be.restore_image(),
        _ => be.restore_install_uninstall(),
    };
    if let Err(e) = result {
        warn!("Failed to restore boot environment: {}", e);
    }
}

/// Remove staged payloads
pub fn cleanup_downloads(meta_dir: &Path) -> Result<()> {
    let dir = paths::download_dir(meta_dir);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;
    Ok(())
}

/// Drop cached manifests of package versions the plan replaced or removed
pub fn cleanup_cached_content(image: &Image, plan: &ImagePlan) -> Result<()> {
    let mut removed = 0;
    for pkg in plan.pkg_plans() {
        if let Some(origin) = &pkg.origin
            && pkg.destination.as_ref() != Some(origin)
        {
            let prefix = image.cache_prefix(origin)?;
            manifest::cache::remove(image.meta_dir(), &prefix, origin)?;
            removed += 1;
        }
    }
    debug!("Removed {} superseded manifest(s)", removed);
    Ok(())
}
