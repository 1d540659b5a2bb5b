// src/lib.rs

//! pkgimage - image packaging client
//!
//! Keeps an installed-software image in step with the catalogs of one or
//! more package authorities, and moves it between states through plans that
//! either apply completely or roll back.
//!
//! # Architecture
//!
//! - Image-first: every operation runs against an explicit `Image` context
//! - Federated catalogs: per-authority catalogs merged into one view
//! - Plans: evaluated once, then preexecuted (download) and executed (apply)
//! - Journaled execution: backups before overwrite, crash recovery on open
//! - Search: a local token index kept current after every transition

pub mod bootenv;
pub mod config;
pub mod db;
mod error;
pub mod fmri;
pub mod image;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod repository;
pub mod search;
pub mod transaction;
pub mod version;

pub use config::{ImageConfig, ImageType};
pub use error::{Error, PERMISSIONS_HINT, REBUILD_INDEX_HINT, Result};
pub use fmri::{Fmri, FmriPattern};
pub use image::{Image, ImageLock, InventoryResult, PkgState, PkgStatus};
pub use plan::{ImagePlan, PlanState};
pub use progress::{
    CallbackProgress, LogProgress, Phase, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use search::{LocalSearch, RemoteSearch, SearchHit};
pub use transaction::{
    ExecOptions, ExecutionOutcome, RecoveryOutcome, TransitionKind, run_transition,
};
pub use version::PkgVersion;
