// src/transaction/recovery.rs

//! Recovery of executions interrupted by a crash
//!
//! - Before the installed set is committed: roll back (restore backups,
//!   remove created paths)
//! - After it is committed: roll forward (clean up the work directory)
//!
//! The database is the source of truth for whether the commit happened,
//! since a crash can land between the SQLite commit and the journal record
//! that follows it.

use crate::db::models::Transition;
use crate::db::paths;
use crate::error::Result;
use rusqlite::Connection;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::journal::{JournalRecord, TransactionJournal, find_incomplete_journals};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Changes undone; the installed set was never committed
    RolledBack { tx_uuid: String, reason: String },
    /// The installed set was committed; only cleanup remained
    RolledForward { tx_uuid: String },
    /// Nothing had been changed yet
    Clean { tx_uuid: String },
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RolledBack { tx_uuid, reason } => {
                write!(f, "transaction {tx_uuid} rolled back ({reason})")
            }
            Self::RolledForward { tx_uuid } => write!(f, "transaction {tx_uuid} completed"),
            Self::Clean { tx_uuid } => write!(f, "transaction {tx_uuid} discarded"),
        }
    }
}

/// Recover every incomplete journal in the image's `txn/` directory
pub fn recover(root: &Path, meta_dir: &Path, conn: &Connection) -> Result<Vec<RecoveryOutcome>> {
    let txn_dir = paths::txn_dir(meta_dir);
    let mut outcomes = Vec::new();
    for journal_path in find_incomplete_journals(&txn_dir)? {
        let journal = TransactionJournal::open(journal_path)?;
        outcomes.push(recover_single(root, &txn_dir, journal, conn)?);
    }
    Ok(outcomes)
}

fn recover_single(
    root: &Path,
    txn_dir: &Path,
    journal: TransactionJournal,
    conn: &Connection,
) -> Result<RecoveryOutcome> {
    let tx_uuid = journal.tx_uuid().to_string();
    let records = journal.read_all()?;

    let committed = records.iter().any(|r| matches!(r, JournalRecord::DbApplied))
        || (records
            .iter()
            .any(|r| matches!(r, JournalRecord::DbCommitIntent { .. }))
            && Transition::exists(conn, &tx_uuid)?);

    let outcome = if committed {
        info!("Rolling forward transaction {}", tx_uuid);
        RecoveryOutcome::RolledForward {
            tx_uuid: tx_uuid.clone(),
        }
    } else if records.iter().any(JournalRecord::is_change) {
        info!("Rolling back transaction {}", tx_uuid);
        rollback(root, &records);
        RecoveryOutcome::RolledBack {
            tx_uuid: tx_uuid.clone(),
            reason: "interrupted before the installed set was committed".to_string(),
        }
    } else {
        RecoveryOutcome::Clean {
            tx_uuid: tx_uuid.clone(),
        }
    };

    cleanup_work_dir(txn_dir, &tx_uuid)?;
    journal.delete()?;
    Ok(outcome)
}

/// Undo the filesystem changes in `records`, newest first
///
/// Best effort: a step that cannot be undone is logged and skipped so the
/// remaining steps still run.
pub(crate) fn rollback(root: &Path, records: &[JournalRecord]) {
    for record in records.iter().rev() {
        match record {
            JournalRecord::Create { path, is_dir } => {
                let full = root.join(path);
                let result = if *is_dir {
                    fs::remove_dir(&full)
                } else {
                    fs::remove_file(&full)
                };
                if let Err(e) = result
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to remove {}: {}", full.display(), e);
                }
            }

            JournalRecord::Backup { path, backup_path } => {
                if backup_path.symlink_metadata().is_err() {
                    continue;
                }
                let full = root.join(path);
                if let Ok(meta) = full.symlink_metadata() {
                    let cleared = if meta.is_dir() {
                        fs::remove_dir_all(&full)
                    } else {
                        fs::remove_file(&full)
                    };
                    if let Err(e) = cleared {
                        warn!("Failed to clear {}: {}", full.display(), e);
                    }
                }
                if let Some(parent) = full.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = super::move_path(backup_path, &full) {
                    warn!(
                        "Failed to restore backup {} -> {}: {}",
                        backup_path.display(),
                        full.display(),
                        e
                    );
                }
            }

            JournalRecord::RemoveDir { path } => {
                let full = root.join(path);
                if let Err(e) = fs::create_dir_all(&full) {
                    warn!("Failed to recreate {}: {}", full.display(), e);
                }
            }

            _ => {}
        }
    }
}

/// Remove the per-transaction work directory (backups)
pub(crate) fn cleanup_work_dir(txn_dir: &Path, tx_uuid: &str) -> Result<()> {
    let work_dir = txn_dir.join(tx_uuid);
    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)?;
    }
    Ok(())
}
