// src/transaction/journal.rs

//! Append-only execution journal for crash recovery
//!
//! Every filesystem change made while executing a plan is recorded here
//! before it happens, so an interrupted execution can be undone. Each record
//! is one line carrying a CRC32 checksum:
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Records that precede a destructive step are written as barriers (flushed
//! and synced).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A record in the execution journal
///
/// Paths are relative to the image root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Execution started
    Begin {
        tx_uuid: String,
        kind: String,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// An existing path was moved aside before being replaced or removed
    Backup { path: PathBuf, backup_path: PathBuf },

    /// A path that did not exist is about to be created
    Create { path: PathBuf, is_dir: bool },

    /// An empty directory is about to be removed
    RemoveDir { path: PathBuf },

    /// About to commit the installed set (correlation key for recovery)
    DbCommitIntent { tx_uuid: String },

    /// Installed set committed
    DbApplied,

    /// Execution finished
    Done { success: bool },
}

impl JournalRecord {
    /// Does this record describe a filesystem change that rollback undoes?
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Backup { .. } | Self::Create { .. } | Self::RemoveDir { .. }
        )
    }
}

/// Append-only execution journal with fsync barriers
pub struct TransactionJournal {
    path: PathBuf,
    file: File,
    tx_uuid: String,
}

impl TransactionJournal {
    /// Create the journal for a new execution
    pub fn create(journal_dir: &Path, tx_uuid: &str) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let path = journal_dir.join(format!("tx-{}.journal", tx_uuid));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
            tx_uuid: tx_uuid.to_string(),
        })
    }

    /// Open an existing journal for recovery
    pub fn open(path: PathBuf) -> Result<Self> {
        let tx_uuid = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("tx-"))
            .ok_or_else(|| {
                Error::TransactionError(format!("invalid journal file name {}", path.display()))
            })?
            .to_string();

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            tx_uuid,
        })
    }

    pub fn tx_uuid(&self) -> &str {
        &self.tx_uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record without syncing
    pub fn write(&mut self, record: &JournalRecord) -> Result<()> {
        writeln!(self.file, "{}", encode(record)?)?;
        Ok(())
    }

    /// Write a record and fsync
    pub fn write_barrier(&mut self, record: &JournalRecord) -> Result<()> {
        self.write(record)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Every intact record, in order
    ///
    /// A crash can leave a torn last line; reading stops at the first line
    /// that fails its checksum, and everything after it is ignored.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match decode(&line) {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        "Journal {} is damaged at line {}; ignoring the rest",
                        self.path.display(),
                        number + 1
                    );
                    break;
                }
            }
        }
        Ok(records)
    }

    pub fn delete(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }
}

/// `{crc32:08x}|{json}`
fn encode(record: &JournalRecord) -> Result<String> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{:08x}|{}", crc32fast::hash(json.as_bytes()), json))
}

/// `None` for a line that is torn, fails its checksum or does not parse
fn decode(line: &str) -> Option<JournalRecord> {
    let (crc, json) = line.split_once('|')?;
    let expected = u32::from_str_radix(crc, 16).ok()?;
    if expected != crc32fast::hash(json.as_bytes()) {
        return None;
    }
    serde_json::from_str(json).ok()
}

fn is_journal_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "journal")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("tx-"))
        && path.is_file()
}

/// Journals in `journal_dir` that never reached a `Done` record
pub fn find_incomplete_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    if !journal_dir.exists() {
        return Ok(Vec::new());
    }

    let mut incomplete = Vec::new();
    for entry in fs::read_dir(journal_dir)? {
        let path = entry?.path();
        if !is_journal_file(&path) {
            continue;
        }
        let finished = TransactionJournal::open(path.clone())?
            .read_all()?
            .iter()
            .any(|r| matches!(r, JournalRecord::Done { .. }));
        if !finished {
            incomplete.push(path);
        }
    }
    incomplete.sort();
    Ok(incomplete)
}
