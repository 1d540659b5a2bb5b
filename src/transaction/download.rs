// src/transaction/download.rs

//! Preexecution: staging every payload a plan needs
//!
//! Payloads are fetched concurrently in batches whose declared sizes stay
//! under the configured bytes-in-flight limit, verified against their
//! SHA-256 content hash, and written to `download/<hash>`. Nothing in the
//! image itself is touched here.

use crate::db::models::Authority;
use crate::db::paths;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::plan::{ImagePlan, PlanState};
use crate::progress::Phase;
use crate::repository::{FetchError, TimeoutBudget, Transport, file_path};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use super::ExecOptions;

/// One payload to fetch
struct PendingPayload {
    hash: String,
    size: u64,
    package: String,
    authority: Authority,
}

impl ImagePlan {
    /// Download and verify every payload the plan installs
    pub fn preexecute(&mut self, image: &Image, opts: &ExecOptions) -> Result<()> {
        self.require_state(PlanState::Evaluated)?;

        let download_dir = paths::download_dir(image.meta_dir());
        std::fs::create_dir_all(&download_dir)?;

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for pkg in self.pkg_plans() {
            let Some(dest) = &pkg.destination else {
                continue;
            };
            let authority = image.authority_for(dest)?;
            for action in pkg.payloads() {
                let Some(hash) = action.payload.as_deref() else {
                    continue;
                };
                if !seen.insert(hash.to_string()) || download_dir.join(hash).exists() {
                    continue;
                }
                pending.push(PendingPayload {
                    hash: hash.to_string(),
                    size: action.size(),
                    package: dest.to_string(),
                    authority: authority.clone(),
                });
            }
        }

        let total_bytes: u64 = pending.iter().map(|p| p.size).sum();
        info!(
            "Downloading {} payload(s), {} bytes",
            pending.len(),
            total_bytes
        );
        if let Some(progress) = opts.progress() {
            progress.start(Phase::Download, pending.len() as u64);
        }

        let transport = image.transport();
        let budget = image.timeout_budget();
        for batch in batches(&pending, image.config().max_bytes_in_flight) {
            opts.check_cancelled("download")?;

            let results: Vec<Result<()>> = batch
                .par_iter()
                .map(|payload| {
                    let result = fetch_payload(transport, &budget, &download_dir, payload);
                    if let Some(progress) = opts.progress() {
                        progress.increment(1);
                    }
                    result
                })
                .collect();
            results.into_iter().collect::<Result<()>>()?;
        }

        if let Some(progress) = opts.progress() {
            progress.finish_with_message("Download complete");
        }
        self.set_state(PlanState::Preexecuted);
        Ok(())
    }
}

/// Split `pending` into consecutive batches of at most `limit` declared bytes
///
/// A payload larger than the limit gets a batch of its own.
fn batches(pending: &[PendingPayload], limit: u64) -> Vec<&[PendingPayload]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut in_flight = 0u64;
    for (i, payload) in pending.iter().enumerate() {
        if i > start && in_flight + payload.size > limit {
            batches.push(&pending[start..i]);
            start = i;
            in_flight = 0;
        }
        in_flight += payload.size;
    }
    if start < pending.len() {
        batches.push(&pending[start..]);
    }
    batches
}

fn fetch_payload(
    transport: &dyn Transport,
    budget: &TimeoutBudget,
    download_dir: &Path,
    payload: &PendingPayload,
) -> Result<()> {
    debug!("Fetching {} for {}", payload.hash, payload.package);
    let bytes = match budget.fetch(transport, &payload.authority, &file_path(&payload.hash)) {
        Ok(bytes) => bytes,
        Err(FetchError::Timeout) if budget.is_exhausted() => {
            return Err(Error::TransferTimedOut(budget.used()));
        }
        Err(e) => {
            return Err(Error::DownloadError(format!(
                "{} from {}: {}",
                payload.hash, payload.authority.prefix, e
            )));
        }
    };

    let actual = hex::encode(Sha256::digest(&bytes));
    if actual != payload.hash {
        return Err(Error::ChecksumMismatch {
            path: format!("{} ({})", payload.hash, payload.package),
            expected: payload.hash.clone(),
            actual,
        });
    }

    let mut tmp = tempfile::NamedTempFile::new_in(download_dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(download_dir.join(&payload.hash))
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(size: u64) -> PendingPayload {
        PendingPayload {
            hash: format!("h{size}"),
            size,
            package: "pkg://test/x@1.0".to_string(),
            authority: Authority::new("test", "http://localhost"),
        }
    }

    #[test]
    fn test_batches_respect_limit() {
        let pending: Vec<_> = [40, 40, 40, 10].into_iter().map(payload).collect();
        let sizes: Vec<usize> = batches(&pending, 100).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn test_oversized_payload_gets_own_batch() {
        let pending: Vec<_> = [10, 500, 10].into_iter().map(payload).collect();
        let sizes: Vec<usize> = batches(&pending, 100).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_no_payloads_no_batches() {
        assert!(batches(&[], 100).is_empty());
    }
}
