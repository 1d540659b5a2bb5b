// src/manifest/cache.rs

//! On-disk manifest cache
//!
//! Manifests are stored unfiltered at
//! `pkg/<authority>/<stem>/<version>/manifest` and rewritten wholesale
//! through a temp file and rename. Each authority has its own slots, so two
//! authorities publishing the same name and version never share an entry.

use super::Manifest;
use crate::db::models::Authority;
use crate::db::paths;
use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::repository::{TimeoutBudget, Transport, manifest_path};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Manifest for `fmri` cached from authority `prefix`, if present
pub fn load(meta_dir: &Path, prefix: &str, fmri: &Fmri) -> Result<Option<Manifest>> {
    let Some(path) = paths::manifest_file(meta_dir, prefix, fmri) else {
        return Ok(None);
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(Manifest::parse(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

pub fn store(meta_dir: &Path, prefix: &str, fmri: &Fmri, manifest: &Manifest) -> Result<()> {
    let path = paths::manifest_file(meta_dir, prefix, fmri)
        .ok_or_else(|| Error::InvalidFmri(fmri.to_string()))?;
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidFmri(fmri.to_string()))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(manifest.to_text().as_bytes())?;
    tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Download the manifest for `fmri` from `authority` and cache it
pub fn fetch(
    meta_dir: &Path,
    transport: &dyn Transport,
    authority: &Authority,
    fmri: &Fmri,
    budget: &TimeoutBudget,
) -> Result<Manifest> {
    debug!("Fetching manifest for {} from {}", fmri, authority.prefix);
    let bytes = budget
        .fetch(transport, authority, &manifest_path(fmri))
        .map_err(|e| Error::DownloadError(format!("manifest for {fmri}: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::ParseError(format!("manifest for {fmri} is not UTF-8: {e}")))?;
    let manifest = Manifest::parse(&text)?;
    store(meta_dir, &authority.prefix, fmri, &manifest)?;
    Ok(manifest)
}

/// Remove the cached manifest for `fmri`; returns whether one existed
pub fn remove(meta_dir: &Path, prefix: &str, fmri: &Fmri) -> Result<bool> {
    let Some(path) = paths::manifest_file(meta_dir, prefix, fmri) else {
        return Ok(false);
    };
    let Some(version_dir) = path.parent() else {
        return Ok(false);
    };
    if !version_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(version_dir)?;

    // Prune the stem and authority directories once empty
    for dir in version_dir.ancestors().skip(1).take(2) {
        if std::fs::read_dir(dir)?.next().is_some() {
            break;
        }
        std::fs::remove_dir(dir)?;
    }
    debug!("Removed cached manifest for {}", fmri);
    Ok(true)
}
