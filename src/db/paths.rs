// src/db/paths.rs
//! Centralized path derivation for image metadata
//!
//! Every helper takes the image metadata directory (`var/pkg` or
//! `.org.opensolaris,pkg` under the image root).

use crate::fmri::Fmri;
use std::path::{Path, PathBuf};

pub fn db_path(meta_dir: &Path) -> PathBuf {
    meta_dir.join("pkg.db")
}

pub fn lock_path(meta_dir: &Path) -> PathBuf {
    meta_dir.join("lock")
}

/// Root of the per-authority catalog cache
pub fn catalog_root(meta_dir: &Path) -> PathBuf {
    meta_dir.join("catalog")
}

pub fn catalog_dir(meta_dir: &Path, prefix: &str) -> PathBuf {
    catalog_root(meta_dir).join(prefix)
}

pub fn catalog_file(meta_dir: &Path, prefix: &str) -> PathBuf {
    catalog_dir(meta_dir, prefix).join("catalog.json")
}

/// Root of the manifest cache
pub fn manifest_root(meta_dir: &Path) -> PathBuf {
    meta_dir.join("pkg")
}

/// `pkg/<authority>/<stem>/<version>/manifest`; unversioned FMRIs have no
/// cache slot
pub fn manifest_file(meta_dir: &Path, prefix: &str, fmri: &Fmri) -> Option<PathBuf> {
    let version = fmri.version_dir()?;
    Some(
        manifest_root(meta_dir)
            .join(prefix)
            .join(fmri.stem_dir())
            .join(version)
            .join("manifest"),
    )
}

/// Staging area for payloads fetched during preexecute
pub fn download_dir(meta_dir: &Path) -> PathBuf {
    meta_dir.join("download")
}

pub fn index_dir(meta_dir: &Path) -> PathBuf {
    meta_dir.join("index")
}

/// Transaction journals and backups
pub fn txn_dir(meta_dir: &Path) -> PathBuf {
    meta_dir.join("txn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_file() {
        assert_eq!(
            catalog_file(Path::new("/img/var/pkg"), "example.org"),
            PathBuf::from("/img/var/pkg/catalog/example.org/catalog.json")
        );
    }

    #[test]
    fn test_manifest_file_is_encoded() {
        let fmri = Fmri::parse("pkg://example.org/library/libc@1.0,5.11-0.1").unwrap();
        assert_eq!(
            manifest_file(Path::new("/m"), "example.org", &fmri),
            Some(PathBuf::from(
                "/m/pkg/example.org/library%2Flibc/1.0%2C5.11-0.1/manifest"
            ))
        );
    }

    #[test]
    fn test_unversioned_has_no_manifest_slot() {
        let fmri = Fmri::parse("library/libc").unwrap();
        assert!(manifest_file(Path::new("/m"), "example.org", &fmri).is_none());
    }
}
