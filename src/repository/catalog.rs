// src/repository/catalog.rs

//! Per-authority catalogs and the merged view
//!
//! A catalog lists every package version an authority offers. It is
//! exchanged and cached as a versioned JSON document:
//!
//! ```json
//! {"format": 1, "last_modified": "2008-04-26T17:32:08Z",
//!  "package_count": 2, "packages": ["library/libc@1.0", "web/server@2.2"]}
//! ```
//!
//! Incremental refresh applies an update log with the same format number:
//!
//! ```json
//! {"format": 1, "last_modified": "...",
//!  "updates": [{"op": "add", "fmri": "web/server@2.3"}]}
//! ```

use crate::db::paths;
use crate::error::{Error, Result};
use crate::fmri::{Fmri, FmriPattern};
use crate::version::PkgVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use tracing::debug;

pub const CATALOG_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    format: u32,
    last_modified: Option<DateTime<Utc>>,
    package_count: usize,
    packages: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UpdateLog {
    format: u32,
    last_modified: DateTime<Utc>,
    updates: Vec<CatalogUpdate>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum CatalogUpdate {
    Add { fmri: String },
    Remove { fmri: String },
}

/// Whether an authority's catalog has ever been retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    NotRetrieved,
    Retrieved {
        packages: usize,
        last_modified: Option<DateTime<Utc>>,
    },
}

/// One authority's catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    prefix: String,
    last_modified: Option<DateTime<Utc>>,
    packages: BTreeMap<String, BTreeSet<PkgVersion>>,
}

impl Catalog {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_modified: None,
            packages: BTreeMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, ts: DateTime<Utc>) {
        self.last_modified = Some(ts);
    }

    /// Number of package versions
    pub fn package_count(&self) -> usize {
        self.packages.values().map(BTreeSet::len).sum()
    }

    pub fn insert(&mut self, fmri: &Fmri) -> Result<()> {
        let version = fmri
            .version
            .clone()
            .ok_or_else(|| Error::InvalidFmri(fmri.to_string()))?;
        self.packages
            .entry(fmri.name.clone())
            .or_default()
            .insert(version);
        Ok(())
    }

    pub fn remove(&mut self, fmri: &Fmri) {
        if let (Some(versions), Some(version)) =
            (self.packages.get_mut(&fmri.name), fmri.version.as_ref())
        {
            versions.remove(version);
            if versions.is_empty() {
                self.packages.remove(&fmri.name);
            }
        }
    }

    /// Every entry attributed to this catalog's authority
    pub fn fmris(&self) -> impl Iterator<Item = Fmri> + '_ {
        self.packages.iter().flat_map(move |(name, versions)| {
            versions.iter().map(move |v| Fmri {
                authority: Some(self.prefix.clone()),
                name: name.clone(),
                version: Some(v.clone()),
            })
        })
    }

    /// Parse a catalog document received from or cached for `prefix`
    pub fn parse(prefix: &str, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| Error::CatalogCorrupt {
            authority: prefix.to_string(),
            reason,
        };

        let doc: CatalogDocument =
            serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if doc.format != CATALOG_FORMAT {
            return Err(corrupt(format!("unsupported catalog format {}", doc.format)));
        }
        if doc.packages.len() != doc.package_count {
            return Err(corrupt(format!(
                "declares {} packages but lists {}",
                doc.package_count,
                doc.packages.len()
            )));
        }

        let mut catalog = Catalog::new(prefix);
        catalog.last_modified = doc.last_modified;
        for entry in &doc.packages {
            let fmri = Fmri::parse(entry).map_err(|e| corrupt(e.to_string()))?;
            catalog.insert(&fmri).map_err(|e| corrupt(e.to_string()))?;
        }
        Ok(catalog)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packages: Vec<String> = self
            .packages
            .iter()
            .flat_map(|(name, versions)| versions.iter().map(move |v| format!("{name}@{v}")))
            .collect();
        let doc = CatalogDocument {
            format: CATALOG_FORMAT,
            last_modified: self.last_modified,
            package_count: packages.len(),
            packages,
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Apply an update log; returns the number of changes applied
    pub fn apply_update_log(&mut self, bytes: &[u8]) -> Result<usize> {
        let corrupt = |reason: String| Error::CatalogCorrupt {
            authority: self.prefix.clone(),
            reason,
        };
        let log: UpdateLog = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if log.format != CATALOG_FORMAT {
            return Err(corrupt(format!("unsupported update log format {}", log.format)));
        }

        // Parse everything before touching the catalog
        let mut changes = Vec::with_capacity(log.updates.len());
        for update in &log.updates {
            let (add, text) = match update {
                CatalogUpdate::Add { fmri } => (true, fmri),
                CatalogUpdate::Remove { fmri } => (false, fmri),
            };
            let fmri = Fmri::parse(text).map_err(|e| corrupt(e.to_string()))?;
            if fmri.version.is_none() {
                return Err(corrupt(format!("unversioned entry '{text}'")));
            }
            changes.push((add, fmri));
        }

        for (add, fmri) in &changes {
            if *add {
                self.insert(fmri)?;
            } else {
                self.remove(fmri);
            }
        }
        self.last_modified = Some(log.last_modified);
        Ok(changes.len())
    }

    /// Load the cached catalog; `None` when never retrieved
    pub fn load(meta_dir: &Path, prefix: &str) -> Result<Option<Self>> {
        let path = paths::catalog_file(meta_dir, prefix);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(Self::parse(prefix, &bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Persist atomically via temp file and rename
    pub fn save(&self, meta_dir: &Path) -> Result<()> {
        let dir = paths::catalog_dir(meta_dir, &self.prefix);
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&self.to_bytes()?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(paths::catalog_file(meta_dir, &self.prefix))
            .map_err(|e| Error::Io(e.error))?;
        debug!(
            "Saved catalog for {} ({} packages)",
            self.prefix,
            self.package_count()
        );
        Ok(())
    }

    /// Drop the cached catalog directory for `prefix`
    pub fn remove_cache(meta_dir: &Path, prefix: &str) -> Result<()> {
        match std::fs::remove_dir_all(paths::catalog_dir(meta_dir, prefix)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> CatalogState {
        CatalogState::Retrieved {
            packages: self.package_count(),
            last_modified: self.last_modified,
        }
    }
}

/// All configured authorities' catalogs merged by package name
///
/// Each name maps to its entries newest first; equal versions keep
/// authority configuration order.
#[derive(Debug, Clone, Default)]
pub struct MergedCatalog {
    packages: BTreeMap<String, Vec<Fmri>>,
}

impl MergedCatalog {
    /// Merge `catalogs`; `configured` lists authority prefixes in configuration order
    pub fn build<'a>(
        catalogs: impl IntoIterator<Item = &'a Catalog>,
        configured: &[String],
    ) -> Result<Self> {
        let rank = |prefix: &Option<String>| {
            prefix
                .as_ref()
                .and_then(|p| configured.iter().position(|c| c == p))
                .unwrap_or(usize::MAX)
        };

        let mut packages: BTreeMap<String, Vec<Fmri>> = BTreeMap::new();
        for catalog in catalogs {
            if !configured.iter().any(|c| c == catalog.prefix()) {
                return Err(Error::UnknownAuthority(catalog.prefix().to_string()));
            }
            for fmri in catalog.fmris() {
                packages.entry(fmri.name.clone()).or_default().push(fmri);
            }
        }

        for entries in packages.values_mut() {
            entries.sort_by(|a, b| {
                b.version
                    .cmp(&a.version)
                    .then_with(|| rank(&a.authority).cmp(&rank(&b.authority)))
            });
        }

        Ok(Self { packages })
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Number of distinct package names
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Entries for `name`, newest first
    pub fn versions(&self, name: &str) -> &[Fmri] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, name: &str) -> Option<&Fmri> {
        self.versions(name).first()
    }

    pub fn contains(&self, fmri: &Fmri) -> bool {
        self.versions(&fmri.name).iter().any(|f| {
            f.version == fmri.version
                && (fmri.authority.is_none() || f.authority == fmri.authority)
        })
    }

    /// Every entry, by name, newest first within a name
    pub fn iter(&self) -> impl Iterator<Item = &Fmri> {
        self.packages.values().flatten()
    }

    /// Entries matching `pattern` in `iter()` order
    pub fn matching<'a>(&'a self, pattern: &'a FmriPattern) -> impl Iterator<Item = &'a Fmri> + 'a {
        self.iter().filter(move |f| pattern.matches(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog(prefix: &str, entries: &[&str]) -> Catalog {
        let mut cat = Catalog::new(prefix);
        for e in entries {
            cat.insert(&Fmri::parse(e).unwrap()).unwrap();
        }
        cat
    }

    #[test]
    fn test_parse_round_trip() {
        let cat = catalog("a", &["libc@1.0", "libc@1.1", "web/server@2.2"]);
        let parsed = Catalog::parse("a", &cat.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, cat);
        assert_eq!(parsed.package_count(), 3);
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let doc = br#"{"format":1,"last_modified":null,"package_count":5,"packages":["libc@1.0"]}"#;
        assert!(matches!(Catalog::parse("a", doc), Err(Error::CatalogCorrupt { .. })));
    }

    #[test]
    fn test_wrong_format_is_corrupt() {
        let doc = br#"{"format":9,"last_modified":null,"package_count":0,"packages":[]}"#;
        assert!(matches!(Catalog::parse("a", doc), Err(Error::CatalogCorrupt { .. })));
        assert!(matches!(Catalog::parse("a", b"garbage"), Err(Error::CatalogCorrupt { .. })));
    }

    #[test]
    fn test_not_retrieved_is_distinct_from_empty() {
        let dir = TempDir::new().unwrap();
        assert!(Catalog::load(dir.path(), "a").unwrap().is_none());

        Catalog::new("a").save(dir.path()).unwrap();
        let loaded = Catalog::load(dir.path(), "a").unwrap().unwrap();
        assert_eq!(loaded.state(), CatalogState::Retrieved { packages: 0, last_modified: None });
    }

    #[test]
    fn test_corrupt_cache_reported() {
        let dir = TempDir::new().unwrap();
        let path = paths::catalog_file(dir.path(), "a");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{truncated").unwrap();
        assert!(matches!(Catalog::load(dir.path(), "a"), Err(Error::CatalogCorrupt { .. })));
    }

    #[test]
    fn test_apply_update_log() {
        let mut cat = catalog("a", &["libc@1.0", "old@1.0"]);
        let log = br#"{"format":1,"last_modified":"2008-04-27T00:00:00Z",
            "updates":[{"op":"add","fmri":"libc@1.1"},{"op":"remove","fmri":"old@1.0"}]}"#;
        assert_eq!(cat.apply_update_log(log).unwrap(), 2);
        assert_eq!(cat.package_count(), 2);
        assert!(cat.last_modified().is_some());
        assert!(cat.fmris().all(|f| f.name == "libc"));
    }

    #[test]
    fn test_bad_update_log_leaves_catalog_unchanged() {
        let mut cat = catalog("a", &["libc@1.0"]);
        let before = cat.clone();
        let log = br#"{"format":1,"last_modified":"2008-04-27T00:00:00Z",
            "updates":[{"op":"add","fmri":"libc@1.1"},{"op":"add","fmri":"bad name"}]}"#;
        assert!(cat.apply_update_log(log).is_err());
        assert_eq!(cat, before);
    }

    #[test]
    fn test_merged_order() {
        let a = catalog("a", &["libc@1.0", "libc@1.2"]);
        let b = catalog("b", &["libc@1.2", "libc@1.1"]);
        let configured = vec!["a".to_string(), "b".to_string()];
        let merged = MergedCatalog::build([&b, &a], &configured).unwrap();

        let order: Vec<String> = merged.versions("libc").iter().map(|f| f.to_string()).collect();
        assert_eq!(
            order,
            vec!["pkg://a/libc@1.2", "pkg://b/libc@1.2", "pkg://b/libc@1.1", "pkg://a/libc@1.0"]
        );
    }

    #[test]
    fn test_merge_rejects_unconfigured_authority() {
        let rogue = catalog("rogue", &["libc@1.0"]);
        let result = MergedCatalog::build([&rogue], &["a".to_string()]);
        assert!(matches!(result, Err(Error::UnknownAuthority(p)) if p == "rogue"));
    }
}
