// src/search/index.rs

//! On-disk search index
//!
//! Two JSON documents under `index/`:
//! - `manifest.json`: the indexed packages
//! - `main_dict.json`: token -> entries
//!
//! Both carry the same generation id when the index is consistent. Updates
//! are staged in `index/TMP` and renamed into place one file at a time, so a
//! crash between the renames leaves mismatched generations behind.

use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::manifest::{ActionType, Manifest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DICT_FILE: &str = "main_dict.json";
pub const TMP_DIR: &str = "TMP";

/// One indexed occurrence of a token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexEntry {
    pub index: String,
    pub fmri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexedPackages {
    generation: String,
    packages: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenDict {
    generation: String,
    tokens: BTreeMap<String, BTreeSet<IndexEntry>>,
}

#[derive(Debug, Default)]
pub struct SearchIndex {
    packages: BTreeSet<String>,
    tokens: BTreeMap<String, BTreeSet<IndexEntry>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a consistent index from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let dict_path = dir.join(DICT_FILE);
        if !manifest_path.exists() && !dict_path.exists() {
            return Err(Error::NoIndex(dir.to_path_buf()));
        }

        let packages: IndexedPackages = read_part(&manifest_path)?;
        let dict: TokenDict = read_part(&dict_path)?;
        if packages.generation != dict.generation {
            return Err(Error::InconsistentIndex(format!(
                "generation {} of {} does not match generation {} of {}",
                packages.generation, MANIFEST_FILE, dict.generation, DICT_FILE
            )));
        }

        Ok(Self {
            packages: packages.packages,
            tokens: dict.tokens,
        })
    }

    /// Like `load`, but a missing index is an empty one
    pub fn load_or_empty(dir: &Path) -> Result<Self> {
        match Self::load(dir) {
            Err(Error::NoIndex(_)) => Ok(Self::new()),
            other => other,
        }
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn contains_package(&self, fmri: &Fmri) -> bool {
        self.packages.contains(&fmri.to_string())
    }

    /// Entries for `token`, matched case-insensitively
    pub fn lookup(&self, token: &str) -> impl Iterator<Item = &IndexEntry> {
        self.tokens
            .get(&token.to_lowercase())
            .into_iter()
            .flatten()
    }

    /// Index every searchable token of `manifest` under `fmri`
    pub fn add_package(&mut self, fmri: &Fmri, manifest: &Manifest) {
        let key = fmri.to_string();
        self.packages.insert(key.clone());

        let mut add = |token: &str, index: &str, action_type: Option<&str>, value: Option<&str>| {
            if token.is_empty() {
                return;
            }
            self.tokens
                .entry(token.to_lowercase())
                .or_default()
                .insert(IndexEntry {
                    index: index.to_string(),
                    fmri: key.clone(),
                    action_type: action_type.map(str::to_string),
                    value: value.map(str::to_string),
                });
        };

        add(&fmri.name, "pkg.name", None, None);
        if let Some((_, leaf)) = fmri.name.rsplit_once('/') {
            add(leaf, "pkg.name", None, None);
        }

        for action in &manifest.actions {
            let kind = action.action_type.as_str();
            match action.action_type {
                ActionType::File | ActionType::Dir | ActionType::Link | ActionType::Hardlink => {
                    let Some(path) = action.path() else { continue };
                    let basename = path.rsplit('/').next().unwrap_or(path);
                    add(basename, "basename", Some(kind), Some(path));
                    add(path, "path", Some(kind), Some(path));
                }
                ActionType::Depend => {
                    let Some(target) = action.attr("fmri") else { continue };
                    if let Ok(dep) = Fmri::parse(target) {
                        add(&dep.name, "depend", Some(kind), Some(target));
                    }
                }
                _ => {}
            }
        }

        if let Some(description) = manifest.summary() {
            for word in description.split_whitespace() {
                let word = word.trim_matches(|c: char| !c.is_alphanumeric());
                add(word, "pkg.description", Some("set"), Some(description));
            }
        }
    }

    /// Drop every entry of `fmri`
    pub fn remove_package(&mut self, fmri: &Fmri) {
        let key = fmri.to_string();
        if !self.packages.remove(&key) {
            return;
        }
        self.tokens.retain(|_, entries| {
            entries.retain(|e| e.fmri != key);
            !entries.is_empty()
        });
    }

    /// Write both documents into `dir` under a fresh generation
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let generation = Uuid::new_v4().to_string();
        write_part(
            &dir.join(DICT_FILE),
            &TokenDict {
                generation: generation.clone(),
                tokens: self.tokens.clone(),
            },
        )?;
        write_part(
            &dir.join(MANIFEST_FILE),
            &IndexedPackages {
                generation,
                packages: self.packages.clone(),
            },
        )?;
        debug!(
            "Wrote search index for {} package(s) to {}",
            self.packages.len(),
            dir.display()
        );
        Ok(())
    }
}

fn read_part<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            Error::InconsistentIndex(format!("{} is missing", path.display()))
        }
        _ => Error::from_index_io(e, path),
    })?;
    serde_json::from_str(&text)
        .map_err(|e| Error::InconsistentIndex(format!("{}: {}", path.display(), e)))
}

fn write_part<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut file = fs::File::create(path).map_err(|e| Error::from_index_io(e, path))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::from_index_io(e, path))
}

/// Claim `index/TMP` for an incremental update
pub fn claim_tmp(index_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(index_dir).map_err(|e| Error::from_index_io(e, index_dir))?;
    let tmp = index_dir.join(TMP_DIR);
    match fs::create_dir(&tmp) {
        Ok(()) => Ok(tmp),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::PartialIndexing(tmp)),
        Err(e) => Err(Error::from_index_io(e, &tmp)),
    }
}

/// Move the documents staged in `tmp` over the live ones and release `tmp`
pub fn publish_tmp(index_dir: &Path, tmp: &Path) -> Result<()> {
    for name in [DICT_FILE, MANIFEST_FILE] {
        let target = index_dir.join(name);
        fs::rename(tmp.join(name), &target).map_err(|e| Error::from_index_io(e, &target))?;
    }
    fs::remove_dir(tmp).map_err(|e| Error::from_index_io(e, tmp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> (Fmri, Manifest) {
        let fmri = Fmri::parse("pkg://test/web/server@1.0").unwrap();
        let manifest = Manifest::parse(
            "set name=pkg.description value=\"A tiny web server\"\n\
             dir path=usr/bin mode=0755\n\
             file abc path=usr/bin/httpd mode=0555\n\
             depend fmri=library/libc@1.0 type=require\n",
        )
        .unwrap();
        (fmri, manifest)
    }

    #[test]
    fn test_tokens_by_index() {
        let (fmri, manifest) = sample();
        let mut index = SearchIndex::new();
        index.add_package(&fmri, &manifest);

        let kinds = |token: &str| -> Vec<String> {
            index.lookup(token).map(|e| e.index.clone()).collect()
        };
        assert_eq!(kinds("httpd"), vec!["basename"]);
        assert_eq!(kinds("usr/bin/httpd"), vec!["path"]);
        assert_eq!(kinds("library/libc"), vec!["depend"]);
        assert_eq!(kinds("server"), vec!["pkg.description", "pkg.name"]);
        assert_eq!(kinds("TINY"), vec!["pkg.description"]);
    }

    #[test]
    fn test_remove_package_drops_tokens() {
        let (fmri, manifest) = sample();
        let mut index = SearchIndex::new();
        index.add_package(&fmri, &manifest);
        index.remove_package(&fmri);
        assert_eq!(index.package_count(), 0);
        assert_eq!(index.lookup("httpd").count(), 0);
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let (fmri, manifest) = sample();
        let mut index = SearchIndex::new();
        index.add_package(&fmri, &manifest);
        index.write_to(dir.path()).unwrap();

        let loaded = SearchIndex::load(dir.path()).unwrap();
        assert!(loaded.contains_package(&fmri));
        assert_eq!(loaded.lookup("httpd").count(), 1);
    }

    #[test]
    fn test_generation_mismatch_is_inconsistent() {
        let dir = TempDir::new().unwrap();
        SearchIndex::new().write_to(dir.path()).unwrap();
        let stale = fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
        SearchIndex::new().write_to(dir.path()).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), stale).unwrap();

        assert!(matches!(
            SearchIndex::load(dir.path()),
            Err(Error::InconsistentIndex(_))
        ));
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(SearchIndex::load(dir.path()), Err(Error::NoIndex(_))));
        assert_eq!(SearchIndex::load_or_empty(dir.path()).unwrap().package_count(), 0);

        fs::write(dir.path().join(DICT_FILE), "{}").unwrap();
        assert!(matches!(
            SearchIndex::load(dir.path()),
            Err(Error::InconsistentIndex(_))
        ));
    }

    #[test]
    fn test_claim_tmp_twice_is_partial() {
        let dir = TempDir::new().unwrap();
        claim_tmp(dir.path()).unwrap();
        assert!(matches!(
            claim_tmp(dir.path()),
            Err(Error::PartialIndexing(_))
        ));
    }
}
