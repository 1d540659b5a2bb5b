// src/search/mod.rs

//! Local and remote package search
//!
//! Local search reads the image's token index, which is kept current after
//! every executed plan and can be rebuilt from the installed manifests.
//! Remote search asks each authority's `search/0/<token>` endpoint and joins
//! the answers in authority order.
//!
//! Both searches are pull-based: results come out of an iterator, and a
//! remote fan-out with failing authorities ends with one terminal error item.

mod index;

pub use index::{IndexEntry, SearchIndex};

use crate::db::models::Authority;
use crate::db::paths;
use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::image::Image;
use crate::plan::ImagePlan;
use crate::progress::{Phase, ProgressTracker};
use crate::repository::{AuthorityFailures, FetchError, TimeoutBudget, Transport, search_path};
use rayon::prelude::*;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::sync::Arc;
use std::vec;
use tracing::{debug, info, warn};

/// One search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Which index matched: `basename`, `path`, `depend`, `pkg.name`, `pkg.description`
    pub index: String,
    pub fmri: Fmri,
    pub action_type: Option<String>,
    pub value: Option<String>,
}

impl SearchHit {
    fn from_entry(entry: IndexEntry) -> Result<Self> {
        let fmri = Fmri::parse(&entry.fmri).map_err(|_| {
            Error::InconsistentIndex(format!("unparseable package '{}' in index", entry.fmri))
        })?;
        Ok(Self {
            index: entry.index,
            fmri,
            action_type: entry.action_type,
            value: entry.value,
        })
    }

    /// Parse one line of a remote response
    ///
    /// `index fmri` or `index action_type fmri value...`
    fn parse_remote(line: &str, authority: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let index = fields.next()?.to_string();
        let second = fields.next()?;
        let (action_type, fmri, value) = match fields.next() {
            None => (None, second, None),
            Some(fmri) => {
                let value = fields.collect::<Vec<_>>().join(" ");
                (
                    Some(second.to_string()),
                    fmri,
                    (!value.is_empty()).then_some(value),
                )
            }
        };
        let mut fmri = Fmri::parse(fmri).ok()?;
        if fmri.authority.is_none() {
            fmri = fmri.with_authority(authority);
        }
        Some(Self {
            index,
            fmri,
            action_type,
            value,
        })
    }
}

/// Results of a local search
pub struct LocalSearch {
    entries: vec::IntoIter<IndexEntry>,
}

impl Iterator for LocalSearch {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(SearchHit::from_entry)
    }
}

/// Results of a remote search; the fan-out happens on the first `next()`
pub struct RemoteSearch {
    transport: Arc<dyn Transport>,
    budget: TimeoutBudget,
    tokens: Vec<String>,
    authorities: Vec<Authority>,
    results: Option<VecDeque<Result<SearchHit>>>,
}

impl RemoteSearch {
    fn run(&self) -> VecDeque<Result<SearchHit>> {
        info!(
            "Searching {} authorit(ies) for {}",
            self.authorities.len(),
            self.tokens.join(" ")
        );
        let transport = self.transport.as_ref();
        let answers: Vec<std::result::Result<Vec<SearchHit>, FetchError>> = self
            .authorities
            .par_iter()
            .map(|authority| query_authority(transport, &self.budget, authority, &self.tokens))
            .collect();

        let mut results = VecDeque::new();
        let mut failures = AuthorityFailures::new(self.authorities.len());
        for (authority, answer) in self.authorities.iter().zip(answers) {
            match answer {
                Ok(hits) => {
                    failures.record_success();
                    results.extend(hits.into_iter().map(Ok));
                }
                Err(e) => {
                    warn!("Search on {} failed: {}", authority.prefix, e);
                    failures.record_failure(&authority.prefix, &authority.origin_url, e);
                }
            }
        }
        if !failures.is_empty() {
            failures.timeouts_exhausted = self.budget.is_exhausted();
            results.push_back(Err(Error::SearchFailed(failures)));
        }
        results
    }
}

impl Iterator for RemoteSearch {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.results.is_none() {
            self.results = Some(self.run());
        }
        self.results.as_mut().and_then(VecDeque::pop_front)
    }
}

fn query_authority(
    transport: &dyn Transport,
    budget: &TimeoutBudget,
    authority: &Authority,
    tokens: &[String],
) -> std::result::Result<Vec<SearchHit>, FetchError> {
    let mut hits = Vec::new();
    for token in tokens {
        let body = match budget.fetch(transport, authority, &search_path(token)) {
            Ok(body) => body,
            // No matches for this token
            Err(FetchError::Http { status: 404, .. }) => continue,
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&body);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match SearchHit::parse_remote(line, &authority.prefix) {
                Some(hit) => hits.push(hit),
                None => debug!("Ignoring malformed search result from {}: {}", authority.prefix, line),
            }
        }
    }
    Ok(hits)
}

impl Image {
    /// Search the local index for `tokens`
    ///
    /// Fails before yielding anything when the index is missing or damaged.
    pub fn local_search(&self, tokens: &[String]) -> Result<LocalSearch> {
        let index = SearchIndex::load(&paths::index_dir(self.meta_dir()))?;
        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for token in tokens {
            for entry in index.lookup(token) {
                if seen.insert(entry.clone()) {
                    entries.push(entry.clone());
                }
            }
        }
        debug!("Local search for {} matched {} entries", tokens.join(" "), entries.len());
        Ok(LocalSearch {
            entries: entries.into_iter(),
        })
    }

    /// Search `authorities` for `tokens`; nothing is contacted until the
    /// first result is requested
    pub fn remote_search(&self, tokens: &[String], authorities: Vec<Authority>) -> RemoteSearch {
        RemoteSearch {
            transport: self.shared_transport(),
            budget: self.timeout_budget(),
            tokens: tokens.to_vec(),
            authorities,
            results: None,
        }
    }

    /// Throw away every index artifact and index the installed packages afresh
    pub fn rebuild_search_index(&self, progress: &dyn ProgressTracker) -> Result<()> {
        let index_dir = paths::index_dir(self.meta_dir());
        let installed = self.installed_fmris()?;
        progress.start(Phase::RebuildIndex, installed.len() as u64);

        let staging = tempfile::Builder::new()
            .prefix(".index-")
            .tempdir_in(self.meta_dir())
            .map_err(|e| Error::from_index_io(e, self.meta_dir()))?;

        let mut index = SearchIndex::new();
        for fmri in &installed {
            let manifest = self.get_manifest(fmri, true)?;
            index.add_package(fmri, &manifest);
            progress.increment(1);
        }
        index.write_to(staging.path())?;

        // Move the old index aside rather than deleting it, so a failed swap
        // can put it back; it is removed when `retired` drops
        let retired = tempfile::Builder::new()
            .prefix(".index-old-")
            .tempdir_in(self.meta_dir())
            .map_err(|e| Error::from_index_io(e, self.meta_dir()))?;
        let aside = retired.path().join("index");
        if index_dir.exists() {
            fs::rename(&index_dir, &aside).map_err(|e| Error::from_index_io(e, &index_dir))?;
        }
        if let Err(e) = fs::rename(staging.path(), &index_dir) {
            if aside.exists()
                && let Err(restore) = fs::rename(&aside, &index_dir)
            {
                warn!("Could not restore previous search index: {}", restore);
            }
            return Err(Error::from_index_io(e, &index_dir));
        }

        info!("Rebuilt search index for {} package(s)", installed.len());
        progress.finish_with_message("Search index rebuilt");
        Ok(())
    }
}

/// Bring the index in line with an executed plan
pub(crate) fn update_index(
    image: &Image,
    plan: &ImagePlan,
    progress: Option<&dyn ProgressTracker>,
) -> Result<()> {
    let index_dir = paths::index_dir(image.meta_dir());
    let mut index = SearchIndex::load_or_empty(&index_dir)?;
    let tmp = index::claim_tmp(&index_dir)?;

    if let Some(progress) = progress {
        progress.start(Phase::UpdateIndex, plan.pkg_plans().len() as u64);
    }
    for pkg in plan.pkg_plans() {
        if let Some(origin) = &pkg.origin {
            index.remove_package(origin);
        }
        if let Some(dest) = &pkg.destination {
            let manifest = image.get_manifest(dest, true)?;
            index.add_package(dest, &manifest);
        }
        if let Some(progress) = progress {
            progress.increment(1);
        }
    }

    index.write_to(&tmp)?;
    index::publish_tmp(&index_dir, &tmp)?;
    debug!("Search index now covers {} package(s)", index.package_count());
    Ok(())
}
