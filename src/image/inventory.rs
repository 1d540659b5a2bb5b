// src/image/inventory.rs

//! Package inventory: matching patterns against installed and known packages

use super::Image;
use crate::db::models::InstalledPackage;
use crate::error::{Error, Result};
use crate::fmri::{Fmri, FmriPattern};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgStatus {
    Installed,
    Known,
}

impl PkgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkgStatus::Installed => "installed",
            PkgStatus::Known => "known",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkgState {
    pub state: PkgStatus,
    /// The catalog offers a newer version
    pub upgradable: bool,
    pub frozen: bool,
    pub incorporated: bool,
    pub excludes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InventoryResult {
    pub found: Vec<(Fmri, PkgState)>,
    /// Patterns that matched nothing
    pub not_found: Vec<String>,
}

impl Image {
    pub fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        InstalledPackage::list_all(self.conn())
    }

    /// Installed FMRIs ordered by name
    pub fn installed_fmris(&self) -> Result<Vec<Fmri>> {
        Ok(self
            .installed_packages()?
            .into_iter()
            .map(|p| p.fmri)
            .collect())
    }

    pub fn installed_fmri(&self, name: &str) -> Result<Option<Fmri>> {
        Ok(InstalledPackage::find(self.conn(), name)?.map(|p| p.fmri))
    }

    /// Does the catalog hold a newer version of this package?
    pub fn is_upgradable(&self, fmri: &Fmri) -> bool {
        self.catalog()
            .latest(&fmri.name)
            .is_some_and(|latest| latest.version > fmri.version)
    }

    /// Installed packages, or with `all_known` every catalog entry as well,
    /// restricted to `patterns` when any are given
    ///
    /// Patterns that match nothing are reported in `not_found` rather than
    /// failing the whole listing.
    pub fn inventory(&self, patterns: &[String], all_known: bool) -> Result<InventoryResult> {
        let matchers = patterns
            .iter()
            .map(|p| FmriPattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        let mut matched = vec![false; matchers.len()];

        let installed: BTreeMap<String, InstalledPackage> = self
            .installed_packages()?
            .into_iter()
            .map(|p| (p.fmri.name.clone(), p))
            .collect();

        let mut candidates: Vec<Fmri> = Vec::new();
        if all_known {
            candidates.extend(self.catalog().iter().cloned());
            for pkg in installed.values() {
                if !self.catalog().contains(&pkg.fmri) {
                    candidates.push(pkg.fmri.clone());
                }
            }
            candidates.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| b.version.cmp(&a.version))
            });
        } else {
            candidates.extend(installed.values().map(|p| p.fmri.clone()));
        }

        let mut found = Vec::new();
        for fmri in candidates {
            if !matchers.is_empty() {
                let mut any = false;
                for (i, m) in matchers.iter().enumerate() {
                    if m.matches(&fmri) {
                        matched[i] = true;
                        any = true;
                    }
                }
                if !any {
                    continue;
                }
            }

            let record = installed
                .get(&fmri.name)
                .filter(|p| p.fmri.version == fmri.version);
            let state = PkgState {
                state: if record.is_some() {
                    PkgStatus::Installed
                } else {
                    PkgStatus::Known
                },
                upgradable: record.is_some() && self.is_upgradable(&fmri),
                frozen: record.is_some_and(|p| p.frozen),
                incorporated: record.is_some_and(|p| p.incorporated),
                excludes: record.is_some_and(|p| p.excludes),
            };
            found.push((fmri, state));
        }

        let not_found = patterns
            .iter()
            .zip(matched)
            .filter(|(_, hit)| !hit)
            .map(|(p, _)| p.clone())
            .collect();

        Ok(InventoryResult { found, not_found })
    }

    /// Like `inventory`, but every pattern must match something
    pub fn resolve(&self, patterns: &[String], all_known: bool) -> Result<Vec<(Fmri, PkgState)>> {
        let result = self.inventory(patterns, all_known)?;
        if !result.not_found.is_empty() {
            return Err(Error::PatternsNotFound(result.not_found));
        }
        Ok(result.found)
    }

    /// The single package an install of `pattern` refers to, at its latest
    /// version
    ///
    /// Matches from the preferred authority win. Several distinct packages
    /// within the winning group make the pattern ambiguous.
    pub fn resolve_latest(&self, pattern: &str) -> Result<Fmri> {
        let matcher = FmriPattern::new(pattern)?;
        let preferred = self.preferred_prefix()?;

        let (from_preferred, others): (Vec<&Fmri>, Vec<&Fmri>) = self
            .catalog()
            .matching(&matcher)
            .partition(|f| f.authority.is_some() && f.authority == preferred);

        let group = if from_preferred.is_empty() {
            others
        } else {
            from_preferred
        };
        let Some(first) = group.first() else {
            return Err(Error::PatternsNotFound(vec![pattern.to_string()]));
        };

        // Newest entry per distinct (authority, name)
        let mut distinct: Vec<&Fmri> = Vec::new();
        for fmri in &group {
            if !distinct
                .iter()
                .any(|d| d.name == fmri.name && d.authority == fmri.authority)
            {
                distinct.push(fmri);
            }
        }
        if distinct.len() > 1 {
            return Err(Error::AmbiguousMatch {
                pattern: pattern.to_string(),
                matches: distinct.iter().map(|f| f.to_string()).collect(),
            });
        }

        Ok((*first).clone())
    }
}
