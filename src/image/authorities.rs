// src/image/authorities.rs

//! Authority configuration and catalog loading for an image

use super::Image;
use crate::db::{self, models::Authority};
use crate::error::{Error, Result};
use crate::progress::{Phase, ProgressTracker};
use crate::repository::{
    AuthorityFailures, Catalog, CatalogState, FetchError, MergedCatalog, summarize, sync_catalogs,
    validate_origin, validate_prefix,
};
use chrono::Utc;
use tracing::{debug, info, warn};

impl Image {
    /// Add `prefix`, or update its origin and client credentials
    ///
    /// The first authority of an image becomes its preferred authority.
    pub fn set_authority(
        &mut self,
        prefix: &str,
        origin_url: Option<&str>,
        ssl_key: Option<&str>,
        ssl_cert: Option<&str>,
    ) -> Result<()> {
        validate_prefix(prefix)?;
        if let Some(origin) = origin_url {
            validate_origin(origin)?;
        }

        let existing = Authority::find(self.conn(), prefix)?;
        db::transaction(self.conn_mut(), |tx| match existing {
            Some(mut authority) => {
                if let Some(origin) = origin_url {
                    authority.origin_url = origin.to_string();
                }
                if ssl_key.is_some() {
                    authority.ssl_key = ssl_key.map(str::to_string);
                }
                if ssl_cert.is_some() {
                    authority.ssl_cert = ssl_cert.map(str::to_string);
                }
                debug!("Updating authority {}", prefix);
                authority.update(tx)
            }
            None => {
                let origin =
                    origin_url.ok_or_else(|| Error::MissingOrigin(prefix.to_string()))?;
                let mut authority = Authority::new(prefix, origin);
                authority.ssl_key = ssl_key.map(str::to_string);
                authority.ssl_cert = ssl_cert.map(str::to_string);
                authority.insert(tx)?;
                if Authority::find_preferred(tx)?.is_none() {
                    Authority::set_preferred(tx, prefix)?;
                }
                info!("Added authority {} ({})", prefix, origin);
                Ok(())
            }
        })
    }

    pub fn set_preferred_authority(&mut self, prefix: &str) -> Result<()> {
        if Authority::find(self.conn(), prefix)?.is_none() {
            return Err(Error::UnknownAuthority(prefix.to_string()));
        }
        db::transaction(self.conn_mut(), |tx| Authority::set_preferred(tx, prefix))?;
        info!("Preferred authority is now {}", prefix);
        Ok(())
    }

    /// Remove a non-preferred authority along with its cached catalog
    pub fn delete_authority(&mut self, prefix: &str) -> Result<()> {
        let authority = Authority::find(self.conn(), prefix)?
            .ok_or_else(|| Error::UnknownAuthority(prefix.to_string()))?;
        if authority.preferred {
            return Err(Error::PreferredAuthority(prefix.to_string()));
        }

        Authority::delete(self.conn(), prefix)?;
        Catalog::remove_cache(self.meta_dir(), prefix)?;
        info!("Removed authority {}", prefix);

        let configured = self.authority_prefixes()?;
        let catalogs = self.cached_catalogs(&configured)?;
        self.catalog = MergedCatalog::build(&catalogs, &configured)?;
        Ok(())
    }

    /// Every configured authority in configuration order
    pub fn authorities(&self) -> Result<Vec<Authority>> {
        Authority::list_all(self.conn())
    }

    pub fn authority(&self, prefix: &str) -> Result<Option<Authority>> {
        Authority::find(self.conn(), prefix)
    }

    pub fn preferred_authority(&self) -> Result<Option<Authority>> {
        Authority::find_preferred(self.conn())
    }

    /// Prefix of the preferred authority, if any authority exists
    pub fn preferred_prefix(&self) -> Result<Option<String>> {
        Ok(self.preferred_authority()?.map(|a| a.prefix))
    }

    pub fn has_authority(&self, prefix: &str) -> Result<bool> {
        Ok(self.authority(prefix)?.is_some())
    }

    fn authority_prefixes(&self) -> Result<Vec<String>> {
        Ok(self.authorities()?.into_iter().map(|a| a.prefix).collect())
    }

    /// Whether `prefix`'s catalog was ever retrieved, and its size if so
    pub fn catalog_state(&self, prefix: &str) -> Result<CatalogState> {
        if !self.has_authority(prefix)? {
            return Err(Error::UnknownAuthority(prefix.to_string()));
        }
        Ok(Catalog::load(self.meta_dir(), prefix)?
            .map(|c| c.state())
            .unwrap_or(CatalogState::NotRetrieved))
    }

    fn cached_catalogs(&self, prefixes: &[String]) -> Result<Vec<Catalog>> {
        let mut catalogs = Vec::new();
        for prefix in prefixes {
            if let Some(catalog) = Catalog::load(self.meta_dir(), prefix)? {
                catalogs.push(catalog);
            }
        }
        Ok(catalogs)
    }

    /// Load every configured authority's cached catalog and merge them
    ///
    /// Authorities never retrieved contribute nothing; a corrupt cache is an
    /// error.
    pub fn load_catalogs(&mut self, progress: &dyn ProgressTracker) -> Result<()> {
        let prefixes = self.authority_prefixes()?;
        progress.start(Phase::LoadCatalogs, prefixes.len() as u64);

        let mut catalogs = Vec::new();
        for prefix in &prefixes {
            match Catalog::load(self.meta_dir(), prefix) {
                Ok(Some(catalog)) => catalogs.push(catalog),
                Ok(None) => debug!("Catalog for {} not yet retrieved", prefix),
                Err(e) => {
                    progress.finish_with_error(&e.to_string());
                    return Err(e);
                }
            }
            progress.increment(1);
        }

        self.catalog = MergedCatalog::build(&catalogs, &prefixes)?;
        progress.finish_with_message(&format!("{} package(s) known", self.catalog.len()));
        Ok(())
    }

    /// Refresh every authority's catalog from its origin
    ///
    /// Every authority is attempted. Successful refreshes are saved and merged
    /// even when others fail; any failure is then reported as
    /// `Error::CatalogRefresh`.
    pub fn retrieve_catalogs(&mut self, full: bool) -> Result<()> {
        let authorities = self.authorities()?;
        let mut work = Vec::with_capacity(authorities.len());
        for authority in authorities {
            let local = if full {
                None
            } else {
                Catalog::load(self.meta_dir(), &authority.prefix).unwrap_or_else(|e| {
                    warn!("Ignoring cached catalog for {}: {}", authority.prefix, e);
                    None
                })
            };
            work.push((authority, local));
        }

        let budget = self.timeout_budget();
        let results = sync_catalogs(self.transport(), work, full, &budget);
        let mut failures: AuthorityFailures = summarize(&results, &budget);

        for result in results {
            let Ok(mut catalog) = result.result else {
                continue;
            };
            if catalog.last_modified().is_none() {
                catalog.set_last_modified(Utc::now());
            }
            catalog.save(self.meta_dir())?;
            Authority::set_catalog_timestamp(
                self.conn(),
                &result.authority.prefix,
                catalog.last_modified(),
            )?;
        }

        // A corrupt cache must not hide the aggregate result
        let prefixes = self.authority_prefixes()?;
        let mut catalogs = Vec::new();
        for prefix in &prefixes {
            match Catalog::load(self.meta_dir(), prefix) {
                Ok(Some(catalog)) => catalogs.push(catalog),
                Ok(None) => {}
                Err(e) if failures.contains(prefix) => {
                    warn!("Leaving out cached catalog for {}: {}", prefix, e);
                }
                Err(e) => {
                    warn!("Saved catalog for {} does not load: {}", prefix, e);
                    let origin = self
                        .authority(prefix)?
                        .map(|a| a.origin_url)
                        .unwrap_or_default();
                    failures.demote_success(
                        prefix,
                        &origin,
                        FetchError::Protocol(e.to_string()),
                    );
                }
            }
        }
        self.catalog = MergedCatalog::build(&catalogs, &prefixes)?;

        info!(
            "{}/{} catalogs successfully updated",
            failures.succeeded, failures.total
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CatalogRefresh(failures))
        }
    }
}
