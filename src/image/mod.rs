// src/image/mod.rs

//! The image: an installed-software root and its packaging metadata
//!
//! `Image` is the explicit context every operation runs against. It owns the
//! image database connection, the configuration, the transport used to reach
//! authorities, and the merged catalog view. Metadata lives under
//! `var/pkg` for full images and `.org.opensolaris,pkg` for user images.

mod authorities;
mod inventory;

pub use inventory::{InventoryResult, PkgState, PkgStatus};

use crate::config::{ImageConfig, ImageType};
use crate::db::{
    self,
    models::{Authority, InstalledPackage},
    paths,
};
use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::manifest::{self, ActionFilter, Manifest};
use crate::plan::ImagePlan;
use crate::progress::{Phase, ProgressTracker};
use crate::repository::{
    HttpTransport, MergedCatalog, TimeoutBudget, Transport, validate_origin, validate_prefix,
};
use crate::transaction;
use fs2::FileExt;
use rusqlite::Connection;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Image {
    root: PathBuf,
    meta_dir: PathBuf,
    config: ImageConfig,
    conn: Connection,
    transport: Arc<dyn Transport>,
    catalog: MergedCatalog,
    /// Plan built by the last `make_*_plan` call, consumed by execution
    pub imageplan: Option<ImagePlan>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("root", &self.root)
            .field("meta_dir", &self.meta_dir)
            .field("image_type", &self.config.image_type)
            .finish_non_exhaustive()
    }
}

impl Image {
    /// Create a new image at `root` with `prefix` as its preferred authority
    pub fn create(
        root: &Path,
        image_type: ImageType,
        prefix: &str,
        origin: &str,
        ssl_key: Option<&str>,
        ssl_cert: Option<&str>,
    ) -> Result<Self> {
        let config = ImageConfig::new(image_type);
        let transport = Arc::new(HttpTransport::new(config.client_timeout()));
        Self::create_with_transport(root, image_type, prefix, origin, ssl_key, ssl_cert, transport)
    }

    pub fn create_with_transport(
        root: &Path,
        image_type: ImageType,
        prefix: &str,
        origin: &str,
        ssl_key: Option<&str>,
        ssl_cert: Option<&str>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        validate_prefix(prefix)?;
        validate_origin(origin)?;

        let meta_dir = root.join(image_type.meta_dir());
        if paths::db_path(&meta_dir).exists() {
            return Err(Error::Config(format!(
                "an image already exists at {}",
                root.display()
            )));
        }

        info!("Creating {} image at {}", image_type, root.display());
        for dir in [
            meta_dir.clone(),
            paths::catalog_root(&meta_dir),
            paths::manifest_root(&meta_dir),
            paths::download_dir(&meta_dir),
            paths::txn_dir(&meta_dir),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let mut config = ImageConfig::new(image_type);
        config.save(&meta_dir)?;
        config.apply_env()?;

        db::init(&paths::db_path(&meta_dir))?;
        let mut conn = db::open(&paths::db_path(&meta_dir))?;
        db::transaction(&mut conn, |tx| {
            let mut authority = Authority::new(prefix, origin);
            authority.ssl_key = ssl_key.map(str::to_string);
            authority.ssl_cert = ssl_cert.map(str::to_string);
            authority.insert(tx)?;
            Authority::set_preferred(tx, prefix)
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            meta_dir,
            config,
            conn,
            transport,
            catalog: MergedCatalog::default(),
            imageplan: None,
        })
    }

    /// Walk up from `dir` to the nearest directory holding an image
    pub fn find_root(dir: &Path) -> Result<(PathBuf, ImageType)> {
        for candidate in dir.ancestors() {
            if let Some(image_type) = Self::detect_type(candidate) {
                debug!("Found {} image at {}", image_type, candidate.display());
                return Ok((candidate.to_path_buf(), image_type));
            }
        }
        Err(Error::ImageNotFound(dir.to_path_buf()))
    }

    fn detect_type(root: &Path) -> Option<ImageType> {
        ImageType::all()
            .into_iter()
            .find(|t| paths::db_path(&root.join(t.meta_dir())).is_file())
    }

    /// Open the image rooted at `root`
    ///
    /// Applies environment overrides to the configuration and rolls back any
    /// execution a crash left behind.
    pub fn open(root: &Path) -> Result<Self> {
        let image_type = Self::detect_type(root)
            .ok_or_else(|| Error::ImageNotFound(root.to_path_buf()))?;
        let mut config = ImageConfig::load(&root.join(image_type.meta_dir()))?;
        config.apply_env()?;
        let transport = Arc::new(HttpTransport::new(config.client_timeout()));
        Self::open_with_transport(root, transport)
    }

    pub fn open_with_transport(root: &Path, transport: Arc<dyn Transport>) -> Result<Self> {
        let image_type = Self::detect_type(root)
            .ok_or_else(|| Error::ImageNotFound(root.to_path_buf()))?;
        let meta_dir = root.join(image_type.meta_dir());

        let mut config = ImageConfig::load(&meta_dir)?;
        config.image_type = image_type;
        config.apply_env()?;

        let conn = db::open(&paths::db_path(&meta_dir))?;
        // Journals of a process still holding the lock are live, not interrupted
        match try_lock(&meta_dir) {
            Ok(Some(_guard)) => {
                for outcome in transaction::recover(root, &meta_dir, &conn)? {
                    warn!("Recovered interrupted execution: {}", outcome);
                }
            }
            Ok(None) => debug!("Image at {} is locked; skipping recovery", root.display()),
            Err(e) => warn!("Cannot lock {} for recovery: {}", root.display(), e),
        }

        Ok(Self {
            root: root.to_path_buf(),
            meta_dir,
            config,
            conn,
            transport,
            catalog: MergedCatalog::default(),
            imageplan: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Replace the configuration and persist it
    pub fn set_config(&mut self, config: ImageConfig) -> Result<()> {
        config.save(&self.meta_dir)?;
        self.config = config;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Transport handle for work that outlives a borrow of the image
    pub(crate) fn shared_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Fresh timeout budget for one network operation
    pub fn timeout_budget(&self) -> TimeoutBudget {
        TimeoutBudget::new(self.config.max_timeout_count)
    }

    /// Merged catalog as of the last load or refresh
    pub fn catalog(&self) -> &MergedCatalog {
        &self.catalog
    }

    /// Take the image's exclusive lock, waiting briefly for another holder
    pub fn lock(&self) -> Result<ImageLock> {
        const MAX_RETRIES: u32 = 5;

        for attempt in 0..MAX_RETRIES {
            if let Some(lock) = try_lock(&self.meta_dir)? {
                debug!("Acquired image lock for {}", self.root.display());
                return Ok(lock);
            }
            if attempt < MAX_RETRIES - 1 {
                std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
            }
        }

        Err(Error::TransactionError(format!(
            "image at {} is locked by another pkg process",
            self.root.display()
        )))
    }

    /// Manifest for `fmri`, from the cache or its authority
    ///
    /// With `filtered`, actions not applicable to this image's variants and
    /// facets are dropped.
    pub fn get_manifest(&self, fmri: &Fmri, filtered: bool) -> Result<Manifest> {
        let raw = self.raw_manifest(fmri)?;
        if filtered {
            Ok(raw.filtered(&self.config.variants, &self.config.facets, &[]))
        } else {
            Ok(raw)
        }
    }

    /// Filtered manifest as a plan sees it
    pub(crate) fn plan_manifest(&self, fmri: &Fmri, filters: &[ActionFilter]) -> Result<Manifest> {
        let raw = self.raw_manifest(fmri)?;
        Ok(raw.filtered(&self.config.variants, &self.config.facets, filters))
    }

    fn raw_manifest(&self, fmri: &Fmri) -> Result<Manifest> {
        let prefix = self.cache_prefix(fmri)?;
        if let Some(cached) = manifest::cache::load(&self.meta_dir, &prefix, fmri)? {
            return Ok(cached);
        }
        let authority = self.authority_for(fmri)?;
        manifest::cache::fetch(
            &self.meta_dir,
            self.transport(),
            &authority,
            fmri,
            &self.timeout_budget(),
        )
    }

    /// Authority whose manifest cache holds `fmri`
    pub(crate) fn cache_prefix(&self, fmri: &Fmri) -> Result<String> {
        match &fmri.authority {
            Some(prefix) => Ok(prefix.clone()),
            None => Ok(self.authority_for(fmri)?.prefix),
        }
    }

    /// Authority that serves `fmri`; the preferred one when it names none
    pub(crate) fn authority_for(&self, fmri: &Fmri) -> Result<Authority> {
        match fmri.authority.as_deref() {
            Some(prefix) => self
                .authority(prefix)?
                .ok_or_else(|| Error::UnknownAuthority(prefix.to_string())),
            None => self
                .preferred_authority()?
                .ok_or_else(|| Error::UnknownAuthority(fmri.to_string())),
        }
    }

    /// Hold the installed matches of `patterns` at their current versions, or
    /// release them; returns the packages changed
    pub fn set_frozen(&mut self, patterns: &[String], frozen: bool) -> Result<Vec<Fmri>> {
        let matched: Vec<Fmri> = self
            .resolve(patterns, false)?
            .into_iter()
            .map(|(fmri, _)| fmri)
            .collect();
        db::transaction(self.conn_mut(), |tx| {
            for fmri in &matched {
                InstalledPackage::set_frozen(tx, &fmri.name, frozen)?;
            }
            Ok(())
        })?;
        info!(
            "{} {} package(s)",
            if frozen { "Froze" } else { "Unfroze" },
            matched.len()
        );
        Ok(matched)
    }

    /// Build and evaluate a plan installing the latest match of each pattern
    pub fn make_install_plan(
        &mut self,
        patterns: &[String],
        progress: &dyn ProgressTracker,
        filters: Vec<ActionFilter>,
        verbose: bool,
        noexecute: bool,
    ) -> Result<()> {
        let mut plan = ImagePlan::new(false, filters);
        plan.set_noexecute(noexecute);
        progress.start(Phase::Evaluate, patterns.len() as u64);
        plan.propose_install(self, patterns)?;
        self.finish_plan(plan, progress, verbose)
    }

    /// Build and evaluate a plan removing the installed match of each pattern
    pub fn make_uninstall_plan(
        &mut self,
        patterns: &[String],
        recursive: bool,
        progress: &dyn ProgressTracker,
        verbose: bool,
        noexecute: bool,
    ) -> Result<()> {
        let mut plan = ImagePlan::new(recursive, Vec::new());
        plan.set_noexecute(noexecute);
        progress.start(Phase::Evaluate, patterns.len() as u64);
        for pattern in patterns {
            plan.propose_removal(self, pattern)?;
            progress.increment(1);
        }
        self.finish_plan(plan, progress, verbose)
    }

    /// Build and evaluate a plan updating every installed package
    pub fn make_update_plan(
        &mut self,
        progress: &dyn ProgressTracker,
        verbose: bool,
        noexecute: bool,
    ) -> Result<()> {
        let mut plan = ImagePlan::new(false, Vec::new());
        plan.set_noexecute(noexecute);
        progress.start(Phase::Evaluate, 0);
        plan.propose_update_all(self)?;
        self.finish_plan(plan, progress, verbose)
    }

    fn finish_plan(
        &mut self,
        mut plan: ImagePlan,
        progress: &dyn ProgressTracker,
        verbose: bool,
    ) -> Result<()> {
        self.imageplan = None;
        if verbose {
            for line in plan.to_string().lines() {
                progress.set_message(line);
            }
        }
        plan.evaluate(self)?;
        if verbose {
            for line in plan.to_string().lines() {
                progress.set_message(line);
            }
        }
        progress.finish_with_message("Plan evaluated");
        self.imageplan = Some(plan);
        Ok(())
    }
}

/// Take the image lock without waiting; `None` when another handle holds it
fn try_lock(meta_dir: &Path) -> Result<Option<ImageLock>> {
    let file = File::create(paths::lock_path(meta_dir))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(ImageLock { file })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Exclusive hold on an image; released on drop
#[derive(Debug)]
pub struct ImageLock {
    file: File,
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
