// src/config.rs
//! Image configuration
//!
//! Stored as TOML in `<imgdir>/pkg.toml`. A missing file means defaults.
//!
//! # Example (TOML)
//!
//! ```toml
//! image_type = "full"
//! client_timeout_secs = 30
//! max_timeout_count = 4
//! max_bytes_in_flight = 1048576
//!
//! [variants]
//! "variant.arch" = "x86_64"
//!
//! [facets]
//! "facet.doc" = false
//! ```
//!
//! `PKG_CLIENT_TIMEOUT` and `PKG_TIMEOUT_MAX` override the timeout settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "pkg.toml";
pub const ENV_CLIENT_TIMEOUT: &str = "PKG_CLIENT_TIMEOUT";
pub const ENV_TIMEOUT_MAX: &str = "PKG_TIMEOUT_MAX";

/// Kind of image, which decides where its metadata lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    /// A whole system root; metadata under `var/pkg`
    #[default]
    Full,
    /// A user-owned tree; metadata under `.org.opensolaris,pkg`
    User,
}

impl ImageType {
    /// Metadata directory relative to the image root
    pub fn meta_dir(&self) -> &'static Path {
        match self {
            ImageType::Full => Path::new("var/pkg"),
            ImageType::User => Path::new(".org.opensolaris,pkg"),
        }
    }

    pub fn all() -> [ImageType; 2] {
        [ImageType::Full, ImageType::User]
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageType::Full => write!(f, "full"),
            ImageType::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub image_type: ImageType,

    /// `variant.*` values; actions tagged with another value are filtered out
    #[serde(default = "default_variants")]
    pub variants: BTreeMap<String, String>,

    /// `facet.*` switches; actions tagged with a disabled facet are filtered out
    #[serde(default)]
    pub facets: BTreeMap<String, bool>,

    /// Per-request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,

    /// Timeouts tolerated across one network operation before giving up
    #[serde(default = "default_max_timeout_count")]
    pub max_timeout_count: usize,

    /// Upper bound on payload bytes downloading at once during preexecute
    #[serde(default = "default_max_bytes_in_flight")]
    pub max_bytes_in_flight: u64,
}

fn default_variants() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "variant.arch".to_string(),
        std::env::consts::ARCH.to_string(),
    )])
}

fn default_client_timeout() -> u64 {
    30
}

fn default_max_timeout_count() -> usize {
    4
}

fn default_max_bytes_in_flight() -> u64 {
    1024 * 1024
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            image_type: ImageType::default(),
            variants: default_variants(),
            facets: BTreeMap::new(),
            client_timeout_secs: default_client_timeout(),
            max_timeout_count: default_max_timeout_count(),
            max_bytes_in_flight: default_max_bytes_in_flight(),
        }
    }
}

impl ImageConfig {
    pub fn new(image_type: ImageType) -> Self {
        Self {
            image_type,
            ..Default::default()
        }
    }

    pub fn path(meta_dir: &Path) -> PathBuf {
        meta_dir.join(CONFIG_FILE)
    }

    /// Load from `<meta_dir>/pkg.toml`, falling back to defaults when absent
    pub fn load(meta_dir: &Path) -> Result<Self> {
        let path = Self::path(meta_dir);
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: ImageConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `<meta_dir>/pkg.toml` via temp file and rename
    pub fn save(&self, meta_dir: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize configuration: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(meta_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(Self::path(meta_dir)).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Apply `PKG_CLIENT_TIMEOUT` / `PKG_TIMEOUT_MAX` from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_CLIENT_TIMEOUT) {
            self.client_timeout_secs = parse_positive(ENV_CLIENT_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MAX) {
            self.max_timeout_count = parse_positive(ENV_TIMEOUT_MAX, &value)? as usize;
        }
        Ok(())
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.client_timeout_secs == 0 {
            return Err(Error::Config("client_timeout_secs must be positive".to_string()));
        }
        if self.max_timeout_count == 0 {
            return Err(Error::Config("max_timeout_count must be positive".to_string()));
        }
        if self.max_bytes_in_flight == 0 {
            return Err(Error::Config("max_bytes_in_flight must be positive".to_string()));
        }
        if let Some(key) = self.variants.keys().find(|k| !k.starts_with("variant.")) {
            return Err(Error::Config(format!("'{key}' is not a variant name")));
        }
        if let Some(key) = self.facets.keys().find(|k| !k.starts_with("facet.")) {
            return Err(Error::Config(format!("'{key}' is not a facet name")));
        }
        Ok(())
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got '{value}'"
        ))),
    }
}
