// src/repository/mod.rs

//! Authorities, their catalogs, and fetching from them
//!
//! This module provides functionality for:
//! - Validating authority prefixes and origins
//! - Fetching resources through a pluggable `Transport`
//! - Parsing, caching, and merging per-authority catalogs
//! - Refreshing every catalog concurrently with aggregated failures

mod authority;
mod catalog;
mod failures;
mod sync;
mod transport;

pub use authority::{PREFERRED_MARKER, validate_origin, validate_prefix};
pub use catalog::{CATALOG_FORMAT, Catalog, CatalogState, MergedCatalog};
pub use failures::{AuthorityFailure, AuthorityFailures};
pub use sync::{SyncResult, summarize, sync_catalogs};
pub use transport::{
    CATALOG_PATH, FetchError, FetchResult, HttpTransport, TimeoutBudget, Transport, file_path,
    manifest_path, search_path, update_log_path,
};
