// src/repository/sync.rs

//! Catalog synchronization
//!
//! Fetches every authority's catalog concurrently and joins the results in
//! configuration order. A local catalog with a `last_modified` stamp is
//! brought up to date through the update log unless a full refresh is
//! requested; an authority without an update log (HTTP 404) gets a full
//! fetch instead.

use crate::db::models::Authority;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::catalog::Catalog;
use super::failures::AuthorityFailures;
use super::transport::{
    CATALOG_PATH, FetchError, FetchResult, TimeoutBudget, Transport, update_log_path,
};

/// Outcome for one authority, in the order the authorities were given
pub struct SyncResult {
    pub authority: Authority,
    pub result: FetchResult<Catalog>,
}

/// Refresh the catalogs of `authorities` concurrently
///
/// `local` holds the currently cached catalog for each authority (same
/// order). Every authority is attempted; failures do not stop the others.
pub fn sync_catalogs(
    transport: &dyn Transport,
    authorities: Vec<(Authority, Option<Catalog>)>,
    full: bool,
    budget: &TimeoutBudget,
) -> Vec<SyncResult> {
    info!("Refreshing {} catalog(s)", authorities.len());

    authorities
        .into_par_iter()
        .map(|(authority, local)| {
            let result = sync_one(transport, &authority, local, full, budget);
            if let Err(ref e) = result {
                warn!("Catalog refresh for {} failed: {}", authority.prefix, e);
            }
            SyncResult { authority, result }
        })
        .collect()
}

fn sync_one(
    transport: &dyn Transport,
    authority: &Authority,
    local: Option<Catalog>,
    full: bool,
    budget: &TimeoutBudget,
) -> FetchResult<Catalog> {
    if !full
        && let Some(mut local) = local
        && let Some(since) = local.last_modified()
    {
        match budget.fetch(transport, authority, &update_log_path(since)) {
            Ok(bytes) => {
                let applied = local
                    .apply_update_log(&bytes)
                    .map_err(|e| FetchError::Protocol(e.to_string()))?;
                debug!("Applied {} catalog update(s) for {}", applied, authority.prefix);
                return Ok(local);
            }
            Err(FetchError::Http { status: 404, .. }) => {
                debug!("No update log at {}, fetching full catalog", authority.prefix);
            }
            Err(e) => return Err(e),
        }
    }

    let bytes = budget.fetch(transport, authority, CATALOG_PATH)?;
    Catalog::parse(&authority.prefix, &bytes).map_err(|e| FetchError::Protocol(e.to_string()))
}

/// Summarize results into per-authority failure counts
pub fn summarize(results: &[SyncResult], budget: &TimeoutBudget) -> AuthorityFailures {
    let mut failures = AuthorityFailures::new(results.len());
    for r in results {
        match &r.result {
            Ok(_) => failures.record_success(),
            Err(e) => failures.record_failure(&r.authority.prefix, &r.authority.origin_url, e.clone()),
        }
    }
    failures.timeouts_exhausted = budget.is_exhausted();
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmri::Fmri;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed responses keyed by "prefix path" and records requests
    #[derive(Default)]
    struct FixedTransport {
        responses: HashMap<String, FetchResult<Vec<u8>>>,
        requests: Mutex<Vec<String>>,
    }

    impl Transport for FixedTransport {
        fn get(&self, authority: &Authority, path: &str) -> FetchResult<Vec<u8>> {
            let key = format!("{} {}", authority.prefix, path);
            self.requests.lock().unwrap().push(key.clone());
            self.responses.get(&key).cloned().unwrap_or(Err(FetchError::Http {
                status: 404,
                reason: "Not Found".to_string(),
            }))
        }
    }

    fn catalog(prefix: &str, entries: &[&str]) -> Catalog {
        let mut cat = Catalog::new(prefix);
        for e in entries {
            cat.insert(&Fmri::parse(e).unwrap()).unwrap();
        }
        cat.set_last_modified("2008-04-26T00:00:00Z".parse().unwrap());
        cat
    }

    #[test]
    fn test_results_keep_configuration_order() {
        let mut transport = FixedTransport::default();
        for p in ["a", "b", "c"] {
            let bytes = catalog(p, &["libc@1.0"]).to_bytes().unwrap();
            transport.responses.insert(format!("{p} {CATALOG_PATH}"), Ok(bytes));
        }
        transport.responses.insert(
            format!("b {CATALOG_PATH}"),
            Err(FetchError::Connect {
                host: "b.example".to_string(),
                reason: "refused".to_string(),
            }),
        );

        let authorities = ["a", "b", "c"]
            .iter()
            .map(|p| (Authority::new(*p, format!("http://{p}.example")), None))
            .collect();
        let budget = TimeoutBudget::new(4);
        let results = sync_catalogs(&transport, authorities, true, &budget);

        let prefixes: Vec<_> = results.iter().map(|r| r.authority.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["a", "b", "c"]);

        let summary = summarize(&results, &budget);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].prefix, "b");
    }

    #[test]
    fn test_incremental_falls_back_to_full_on_404() {
        let local = catalog("a", &["libc@1.0"]);
        let remote = catalog("a", &["libc@1.0", "libc@1.1"]);

        let mut transport = FixedTransport::default();
        transport
            .responses
            .insert(format!("a {CATALOG_PATH}"), Ok(remote.to_bytes().unwrap()));

        let budget = TimeoutBudget::new(4);
        let results = sync_catalogs(
            &transport,
            vec![(Authority::new("a", "http://a.example"), Some(local))],
            false,
            &budget,
        );
        assert_eq!(results[0].result.as_ref().unwrap(), &remote);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("updatelog"));
    }

    #[test]
    fn test_incremental_applies_update_log() {
        let local = catalog("a", &["libc@1.0"]);
        let since = local.last_modified().unwrap();
        let log = br#"{"format":1,"last_modified":"2008-04-27T00:00:00Z",
            "updates":[{"op":"add","fmri":"libc@1.1"}]}"#;

        let mut transport = FixedTransport::default();
        transport
            .responses
            .insert(format!("a {}", update_log_path(since)), Ok(log.to_vec()));

        let budget = TimeoutBudget::new(4);
        let results = sync_catalogs(
            &transport,
            vec![(Authority::new("a", "http://a.example"), Some(local))],
            false,
            &budget,
        );
        assert_eq!(results[0].result.as_ref().unwrap().package_count(), 2);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_document_is_protocol_failure() {
        let mut transport = FixedTransport::default();
        transport
            .responses
            .insert(format!("a {CATALOG_PATH}"), Ok(b"<html>".to_vec()));

        let budget = TimeoutBudget::new(4);
        let results = sync_catalogs(
            &transport,
            vec![(Authority::new("a", "http://a.example"), None)],
            true,
            &budget,
        );
        assert!(matches!(results[0].result, Err(FetchError::Protocol(_))));
    }
}
