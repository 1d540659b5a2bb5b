// src/repository/transport.rs

//! Fetching resources from an authority
//!
//! The engine only needs "fetch this path from this authority, get bytes or a
//! structured failure". `Transport` is that seam; `HttpTransport` implements
//! it with a blocking reqwest client, tests implement it in memory.
//!
//! Endpoints, relative to the authority origin:
//! - `catalog/0/` full catalog document
//! - `catalog/0/updatelog?since=<ts>` catalog delta
//! - `manifest/0/<url-encoded fmri>`
//! - `file/0/<sha256>`
//! - `search/0/<url-encoded token>`

use crate::db::models::Authority;
use crate::fmri::Fmri;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const CATALOG_PATH: &str = "catalog/0/";

/// Structured failure of a single request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("connection timed out")]
    Timeout,

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("unable to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Fetch a resource relative to an authority's origin
pub trait Transport: Send + Sync {
    fn get(&self, authority: &Authority, path: &str) -> FetchResult<Vec<u8>>;
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn update_log_path(since: DateTime<Utc>) -> String {
    format!("catalog/0/updatelog?since={}", encode(&since.to_rfc3339()))
}

pub fn manifest_path(fmri: &Fmri) -> String {
    format!("manifest/0/{}", encode(&fmri.to_string()))
}

pub fn file_path(hash: &str) -> String {
    format!("file/0/{}", hash)
}

pub fn search_path(token: &str) -> String {
    format!("search/0/{}", encode(token))
}

/// Timeouts tolerated across one fan-out, shared by every request in it
#[derive(Debug)]
pub struct TimeoutBudget {
    max: usize,
    used: AtomicUsize,
}

impl TimeoutBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            used: AtomicUsize::new(0),
        }
    }

    /// Count one timeout; true while another attempt is still allowed
    fn record_timeout(&self) -> bool {
        self.used.fetch_add(1, Ordering::SeqCst) + 1 < self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.used.load(Ordering::SeqCst) >= self.max
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Fetch through `transport`, retrying timeouts while the budget allows
    ///
    /// Once the budget is spent no new request is started; the authority is
    /// reported as timed out without being contacted.
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        authority: &Authority,
        path: &str,
    ) -> FetchResult<Vec<u8>> {
        loop {
            if self.is_exhausted() {
                debug!("Timeout budget spent, not contacting {}", authority.prefix);
                return Err(FetchError::Timeout);
            }
            match transport.get(authority, path) {
                Err(FetchError::Timeout) => {
                    if !self.record_timeout() {
                        return Err(FetchError::Timeout);
                    }
                    warn!("Request to {} timed out, retrying", authority.prefix);
                }
                other => return other,
            }
        }
    }
}

/// HTTP transport backed by reqwest
///
/// One client per authority so each can carry its own client certificate.
pub struct HttpTransport {
    timeout: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, authority: &Authority) -> FetchResult<Client> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| FetchError::Protocol("HTTP client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&authority.prefix) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().timeout(self.timeout);
        if let (Some(key), Some(cert)) = (&authority.ssl_key, &authority.ssl_cert) {
            let mut pem = std::fs::read(key)
                .map_err(|e| FetchError::Protocol(format!("cannot read SSL key {key}: {e}")))?;
            pem.extend(
                std::fs::read(cert)
                    .map_err(|e| FetchError::Protocol(format!("cannot read SSL cert {cert}: {e}")))?,
            );
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| FetchError::Protocol(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Protocol(format!("failed to create HTTP client: {e}")))?;

        clients.insert(authority.prefix.clone(), client.clone());
        Ok(client)
    }
}

impl Transport for HttpTransport {
    fn get(&self, authority: &Authority, path: &str) -> FetchResult<Vec<u8>> {
        let url = format!("{}{}", authority.base_url(), path);
        debug!("GET {}", url);

        let client = self.client_for(authority)?;
        let response = client.get(&url).send().map_err(|e| classify(&e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let bytes = response.bytes().map_err(|e| classify(&e, &url))?;
        Ok(bytes.to_vec())
    }
}

fn classify(err: &reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        FetchError::Connect {
            host,
            reason: err.to_string(),
        }
    } else {
        FetchError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingTimeouts {
        calls: AtomicUsize,
        succeed_after: usize,
    }

    impl Transport for CountingTimeouts {
        fn get(&self, _authority: &Authority, _path: &str) -> FetchResult<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.succeed_after {
                Ok(b"ok".to_vec())
            } else {
                Err(FetchError::Timeout)
            }
        }
    }

    fn authority() -> Authority {
        Authority::new("test", "http://pkg.example.org")
    }

    #[test]
    fn test_timeout_retried_within_budget() {
        let transport = CountingTimeouts {
            calls: AtomicUsize::new(0),
            succeed_after: 2,
        };
        let budget = TimeoutBudget::new(4);
        assert_eq!(budget.fetch(&transport, &authority(), CATALOG_PATH).unwrap(), b"ok");
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_budget_exhaustion_is_final() {
        let transport = CountingTimeouts {
            calls: AtomicUsize::new(0),
            succeed_after: usize::MAX,
        };
        let budget = TimeoutBudget::new(2);
        assert_eq!(
            budget.fetch(&transport, &authority(), CATALOG_PATH),
            Err(FetchError::Timeout)
        );
        assert!(budget.is_exhausted());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        // Nothing more is contacted once the budget is spent
        assert_eq!(
            budget.fetch(&transport, &authority(), CATALOG_PATH),
            Err(FetchError::Timeout)
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_endpoint_paths() {
        let fmri = Fmri::parse("pkg://example.org/library/libc@1.0").unwrap();
        assert_eq!(
            manifest_path(&fmri),
            "manifest/0/pkg%3A%2F%2Fexample.org%2Flibrary%2Flibc%401.0"
        );
        assert_eq!(file_path("abc"), "file/0/abc");
        assert_eq!(search_path("/usr/bin"), "search/0/%2Fusr%2Fbin");
    }
}
