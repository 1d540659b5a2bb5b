// src/repository/failures.rs

//! Aggregated per-authority failures from a fan-out
//!
//! Catalog refresh and remote search contact every authority and report all
//! failures together instead of stopping at the first one.

use super::transport::FetchError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityFailure {
    pub prefix: String,
    pub origin: String,
    pub error: FetchError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityFailures {
    pub failures: Vec<AuthorityFailure>,
    /// Authorities attempted
    pub total: usize,
    pub succeeded: usize,
    /// The shared timeout budget ran out during the fan-out
    pub timeouts_exhausted: bool,
}

impl AuthorityFailures {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, prefix: &str, origin: &str, error: FetchError) {
        self.failures.push(AuthorityFailure {
            prefix: prefix.to_string(),
            origin: origin.to_string(),
            error,
        });
    }

    /// Turn a counted success for `prefix` into a failure
    pub fn demote_success(&mut self, prefix: &str, origin: &str, error: FetchError) {
        self.succeeded = self.succeeded.saturating_sub(1);
        self.record_failure(prefix, origin, error);
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.failures.iter().any(|f| f.prefix == prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

impl fmt::Display for AuthorityFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} authorities failed",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "; {} ({}): {}", failure.prefix, failure.origin, failure.error)?;
        }
        if self.timeouts_exhausted {
            write!(f, "; maximum number of timeouts exceeded")?;
        }
        Ok(())
    }
}
