// src/version/mod.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! Package versions have the form `release[,build_release][-branch][:timestamp]`:
//! - "1.0.3" → release=1.0.3
//! - "1.0.3,5.11" → release=1.0.3, build_release=5.11
//! - "1.0.3,5.11-0.86" → branch=0.86
//! - "1.0.3,5.11-0.86:20080426T173208Z" → with packaging timestamp
//!
//! Ordering compares release, then build_release, then branch, then timestamp;
//! a component that is absent sorts before any present one.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A dot-separated sequence of non-negative integers ("5.11", "0.86.1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DotSequence(Vec<u64>);

impl DotSequence {
    pub fn new(segments: Vec<u64>) -> Self {
        Self(segments)
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(invalid(s, "empty dot sequence"));
        }

        let segments = s
            .split('.')
            .map(|seg| {
                if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid(s, "segments must be non-negative integers"));
                }
                if seg.len() > 1 && seg.starts_with('0') {
                    return Err(invalid(s, "segments may not have leading zeros"));
                }
                seg.parse::<u64>().map_err(|e| invalid(s, &e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    /// True when every segment of `prefix` matches the leading segments of self
    pub fn starts_with(&self, prefix: &DotSequence) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

/// A parsed package version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgVersion {
    pub release: DotSequence,
    pub build_release: Option<DotSequence>,
    pub branch: Option<DotSequence>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PkgVersion {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let (rest, timestamp) = match s.split_once(':') {
            Some((rest, ts)) => {
                let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
                    .map_err(|e| invalid(s, &format!("bad timestamp '{ts}': {e}")))?;
                (rest, Some(naive.and_utc()))
            }
            None => (s, None),
        };

        let (rest, branch) = match rest.split_once('-') {
            Some((rest, branch)) => (rest, Some(DotSequence::parse(branch).map_err(|_| {
                invalid(s, &format!("bad branch '{branch}'"))
            })?)),
            None => (rest, None),
        };

        let (release, build_release) = match rest.split_once(',') {
            Some((release, build)) => (release, Some(DotSequence::parse(build).map_err(|_| {
                invalid(s, &format!("bad build release '{build}'"))
            })?)),
            None => (rest, None),
        };

        let release = DotSequence::parse(release)
            .map_err(|_| invalid(s, &format!("bad release '{release}'")))?;

        Ok(Self {
            release,
            build_release,
            branch,
            timestamp,
        })
    }

    /// Compare two versions
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| self.build_release.cmp(&other.build_release))
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }

    /// True if self is at least `base` and agrees with every component `base` specifies
    ///
    /// "1.2.3" is a successor of "1.2"; "1.3" is not.
    pub fn is_successor(&self, base: &PkgVersion) -> bool {
        if !self.release.starts_with(&base.release) {
            return false;
        }
        if let Some(ref build) = base.build_release
            && !self.build_release.as_ref().is_some_and(|b| b.starts_with(build))
        {
            return false;
        }
        if let Some(ref branch) = base.branch
            && !self.branch.as_ref().is_some_and(|b| b.starts_with(branch))
        {
            return false;
        }
        match base.timestamp {
            Some(ts) => self.timestamp == Some(ts),
            None => true,
        }
    }

    /// Packaging timestamp formatted the way it appears in a version string
    pub fn timestamp_string(&self) -> Option<String> {
        self.timestamp.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release)?;
        if let Some(ref build) = self.build_release {
            write!(f, ",{}", build)?;
        }
        if let Some(ref branch) = self.branch {
            write!(f, "-{}", branch)?;
        }
        if let Some(ts) = self.timestamp_string() {
            write!(f, ":{}", ts)?;
        }
        Ok(())
    }
}

impl FromStr for PkgVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PkgVersion::parse(s)
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn invalid(version: &str, reason: &str) -> Error {
    Error::InvalidVersion {
        version: version.to_string(),
        reason: reason.to_string(),
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(PkgVersion),
    /// Greater than or equal (`depend type=require`)
    GreaterOrEqual(PkgVersion),
    /// Successor of the given version (`depend type=incorporate`)
    Successor(PkgVersion),
    /// Both constraints must be satisfied
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">= 1.2" → GreaterOrEqual(1.2)
    /// - "~ 1.2" → Successor(1.2)
    /// - "= 1.2.0" or "1.2.0" → Exact(1.2.0)
    /// - ">= 1.0, ~ 1" → And(...)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some((left, right)) = s.split_once(',') {
            let left = Self::parse(left)?;
            let right = Self::parse(right)?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(PkgVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('~') {
            Ok(VersionConstraint::Successor(PkgVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(PkgVersion::parse(rest.trim())?))
        } else {
            Ok(VersionConstraint::Exact(PkgVersion::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &PkgVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::Successor(v) => version.is_successor(v),
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::Successor(v) => write!(f, "~ {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}
