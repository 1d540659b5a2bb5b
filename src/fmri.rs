// src/fmri.rs

//! Package identifiers (FMRIs) and name patterns
//!
//! An FMRI names one version of a package from one authority:
//! - `pkg://example.org/library/libc@1.0,5.11-0.1:20080426T173208Z`
//! - `pkg:/library/libc@1.0` (no authority)
//! - `library/libc@1.0` (bare form accepted on input)
//!
//! Two FMRIs are the "same package" when their names match, whatever the
//! authority or version.

use crate::error::{Error, Result};
use crate::version::PkgVersion;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const SCHEME_WITH_AUTHORITY: &str = "pkg://";
const SCHEME: &str = "pkg:/";

/// A parsed package identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fmri {
    pub authority: Option<String>,
    pub name: String,
    pub version: Option<PkgVersion>,
}

impl Fmri {
    pub fn new(authority: Option<&str>, name: &str, version: Option<PkgVersion>) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            authority: authority.map(str::to_string),
            name: name.to_string(),
            version,
        })
    }

    /// Parse any of the accepted textual forms
    pub fn parse(s: &str) -> Result<Self> {
        let (authority, rest) = split_scheme(s).ok_or_else(|| Error::InvalidFmri(s.to_string()))?;

        let (name, version) = match rest.split_once('@') {
            Some((name, ver)) => {
                let version = PkgVersion::parse(ver).map_err(|_| Error::InvalidFmri(s.to_string()))?;
                (name, Some(version))
            }
            None => (rest, None),
        };

        validate_name(name).map_err(|_| Error::InvalidFmri(s.to_string()))?;

        Ok(Self {
            authority: authority.map(str::to_string),
            name: name.to_string(),
            version,
        })
    }

    /// Copy of this FMRI attributed to `authority`
    pub fn with_authority(&self, authority: &str) -> Self {
        Self {
            authority: Some(authority.to_string()),
            ..self.clone()
        }
    }

    /// Names match irrespective of authority and version
    pub fn is_same_pkg(&self, other: &Fmri) -> bool {
        self.name == other.name
    }

    /// Textual form without the authority when it is the preferred one
    pub fn get_short_fmri(&self, preferred: Option<&str>) -> String {
        match self.authority.as_deref() {
            Some(auth) if Some(auth) != preferred => self.to_string(),
            _ => format!("{}{}", SCHEME, self.name_and_version()),
        }
    }

    /// `name@version`, or just the name when unversioned
    pub fn name_and_version(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{}", self.name, v),
            None => self.name.clone(),
        }
    }

    /// Directory name used to key the on-disk manifest cache
    pub fn stem_dir(&self) -> String {
        url::form_urlencoded::byte_serialize(self.name.as_bytes()).collect()
    }

    /// Version directory name for the manifest cache
    pub fn version_dir(&self) -> Option<String> {
        self.version
            .as_ref()
            .map(|v| url::form_urlencoded::byte_serialize(v.to_string().as_bytes()).collect())
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.authority {
            Some(auth) => write!(f, "{}{}/{}", SCHEME_WITH_AUTHORITY, auth, self.name_and_version()),
            None => write!(f, "{}{}", SCHEME, self.name_and_version()),
        }
    }
}

impl FromStr for Fmri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Fmri::parse(s)
    }
}

impl Ord for Fmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.authority.cmp(&other.authority))
    }
}

impl PartialOrd for Fmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split off the scheme; returns (authority, name[@version])
fn split_scheme(s: &str) -> Option<(Option<&str>, &str)> {
    if let Some(rest) = s.strip_prefix(SCHEME_WITH_AUTHORITY) {
        let (auth, rest) = rest.split_once('/')?;
        if auth.is_empty() {
            return None;
        }
        Some((Some(auth), rest))
    } else if let Some(rest) = s.strip_prefix(SCHEME) {
        Some((None, rest))
    } else {
        Some((None, s))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.contains("//")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFmri(name.to_string()))
    }
}

/// A glob pattern over package names, with optional authority and version
///
/// `*` matches any run of characters and `?` exactly one; every other
/// character is literal. A bare pattern also matches on a trailing `/`
/// boundary, so `libc` matches `library/libc`. Patterns written with the
/// `pkg:/` or `pkg://auth/` scheme are anchored at the start of the name.
#[derive(Debug, Clone)]
pub struct FmriPattern {
    text: String,
    authority: Option<String>,
    name: Regex,
    version: Option<PkgVersion>,
}

impl FmriPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let invalid = || Error::InvalidPattern(pattern.to_string());

        let anchored = pattern.starts_with(SCHEME);
        let (authority, rest) = split_scheme(pattern).ok_or_else(invalid)?;

        let (glob, version) = match rest.split_once('@') {
            Some((glob, ver)) => (glob, Some(PkgVersion::parse(ver).map_err(|_| invalid())?)),
            None => (rest, None),
        };
        if glob.is_empty() {
            return Err(invalid());
        }

        let mut expr = String::from(if anchored { "^" } else { "^(?:.*/)?" });
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');

        let name = Regex::new(&expr).map_err(|_| invalid())?;

        Ok(Self {
            text: pattern.to_string(),
            authority: authority.map(str::to_string),
            name,
            version,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, fmri: &Fmri) -> bool {
        if let Some(ref auth) = self.authority
            && fmri.authority.as_deref() != Some(auth.as_str())
        {
            return false;
        }
        if !self.name.is_match(&fmri.name) {
            return false;
        }
        match (&self.version, &fmri.version) {
            (None, _) => true,
            (Some(want), Some(have)) => have.is_successor(want),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for FmriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmri(s: &str) -> Fmri {
        Fmri::parse(s).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        let f = fmri("pkg://example.org/library/libc@1.0,5.11-0.1");
        assert_eq!(f.authority.as_deref(), Some("example.org"));
        assert_eq!(f.name, "library/libc");
        assert_eq!(f.version.as_ref().unwrap().to_string(), "1.0,5.11-0.1");

        let f = fmri("pkg:/library/libc@1.0");
        assert!(f.authority.is_none());

        let f = fmri("SUNWcs");
        assert!(f.version.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Fmri::parse("pkg:///libc").is_err());
        assert!(Fmri::parse("pkg://auth").is_err());
        assert!(Fmri::parse("lib c@1.0").is_err());
        assert!(Fmri::parse("libc@").is_err());
        assert!(Fmri::parse("").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["pkg://example.org/web/server@2.2.8", "pkg:/libc@1.0-0.1"] {
            assert_eq!(fmri(s).to_string(), s);
        }
    }

    #[test]
    fn test_short_fmri_drops_preferred_authority() {
        let f = fmri("pkg://example.org/libc@1.0");
        assert_eq!(f.get_short_fmri(Some("example.org")), "pkg:/libc@1.0");
        assert_eq!(f.get_short_fmri(Some("other")), "pkg://example.org/libc@1.0");
    }

    #[test]
    fn test_same_pkg_ignores_authority_and_version() {
        assert!(fmri("pkg://a/libc@1.0").is_same_pkg(&fmri("pkg://b/libc@2.0")));
        assert!(!fmri("pkg://a/libc@1.0").is_same_pkg(&fmri("pkg://a/libm@1.0")));
    }

    #[test]
    fn test_pattern_glob() {
        let p = FmriPattern::new("lib*").unwrap();
        assert!(p.matches(&fmri("pkg://a/libc@1.0")));
        assert!(p.matches(&fmri("pkg://a/system/libm@1.0")));
        assert!(!p.matches(&fmri("pkg://a/glibc@1.0")));

        let p = FmriPattern::new("lib?").unwrap();
        assert!(p.matches(&fmri("libc@1")));
        assert!(!p.matches(&fmri("libcc@1")));
    }

    #[test]
    fn test_pattern_escapes_metacharacters() {
        let p = FmriPattern::new("g++").unwrap();
        assert!(p.matches(&fmri("developer/g++@4.0")));
        assert!(!p.matches(&fmri("gg@4.0")));

        let p = FmriPattern::new("a.b").unwrap();
        assert!(!p.matches(&fmri("axb@1")));
    }

    #[test]
    fn test_pattern_anchored_with_scheme() {
        let p = FmriPattern::new("pkg:/libc").unwrap();
        assert!(p.matches(&fmri("libc@1.0")));
        assert!(!p.matches(&fmri("library/libc@1.0")));
    }

    #[test]
    fn test_pattern_version_and_authority() {
        let p = FmriPattern::new("pkg://example.org/libc@1.2").unwrap();
        assert!(p.matches(&fmri("pkg://example.org/libc@1.2.3")));
        assert!(!p.matches(&fmri("pkg://example.org/libc@1.3")));
        assert!(!p.matches(&fmri("pkg://mirror.org/libc@1.2.3")));
    }
}
