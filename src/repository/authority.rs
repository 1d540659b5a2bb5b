// src/repository/authority.rs

//! Authority prefix and origin validation

use crate::error::{Error, Result};

/// Reserved prefix marker for the preferred authority in legacy configuration
pub const PREFERRED_MARKER: &str = "_PRE";

/// Check an authority prefix
///
/// Prefixes are non-empty, made of alphanumerics, `.`, `-` and `_`, and may
/// not start with the reserved preferred-authority marker.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = !prefix.is_empty()
        && !prefix.starts_with(PREFERRED_MARKER)
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPrefix(prefix.to_string()))
    }
}

/// Check an origin URL: http or https with a host
pub fn validate_origin(origin: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(origin).map_err(|_| Error::InvalidUrl(origin.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https")
        || parsed.host_str().is_none_or(str::is_empty)
    {
        return Err(Error::InvalidUrl(origin.to_string()));
    }
    Ok(parsed)
}
