// src/db/models/authority.rs

//! Authority model - configured package repositories

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// A configured authority (package repository)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub prefix: String,
    pub origin_url: String,
    pub ssl_key: Option<String>,
    pub ssl_cert: Option<String>,
    pub preferred: bool,
    /// `last_modified` of the most recently applied catalog
    pub catalog_timestamp: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "prefix, origin_url, ssl_key, ssl_cert, preferred, catalog_timestamp";

impl Authority {
    pub fn new(prefix: impl Into<String>, origin_url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            origin_url: origin_url.into(),
            ssl_key: None,
            ssl_cert: None,
            preferred: false,
            catalog_timestamp: None,
        }
    }

    /// Origin with exactly one trailing slash, for joining endpoint paths
    pub fn base_url(&self) -> String {
        format!("{}/", self.origin_url.trim_end_matches('/'))
    }

    /// Insert at the end of the configuration order
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO authorities (prefix, origin_url, ssl_key, ssl_cert, preferred, catalog_timestamp, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM authorities))",
            params![
                &self.prefix,
                &self.origin_url,
                &self.ssl_key,
                &self.ssl_cert,
                self.preferred as i32,
                self.catalog_timestamp.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Update origin and credentials; preference is changed via `set_preferred`
    pub fn update(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE authorities SET origin_url = ?1, ssl_key = ?2, ssl_cert = ?3 WHERE prefix = ?4",
            params![&self.origin_url, &self.ssl_key, &self.ssl_cert, &self.prefix],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, prefix: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM authorities WHERE prefix = ?1"
        ))?;
        Ok(stmt.query_row([prefix], Self::from_row).optional()?)
    }

    /// All authorities in configuration order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM authorities ORDER BY position"
        ))?;
        let authorities = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(authorities)
    }

    pub fn find_preferred(conn: &Connection) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM authorities WHERE preferred = 1"
        ))?;
        Ok(stmt.query_row([], Self::from_row).optional()?)
    }

    /// Make `prefix` the single preferred authority
    ///
    /// Callers wrap this in a transaction; the two updates must land together.
    pub fn set_preferred(conn: &Connection, prefix: &str) -> Result<()> {
        conn.execute("UPDATE authorities SET preferred = 0 WHERE preferred = 1", [])?;
        conn.execute(
            "UPDATE authorities SET preferred = 1 WHERE prefix = ?1",
            [prefix],
        )?;
        Ok(())
    }

    pub fn set_catalog_timestamp(
        conn: &Connection,
        prefix: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE authorities SET catalog_timestamp = ?1 WHERE prefix = ?2",
            params![timestamp.map(|ts| ts.to_rfc3339()), prefix],
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, prefix: &str) -> Result<()> {
        conn.execute("DELETE FROM authorities WHERE prefix = ?1", [prefix])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let timestamp: Option<String> = row.get(5)?;
        Ok(Self {
            prefix: row.get(0)?,
            origin_url: row.get(1)?,
            ssl_key: row.get(2)?,
            ssl_cert: row.get(3)?,
            preferred: row.get::<_, i32>(4)? != 0,
            catalog_timestamp: timestamp
                .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_insert_preserves_configuration_order() {
        let conn = db::open_in_memory().unwrap();
        for prefix in ["zeta", "alpha", "mid"] {
            Authority::new(prefix, format!("http://{prefix}.example")).insert(&conn).unwrap();
        }
        let prefixes: Vec<_> = Authority::list_all(&conn)
            .unwrap()
            .into_iter()
            .map(|a| a.prefix)
            .collect();
        assert_eq!(prefixes, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_set_preferred_moves_flag() {
        let conn = db::open_in_memory().unwrap();
        let mut first = Authority::new("a", "http://a.example");
        first.preferred = true;
        first.insert(&conn).unwrap();
        Authority::new("b", "http://b.example").insert(&conn).unwrap();

        Authority::set_preferred(&conn, "b").unwrap();
        assert_eq!(Authority::find_preferred(&conn).unwrap().unwrap().prefix, "b");
        assert!(!Authority::find(&conn, "a").unwrap().unwrap().preferred);
    }

    #[test]
    fn test_catalog_timestamp_round_trip() {
        let conn = db::open_in_memory().unwrap();
        Authority::new("a", "http://a.example").insert(&conn).unwrap();

        let ts = DateTime::parse_from_rfc3339("2008-04-26T17:32:08Z")
            .unwrap()
            .with_timezone(&Utc);
        Authority::set_catalog_timestamp(&conn, "a", Some(ts)).unwrap();
        assert_eq!(
            Authority::find(&conn, "a").unwrap().unwrap().catalog_timestamp,
            Some(ts)
        );
    }

    #[test]
    fn test_base_url() {
        assert_eq!(Authority::new("a", "http://a.example/repo/").base_url(), "http://a.example/repo/");
        assert_eq!(Authority::new("a", "http://a.example").base_url(), "http://a.example/");
    }
}
