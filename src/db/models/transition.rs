// src/db/models/transition.rs

//! Transition model - executed image plans
//!
//! A row is written in the same SQLite transaction that commits the new
//! installed set, so recovery can tell whether a journal's changes reached
//! the database.

use crate::error::Result;
use rusqlite::{Connection, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub tx_uuid: String,
    pub kind: String,
    pub description: String,
}

impl Transition {
    pub fn new(tx_uuid: &str, kind: &str, description: &str) -> Self {
        Self {
            tx_uuid: tx_uuid.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO transitions (tx_uuid, kind, description) VALUES (?1, ?2, ?3)",
            params![&self.tx_uuid, &self.kind, &self.description],
        )?;
        Ok(())
    }

    /// Was the transaction with `tx_uuid` committed?
    pub fn exists(conn: &Connection, tx_uuid: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transitions WHERE tx_uuid = ?1",
            [tx_uuid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_insert_and_exists() {
        let conn = db::open_in_memory().unwrap();
        assert!(!Transition::exists(&conn, "abc").unwrap());

        Transition::new("abc", "install", "install web/server")
            .insert(&conn)
            .unwrap();
        assert!(Transition::exists(&conn, "abc").unwrap());
    }
}
