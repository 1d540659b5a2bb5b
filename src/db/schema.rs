// src/db/schema.rs

//! Schema of the image database
//!
//! `pkg.db` holds the configured authorities, the installed set and the
//! record of executed transitions. The schema version lives in SQLite's
//! `user_version` pragma; each step below upgrades from the previous one.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Upgrade steps, in order; step `i` produces version `i + 1`
const MIGRATIONS: &[fn(&Connection) -> Result<()>] = &[migrate_v1];

/// Version a fully migrated database reports
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Bring the database up to `SCHEMA_VERSION`
///
/// A database written by a newer client is refused rather than guessed at.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    debug!("Image database at schema version {}", current);

    if current > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "image database schema version {current} is newer than this client supports ({SCHEMA_VERSION})"
        )));
    }

    for (step, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = step as i32 + 1;
        info!("Upgrading image database to schema version {}", version);
        conn.execute_batch("BEGIN")?;
        let applied = migration(conn).and_then(|()| set_schema_version(conn, version));
        match applied {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Initial schema - Version 1
///
/// - authorities: configured repositories, in configuration order
/// - installed: one row per installed package name
/// - transitions: executed plans, keyed by journal transaction id
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE authorities (
            prefix TEXT PRIMARY KEY,
            origin_url TEXT NOT NULL,
            ssl_key TEXT,
            ssl_cert TEXT,
            preferred INTEGER NOT NULL DEFAULT 0 CHECK(preferred IN (0, 1)),
            position INTEGER NOT NULL,
            catalog_timestamp TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- At most one preferred authority
        CREATE UNIQUE INDEX idx_authorities_preferred
            ON authorities(preferred) WHERE preferred = 1;

        CREATE TABLE installed (
            name TEXT PRIMARY KEY,
            authority TEXT NOT NULL,
            version TEXT NOT NULL,
            frozen INTEGER NOT NULL DEFAULT 0,
            incorporated INTEGER NOT NULL DEFAULT 0,
            excludes INTEGER NOT NULL DEFAULT 0,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_installed_authority ON installed(authority);

        CREATE TABLE transitions (
            tx_uuid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            completed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    Ok(())
}
