// src/db/models/installed.rs

//! InstalledPackage model - the image's installed set

use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::version::PkgVersion;
use rusqlite::{Connection, OptionalExtension, params};

/// One installed package and its persisted flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub fmri: Fmri,
    pub frozen: bool,
    pub incorporated: bool,
    pub excludes: bool,
}

type RawRow = (String, String, String, i32, i32, i32);

const SELECT: &str =
    "SELECT name, authority, version, frozen, incorporated, excludes FROM installed";

impl InstalledPackage {
    pub fn new(fmri: Fmri) -> Self {
        Self {
            fmri,
            frozen: false,
            incorporated: false,
            excludes: false,
        }
    }

    /// Record this package as installed, replacing any other version of it
    ///
    /// Flags on an existing row are kept.
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        let version = self
            .fmri
            .version
            .as_ref()
            .ok_or_else(|| Error::InvalidFmri(self.fmri.to_string()))?;
        let authority = self
            .fmri
            .authority
            .as_deref()
            .ok_or_else(|| Error::InvalidFmri(self.fmri.to_string()))?;

        conn.execute(
            "INSERT INTO installed (name, authority, version, frozen, incorporated, excludes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                authority = excluded.authority,
                version = excluded.version,
                installed_at = CURRENT_TIMESTAMP",
            params![
                &self.fmri.name,
                authority,
                version.to_string(),
                self.frozen as i32,
                self.incorporated as i32,
                self.excludes as i32,
            ],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let raw = conn
            .query_row(&format!("{SELECT} WHERE name = ?1"), [name], raw_row)
            .optional()?;
        raw.map(Self::from_raw).transpose()
    }

    /// Every installed package ordered by name
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY name"))?;
        let rows = stmt
            .query_map([], raw_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::from_raw).collect()
    }

    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM installed WHERE name = ?1", [name])?;
        Ok(())
    }

    pub fn set_frozen(conn: &Connection, name: &str, frozen: bool) -> Result<()> {
        conn.execute(
            "UPDATE installed SET frozen = ?1 WHERE name = ?2",
            params![frozen as i32, name],
        )?;
        Ok(())
    }

    fn from_raw((name, authority, version, frozen, incorporated, excludes): RawRow) -> Result<Self> {
        let version = PkgVersion::parse(&version)?;
        Ok(Self {
            fmri: Fmri::new(Some(&authority), &name, Some(version))?,
            frozen: frozen != 0,
            incorporated: incorporated != 0,
            excludes: excludes != 0,
        })
    }
}

fn raw_row(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}
