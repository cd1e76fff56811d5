//! Schema versioning through SQLite's `user_version` header field.
//!
//! Step `n` of [`STEPS`] brings the database to version `n`. Databases from
//! before versioning carry the step-1 tables at version 0 and are adopted
//! as version 1.

use crate::DbError;
use rusqlite::Connection;

const STEPS: &[(&str, &str)] = &[
    ("initial", include_str!("migrations/001_initial.sql")),
    (
        "attendance_class_index",
        include_str!("migrations/002_attendance_class_index.sql"),
    ),
];

/// Version a fully migrated database reports.
pub(crate) const SCHEMA_VERSION: u32 = STEPS.len() as u32;

/// Bring the schema up to [`SCHEMA_VERSION`]. Every step, and the adoption
/// of an unversioned database, commits together or not at all.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;

    let mut version = user_version(&tx)?;
    if version == 0 && has_table(&tx, "students")? {
        tracing::info!("unversioned attendance database; adopting as version 1");
        version = 1;
    }
    if version > SCHEMA_VERSION {
        tracing::warn!(version, supported = SCHEMA_VERSION, "database schema is newer than this build");
        return Ok(());
    }

    for (index, &(name, sql)) in STEPS.iter().enumerate().skip(version as usize) {
        let step = index as u32 + 1;
        tracing::info!(step, name, "applying schema step");
        tx.execute_batch(sql)
            .map_err(|source| DbError::Migration { step, source })?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Drop both tables and rebuild the schema. Wipes all data.
pub(crate) fn reset(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS attendance;
         DROP TABLE IF EXISTS students;
         PRAGMA user_version = 0;",
    )?;
    tracing::warn!("attendance database reset");
    run_migrations(conn)
}

pub(crate) fn user_version(conn: &Connection) -> Result<u32, DbError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn has_table(conn: &Connection, name: &str) -> Result<bool, DbError> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(found > 0)
}
