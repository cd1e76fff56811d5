//! rollcall-store — SQLite persistence for students and attendance.
//!
//! Schema is compatible with attendance databases created by earlier
//! releases: `students(student_uid, name, encoding)` and
//! `attendance(student_uid, class_name, timestamp)`.

mod schema;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use rollcall_core::store::{AttendanceLedger, StoreError, StudentStore};
use rollcall_core::types::{AttendanceEvent, AttendanceRow, NewStudent, StudentRecord, Uid};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Timestamp format used by pre-RFC 3339 databases (local time).
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema step {step} failed: {source}")]
    Migration { step: u32, source: rusqlite::Error },
}

/// SQLite-backed student store and attendance ledger.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::debug!(path = %path.display(), "opened attendance database");
        Self::from_connection(conn)
    }

    /// Fresh in-memory database, migrated.
    pub fn open_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Drop and recreate all tables. Wipes every student and attendance record.
    pub fn reset(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        schema::reset(&conn).map_err(StoreError::backend)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))
    }
}

impl StudentStore for Database {
    fn insert_student(&self, student: &NewStudent) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO students (student_uid, name, encoding) VALUES (?1, ?2, ?3)",
            (
                student.uid.as_str(),
                &student.name,
                student.descriptor.to_le_bytes(),
            ),
        );
        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateUid(student.uid.clone()))
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, student_uid, name, encoding FROM students ORDER BY id ASC")
            .map_err(StoreError::backend)?;
        let students = stmt
            .query_map([], row_to_student)
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(students)
    }

    fn find_student_by_uid(&self, uid: &Uid) -> Result<Option<StudentRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, student_uid, name, encoding FROM students WHERE student_uid = ?1",
            [uid.as_str()],
            row_to_student,
        )
        .optional()
        .map_err(StoreError::backend)
    }

    fn student_exists(&self, uid: &Uid) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT 1 FROM students WHERE student_uid = ?1 LIMIT 1",
            [uid.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(StoreError::backend)
    }
}

impl AttendanceLedger for Database {
    fn insert_attendance_event(&self, event: &AttendanceEvent) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attendance (student_uid, class_name, timestamp) VALUES (?1, ?2, ?3)",
            (event.uid.as_str(), &event.class_name, event.at.to_rfc3339()),
        )
        .map_err(StoreError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    fn list_attendance_by_class(&self, class_name: &str) -> Result<Vec<AttendanceRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.student_uid, s.name, a.class_name, a.timestamp
                 FROM attendance a
                 JOIN students s ON a.student_uid = s.student_uid
                 WHERE a.class_name = ?1
                 ORDER BY a.id ASC",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([class_name], |row| {
                Ok(AttendanceRow {
                    uid: Uid::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    class_name: row.get(2)?,
                    at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
                })
            })
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(rows)
    }
}

fn row_to_student(row: &Row) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: row.get(0)?,
        uid: Uid::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        descriptor: row.get(3)?,
    })
}

/// Parse an RFC 3339 timestamp, falling back to the legacy local-time format.
fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                format!("unrecognised timestamp: {raw}").into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rollcall_core::types::Descriptor;

    fn db() -> Database {
        Database::open_memory().unwrap()
    }

    fn student(uid: &str, name: &str) -> NewStudent {
        NewStudent {
            uid: Uid::new(uid),
            name: name.to_string(),
            descriptor: Descriptor::new(vec![0.25, -0.5, 1.0]),
        }
    }

    fn event(uid: &str, class: &str, at: DateTime<Utc>) -> AttendanceEvent {
        AttendanceEvent {
            uid: Uid::new(uid),
            class_name: class.to_string(),
            at,
        }
    }

    #[test]
    fn test_insert_and_find_student() {
        let db = db();
        let id = db.insert_student(&student("ABCD1234", "Alice")).unwrap();

        let found = db.find_student_by_uid(&Uid::new("ABCD1234")).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.name, "Alice");
        assert_eq!(
            Descriptor::from_le_bytes(&found.descriptor, 3),
            Some(Descriptor::new(vec![0.25, -0.5, 1.0]))
        );
        assert!(db.find_student_by_uid(&Uid::new("NOPE0000")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_uid_rejected() {
        let db = db();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        let err = db.insert_student(&student("ABCD1234", "Bob")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUid(uid) if uid.as_str() == "ABCD1234"));
    }

    #[test]
    fn test_student_exists() {
        let db = db();
        assert!(!db.student_exists(&Uid::new("ABCD1234")).unwrap());
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        assert!(db.student_exists(&Uid::new("ABCD1234")).unwrap());
    }

    #[test]
    fn test_list_students_in_enrollment_order() {
        let db = db();
        db.insert_student(&student("ZZZZ0001", "Zed")).unwrap();
        db.insert_student(&student("AAAA0002", "Amy")).unwrap();
        let names: Vec<_> = db.list_students().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["Zed", "Amy"]);
    }

    #[test]
    fn test_attendance_by_class_joins_names() {
        let db = db();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        db.insert_student(&student("EFGH5678", "Bob")).unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        db.insert_attendance_event(&event("ABCD1234", "Physics", t)).unwrap();
        db.insert_attendance_event(&event("EFGH5678", "Chemistry", t)).unwrap();
        db.insert_attendance_event(&event("EFGH5678", "Physics", t + Duration::seconds(5))).unwrap();

        let rows = db.list_attendance_by_class("Physics").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(rows[0].at, t);
        assert_eq!(rows[1].uid.as_str(), "EFGH5678");
        assert_eq!(rows[1].at, t + Duration::seconds(5));
        assert!(db.list_attendance_by_class("History").unwrap().is_empty());
    }

    #[test]
    fn test_ledger_allows_repeat_events() {
        let db = db();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        db.insert_attendance_event(&event("ABCD1234", "Physics", t)).unwrap();
        db.insert_attendance_event(&event("ABCD1234", "Physics", t + Duration::days(1))).unwrap();
        assert_eq!(db.list_attendance_by_class("Physics").unwrap().len(), 2);
    }

    #[test]
    fn test_attendance_for_unknown_student_fails() {
        let db = db();
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert!(db.insert_attendance_event(&event("GHOST000", "Physics", t)).is_err());
    }

    #[test]
    fn test_legacy_timestamps_are_read() {
        let db = db();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO attendance (student_uid, class_name, timestamp)
                 VALUES ('ABCD1234', 'Physics', '2025-09-01 08:30:00')",
                [],
            )
            .unwrap();

        let rows = db.list_attendance_by_class("Physics").unwrap();
        let local = rows[0].at.with_timezone(&Local);
        assert_eq!(local.format(LEGACY_TIMESTAMP_FORMAT).to_string(), "2025-09-01 08:30:00");
    }

    #[test]
    fn test_reset_clears_everything() {
        let db = db();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        db.reset().unwrap();
        assert!(db.list_students().unwrap().is_empty());
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attendance.db");
        let db = Database::open(&path).unwrap();
        db.insert_student(&student("ABCD1234", "Alice")).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.list_students().unwrap().len(), 1);
    }
}
