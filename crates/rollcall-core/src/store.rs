//! Persistence contracts for students and the attendance ledger.
//!
//! The engine only ever talks to these traits; `rollcall-store` provides the
//! SQLite implementation.

use crate::types::{AttendanceEvent, AttendanceRow, NewStudent, StudentRecord, Uid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("student uid already exists: {0}")]
    DuplicateUid(Uid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Students table: uid is unique and enforced by the store.
pub trait StudentStore {
    /// Insert a student and return its row id.
    fn insert_student(&self, student: &NewStudent) -> Result<i64, StoreError>;

    /// All students in enrollment order.
    fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError>;

    fn find_student_by_uid(&self, uid: &Uid) -> Result<Option<StudentRecord>, StoreError>;

    fn student_exists(&self, uid: &Uid) -> Result<bool, StoreError> {
        Ok(self.find_student_by_uid(uid)?.is_some())
    }
}

/// Append-only attendance table. Does not deduplicate.
pub trait AttendanceLedger {
    /// Append one event and return its row id.
    fn insert_attendance_event(&self, event: &AttendanceEvent) -> Result<i64, StoreError>;

    /// Every event recorded for `class_name`, in insertion order.
    fn list_attendance_by_class(&self, class_name: &str) -> Result<Vec<AttendanceRow>, StoreError>;
}
