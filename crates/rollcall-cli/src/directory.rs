//! Console views of the student roster.

use rollcall_core::store::{StoreError, StudentStore};
use rollcall_core::{StudentRecord, Uid};
use std::fmt::Write;

/// Fixed-width table of enrolled students, in enrollment order.
pub fn render_students(students: &[StudentRecord]) -> String {
    if students.is_empty() {
        return "No students found in the database.".to_string();
    }

    let name_width = students
        .iter()
        .map(|s| s.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<10}  {:<name_width$}  {}", "UID", "Name", "Database ID");
    let _ = writeln!(out, "{}", "-".repeat(10 + 2 + name_width + 2 + "Database ID".len()));
    for s in students {
        let _ = writeln!(out, "{:<10}  {:<name_width$}  {}", s.uid.as_str(), s.name, s.id);
    }
    out.truncate(out.trim_end().len());
    out
}

/// Look up a student by a user-typed UID (trimmed, case-insensitive).
pub fn find_student<S: StudentStore + ?Sized>(
    store: &S,
    input: &str,
) -> Result<(Uid, Option<StudentRecord>), StoreError> {
    let uid = Uid::normalize(input);
    let found = store.find_student_by_uid(&uid)?;
    tracing::debug!(uid = %uid, found = found.is_some(), "student lookup");
    Ok((uid, found))
}

pub fn render_lookup(uid: &Uid, found: Option<&StudentRecord>) -> String {
    match found {
        Some(s) => format!("Student found:\nID: {}\nName: {}\nDatabase ID: {}", s.uid, s.name, s.id),
        None => format!("No student found with ID: {uid}"),
    }
}
