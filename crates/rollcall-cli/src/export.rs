//! CSV export of a class's attendance.

use chrono::{Local, NaiveDate};
use rollcall_core::store::{AttendanceLedger, StoreError};
use rollcall_core::AttendanceRow;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: [&str; 4] = ["Student UID", "Student Name", "Class Name", "Timestamp"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("reading attendance: {0}")]
    Store(#[from] StoreError),
    #[error("writing csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("export directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exported {
    pub path: PathBuf,
    pub rows: usize,
}

/// `attendance_<class>_<YYYY-MM-DD>.csv`, with the class name made filename-safe.
pub fn export_filename(class_name: &str, date: NaiveDate) -> String {
    let safe: String = class_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("attendance_{safe}_{}.csv", date.format("%Y-%m-%d"))
}

/// Export every ledger row for `class_name` into `dir`.
///
/// Returns `Ok(None)` without creating a file when the class has no rows.
pub fn export_class<L: AttendanceLedger + ?Sized>(
    ledger: &L,
    class_name: &str,
    dir: &Path,
    date: NaiveDate,
) -> Result<Option<Exported>, ExportError> {
    let rows = ledger.list_attendance_by_class(class_name)?;
    if rows.is_empty() {
        tracing::info!(class = class_name, "no attendance records to export");
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(class_name, date));
    let file = std::fs::File::create(&path)?;
    write_rows(file, &rows)?;

    tracing::info!(class = class_name, rows = rows.len(), path = %path.display(), "attendance exported");
    Ok(Some(Exported {
        path,
        rows: rows.len(),
    }))
}

/// Write the header and rows as CSV. Timestamps are rendered in local time.
pub fn write_rows<W: Write>(writer: W, rows: &[AttendanceRow]) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;
    for row in rows {
        let at = row.at.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string();
        wtr.write_record([row.uid.as_str(), row.name.as_str(), row.class_name.as_str(), at.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}
