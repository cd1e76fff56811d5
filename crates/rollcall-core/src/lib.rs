//! rollcall-core — Attendance session logic.
//!
//! Loads the enrolled-student gallery, resolves observed face descriptors to
//! students by Euclidean distance, and drives the per-class session state
//! machine that writes one attendance event per student per session.

pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod session;
pub mod source;
pub mod store;
pub mod types;

pub use gallery::{Gallery, GalleryEntry, GalleryError, GalleryLoad};
pub use matcher::{EuclideanMatcher, Identity, Matcher, Resolution};
pub use session::{EndReason, FrameOutcome, SessionMachine, SessionPhase, SessionSummary};
pub use store::{AttendanceLedger, StoreError, StudentStore};
pub use types::{AttendanceEvent, AttendanceRow, Descriptor, NewStudent, StudentRecord, Uid};
