//! Attendance session state machine.
//!
//! One [`SessionMachine`] drives one class session: it consumes the resolved
//! faces of each frame, appends at most one attendance event per student, and
//! ends the session on idle timeout, user quit, or camera failure.

use crate::matcher::Resolution;
use crate::store::{AttendanceLedger, StoreError};
use crate::types::{AttendanceEvent, Uid};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

/// Default no-face timeout before a session ends on its own.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("class name must not be empty")]
    EmptyClassName,
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    IdleTimeout,
    UserQuit,
    CameraError,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EndReason::IdleTimeout => "idle timeout",
            EndReason::UserQuit => "ended by user",
            EndReason::CameraError => "camera error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingFrame,
    Active,
    Finished(EndReason),
}

/// Mutable per-session bookkeeping. Never persisted.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub class_name: String,
    /// Students marked present this session, in marking order.
    marked: Vec<Uid>,
    marked_set: HashSet<Uid>,
    pub last_seen: Option<DateTime<Utc>>,
    pub absence_began: Option<DateTime<Utc>>,
}

impl SessionState {
    fn new(class_name: String) -> Self {
        Self {
            class_name,
            marked: Vec::new(),
            marked_set: HashSet::new(),
            last_seen: None,
            absence_began: None,
        }
    }

    pub fn is_marked(&self, uid: &Uid) -> bool {
        self.marked_set.contains(uid)
    }

    fn mark(&mut self, uid: Uid) {
        if self.marked_set.insert(uid.clone()) {
            self.marked.push(uid);
        }
    }
}

/// What one frame did to the session.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Students newly marked present by this frame.
    pub marked: Vec<Uid>,
    /// Ledger appends that failed; these students stay unmarked.
    pub failed: Vec<(Uid, StoreError)>,
    /// Set when this frame ended the session.
    pub finished: Option<EndReason>,
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub class_name: String,
    pub reason: EndReason,
    pub marked: usize,
    pub gallery_size: usize,
}

pub struct SessionMachine {
    state: SessionState,
    phase: SessionPhase,
    idle_timeout: Duration,
    gallery_size: usize,
}

impl SessionMachine {
    pub fn new(
        class_name: impl Into<String>,
        gallery_size: usize,
        idle_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let class_name = class_name.into().trim().to_string();
        if class_name.is_empty() {
            return Err(SessionError::EmptyClassName);
        }
        Ok(Self {
            state: SessionState::new(class_name),
            phase: SessionPhase::AwaitingFrame,
            idle_timeout,
            gallery_size,
        })
    }

    /// Apply one frame's resolved faces at time `now`.
    ///
    /// Does nothing once the session has finished.
    pub fn observe<L: AttendanceLedger + ?Sized>(
        &mut self,
        sightings: &[Resolution],
        now: DateTime<Utc>,
        ledger: &L,
    ) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        if self.is_finished() {
            return outcome;
        }
        self.phase = SessionPhase::Active;

        if sightings.is_empty() {
            let began = *self.state.absence_began.get_or_insert(now);
            if self.state.last_seen.is_some() && now - began >= self.idle_timeout {
                tracing::info!(
                    class = %self.state.class_name,
                    idle_secs = (now - began).num_seconds(),
                    "no face seen within idle timeout"
                );
                self.finish(EndReason::IdleTimeout);
                outcome.finished = Some(EndReason::IdleTimeout);
            }
            return outcome;
        }

        self.state.last_seen = Some(now);
        self.state.absence_began = None;

        for sighting in sightings {
            let Some(uid) = sighting.uid() else {
                continue;
            };
            if self.state.is_marked(uid) {
                continue;
            }

            let event = AttendanceEvent {
                uid: uid.clone(),
                class_name: self.state.class_name.clone(),
                at: now,
            };
            match ledger.insert_attendance_event(&event) {
                Ok(_) => {
                    tracing::info!(
                        uid = %uid,
                        class = %self.state.class_name,
                        distance = ?sighting.distance,
                        "marked present"
                    );
                    self.state.mark(uid.clone());
                    outcome.marked.push(uid.clone());
                }
                Err(err) => {
                    tracing::warn!(uid = %uid, error = %err, "attendance write failed; will retry on next sighting");
                    outcome.failed.push((uid.clone(), err));
                }
            }
        }

        outcome
    }

    /// End the session at the user's request. Returns the final reason,
    /// which is the earlier one if the session had already finished.
    pub fn quit(&mut self) -> EndReason {
        self.finish(EndReason::UserQuit)
    }

    /// End the session because the frame source failed.
    pub fn camera_failed(&mut self) -> EndReason {
        self.finish(EndReason::CameraError)
    }

    fn finish(&mut self, reason: EndReason) -> EndReason {
        match self.phase {
            SessionPhase::Finished(existing) => existing,
            _ => {
                self.phase = SessionPhase::Finished(reason);
                reason
            }
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, SessionPhase::Finished(_))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn class_name(&self) -> &str {
        &self.state.class_name
    }

    pub fn marked(&self) -> &[Uid] {
        &self.state.marked
    }

    pub fn gallery_size(&self) -> usize {
        self.gallery_size
    }

    /// Time left before the idle timeout fires, while no face is visible.
    pub fn remaining_idle(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_finished() || self.state.last_seen.is_none() {
            return None;
        }
        let began = self.state.absence_began?;
        let remaining = self.idle_timeout - (now - began);
        Some(remaining.max(Duration::zero()))
    }

    /// Final report, once finished.
    pub fn summary(&self) -> Option<SessionSummary> {
        match self.phase {
            SessionPhase::Finished(reason) => Some(SessionSummary {
                class_name: self.state.class_name.clone(),
                reason,
                marked: self.state.marked.len(),
                gallery_size: self.gallery_size,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Identity;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    fn known(uid: &str) -> Resolution {
        Resolution {
            identity: Identity::Known {
                uid: Uid::new(uid),
                name: uid.to_string(),
            },
            distance: Some(0.3),
        }
    }

    fn machine() -> SessionMachine {
        SessionMachine::new("Physics", 3, secs(30)).unwrap()
    }

    #[test]
    fn test_rejects_empty_class_name() {
        assert!(matches!(
            SessionMachine::new("   ", 1, secs(30)),
            Err(SessionError::EmptyClassName)
        ));
    }

    #[test]
    fn test_starts_awaiting_frame() {
        let m = machine();
        assert_eq!(m.phase(), SessionPhase::AwaitingFrame);
        assert!(m.summary().is_none());
    }

    #[test]
    fn test_repeat_sighting_marks_once() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        for i in 0..5 {
            m.observe(&[known("A")], t0() + secs(i), &ledger);
        }
        assert_eq!(ledger.events.borrow().len(), 1);
        assert_eq!(m.marked().len(), 1);
        assert_eq!(m.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_scenario_sighting_gap_sighting() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        let t = t0();
        let out = m.observe(&[known("A")], t, &ledger);
        assert_eq!(out.marked, [Uid::new("A")]);
        m.observe(&[], t + Duration::milliseconds(400), &ledger);
        let out = m.observe(&[known("A")], t + Duration::milliseconds(800), &ledger);
        assert!(out.marked.is_empty());

        let events = ledger.events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].class_name, "Physics");
        assert_eq!(events[0].at, t);
        assert_eq!(m.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_unknown_faces_reset_idle_but_are_not_recorded() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        m.observe(&[known("A")], t0(), &ledger);
        m.observe(&[], t0() + secs(1), &ledger);
        assert!(m.state().absence_began.is_some());

        let out = m.observe(&[Resolution::unknown(Some(0.9))], t0() + secs(2), &ledger);
        assert!(out.marked.is_empty());
        assert!(m.state().absence_began.is_none());
        assert_eq!(m.state().last_seen, Some(t0() + secs(2)));
        assert_eq!(ledger.events.borrow().len(), 1);
    }

    #[test]
    fn test_idle_timeout_boundary() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        m.observe(&[known("A")], t0(), &ledger);
        let gap_start = t0() + secs(1);
        m.observe(&[], gap_start, &ledger);

        let out = m.observe(&[], gap_start + secs(30) - Duration::milliseconds(1), &ledger);
        assert!(out.finished.is_none());
        assert_eq!(m.phase(), SessionPhase::Active);

        let out = m.observe(&[], gap_start + secs(30), &ledger);
        assert_eq!(out.finished, Some(EndReason::IdleTimeout));
        assert_eq!(m.phase(), SessionPhase::Finished(EndReason::IdleTimeout));
    }

    #[test]
    fn test_no_timeout_before_first_face() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        for s in 0..120 {
            m.observe(&[], t0() + secs(s), &ledger);
        }
        assert_eq!(m.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_reappearing_face_restarts_absence_clock() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        m.observe(&[known("A")], t0(), &ledger);
        m.observe(&[], t0() + secs(1), &ledger);
        m.observe(&[], t0() + secs(25), &ledger);
        m.observe(&[known("A")], t0() + secs(26), &ledger);
        m.observe(&[], t0() + secs(27), &ledger);
        let out = m.observe(&[], t0() + secs(50), &ledger);
        assert!(out.finished.is_none());
        assert_eq!(m.remaining_idle(t0() + secs(50)), Some(secs(7)));
    }

    #[test]
    fn test_finished_session_ignores_frames() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        m.observe(&[known("A")], t0(), &ledger);
        assert_eq!(m.quit(), EndReason::UserQuit);

        let out = m.observe(&[known("B")], t0() + secs(1), &ledger);
        assert!(out.marked.is_empty());
        assert_eq!(ledger.events.borrow().len(), 1);
        assert_eq!(m.camera_failed(), EndReason::UserQuit);
        assert_eq!(m.phase(), SessionPhase::Finished(EndReason::UserQuit));
    }

    #[test]
    fn test_camera_failure_keeps_recorded_events() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        m.observe(&[known("A"), known("B")], t0(), &ledger);
        assert_eq!(m.camera_failed(), EndReason::CameraError);

        let summary = m.summary().unwrap();
        assert_eq!(summary.reason, EndReason::CameraError);
        assert_eq!(summary.marked, 2);
        assert_eq!(summary.gallery_size, 3);
        assert_eq!(ledger.events.borrow().len(), 2);
    }

    #[test]
    fn test_failed_write_leaves_student_unmarked() {
        let ledger = MemoryStore::default();
        ledger.fail_appends.set(1);
        let mut m = machine();

        let out = m.observe(&[known("A")], t0(), &ledger);
        assert!(out.marked.is_empty());
        assert_eq!(out.failed.len(), 1);
        assert!(!m.state().is_marked(&Uid::new("A")));

        let out = m.observe(&[known("A")], t0() + secs(1), &ledger);
        assert_eq!(out.marked, [Uid::new("A")]);
        assert_eq!(ledger.events.borrow().len(), 1);
    }

    #[test]
    fn test_marked_set_is_monotonic() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        let frames: Vec<Vec<Resolution>> = vec![
            vec![known("A")],
            vec![],
            vec![known("B"), Resolution::unknown(None)],
            vec![known("A"), known("B")],
            vec![],
            vec![known("C")],
        ];
        let mut previous = 0;
        for (i, frame) in frames.iter().enumerate() {
            m.observe(frame, t0() + secs(i as i64), &ledger);
            assert!(m.marked().len() >= previous);
            previous = m.marked().len();
        }
        assert_eq!(m.marked(), [Uid::new("A"), Uid::new("B"), Uid::new("C")]);
    }

    #[test]
    fn test_remaining_idle_countdown() {
        let ledger = MemoryStore::default();
        let mut m = machine();
        assert_eq!(m.remaining_idle(t0()), None);
        m.observe(&[known("A")], t0(), &ledger);
        assert_eq!(m.remaining_idle(t0()), None);
        m.observe(&[], t0() + secs(2), &ledger);
        assert_eq!(m.remaining_idle(t0() + secs(12)), Some(secs(20)));
        assert_eq!(m.remaining_idle(t0() + secs(90)), Some(Duration::zero()));
    }
}
