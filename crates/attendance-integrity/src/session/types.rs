//! Session data structures.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::ids::{AccountId, CourseId, SessionId};
use crate::ledger::AttendanceRecord;

/// One live teaching instance of a course.
///
/// Sessions are never deleted; ending one flips `active` and stamps
/// `ended_at`, and the record stays for audit.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub course: CourseId,
    pub teacher: AccountId,
    /// Where the teacher was when the session started.
    pub anchor: Coordinates,
    /// Geofence radius around `anchor`, in meters.
    pub radius_m: f64,
    pub active: bool,
    pub created_at: u64,
    pub ended_at: Option<u64>,
    /// Hex-encoded key for credential tags. Never shown in reports.
    pub(crate) credential_secret: String,
}

impl Session {
    /// Public view of this session without the credential secret.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            course: self.course.clone(),
            teacher: self.teacher.clone(),
            anchor: self.anchor,
            radius_m: self.radius_m,
            active: self.active,
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("course", &self.course)
            .field("teacher", &self.teacher)
            .field("anchor", &self.anchor)
            .field("radius_m", &self.radius_m)
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .field("ended_at", &self.ended_at)
            .finish_non_exhaustive()
    }
}

/// Session fields safe to hand to any caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub course: CourseId,
    pub teacher: AccountId,
    pub anchor: Coordinates,
    pub radius_m: f64,
    pub active: bool,
    pub created_at: u64,
    pub ended_at: Option<u64>,
}

/// Request to open a session.
#[derive(Debug, Clone)]
pub struct StartSession {
    pub course: CourseId,
    pub teacher: AccountId,
    /// Teacher's geolocation. Required; `None` is rejected.
    pub anchor: Option<Coordinates>,
    /// Geofence radius; falls back to the configured default.
    pub radius_m: Option<f64>,
}

/// Outcome of closing a session.
#[derive(Debug, Clone)]
pub struct SessionClosure {
    pub session: SessionSummary,
    /// Students who already had a Present record when the session closed.
    pub present: Vec<AccountId>,
    /// Absent records written by the backfill.
    pub backfilled: Vec<AttendanceRecord>,
    /// Notifications handed to the notifier without error.
    pub notifications_sent: usize,
}
