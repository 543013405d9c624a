//! Attendance record data structures.

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CourseId, DeviceId, SessionId};

/// Outcome for one student in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(format!("unknown attendance status '{other}'")),
        }
    }
}

/// Which path wrote a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// Accepted by the verification pipeline.
    Claim,
    /// Written by end-of-session backfill.
    Backfill,
    /// Created or last changed by a teacher override.
    Manual,
}

/// What the biometric step concluded for a claim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BiometricVerdict {
    /// Descriptor distance within threshold.
    Matched { distance: f32 },
    /// Distance above threshold, accepted under the lenient policy.
    Flagged { distance: f32 },
    /// Comparator could not find a face; accepted under the lenient policy.
    NotDetected,
    /// Comparator failed; accepted under the lenient policy.
    Unavailable,
    /// No reference image, no proof image, or no comparator configured.
    Skipped,
}

/// One student's outcome for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session: SessionId,
    pub student: AccountId,
    pub course: CourseId,
    pub status: AttendanceStatus,
    pub recorded_at: u64,
    pub device: Option<DeviceId>,
    /// Image store reference for the proof photo, if one was kept.
    pub proof_ref: Option<String>,
    pub origin: RecordOrigin,
    pub biometric: BiometricVerdict,
}

impl AttendanceRecord {
    /// Absent record written by backfill.
    pub fn absent(session: SessionId, student: AccountId, course: CourseId, at: u64) -> Self {
        Self {
            session,
            student,
            course,
            status: AttendanceStatus::Absent,
            recorded_at: at,
            device: None,
            proof_ref: None,
            origin: RecordOrigin::Backfill,
            biometric: BiometricVerdict::Skipped,
        }
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }
}

/// Fields of a Present record produced by an accepted claim.
#[derive(Debug, Clone)]
pub struct PresentEntry {
    pub session: SessionId,
    pub student: AccountId,
    pub course: CourseId,
    pub device: Option<DeviceId>,
    pub proof_ref: Option<String>,
    pub biometric: BiometricVerdict,
    pub recorded_at: u64,
}

impl From<PresentEntry> for AttendanceRecord {
    fn from(entry: PresentEntry) -> Self {
        Self {
            session: entry.session,
            student: entry.student,
            course: entry.course,
            status: AttendanceStatus::Present,
            recorded_at: entry.recorded_at,
            device: entry.device,
            proof_ref: entry.proof_ref,
            origin: RecordOrigin::Claim,
            biometric: entry.biometric,
        }
    }
}
