//! Error types for the attendance integrity engine.
//!
//! Every claim rejection is a distinct, strongly typed variant so callers
//! can tell an expired credential from a proxy attempt without string
//! matching. Nothing on the verification path panics or fails silently.

use crate::ledger::UniqueConstraint;

/// Engine error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("Credential expired: issued {age_ms}ms ago, window is {window_ms}ms")]
    Expired { age_ms: u64, window_ms: u64 },

    #[error("Session inactive: {0}")]
    SessionInactive(String),

    #[error("Student {student} is not enrolled in course {course}")]
    NotEnrolled { student: String, course: String },

    #[error("Device {device} already used by another student in this session")]
    DeviceReused { device: String },

    #[error("Device {presented} does not match the device bound to {account}")]
    DeviceMismatch { account: String, presented: String },

    #[error("Out of range: {distance_m:.0}m away, max allowed {radius_m:.0}m")]
    OutOfRange { distance_m: f64, radius_m: f64 },

    #[error("Attendance already marked for {student} in session {session}")]
    AlreadyMarked { session: String, student: String },

    #[error("Session start requires a geolocation anchor")]
    MissingLocation,

    #[error("Biometric check failed: {0}")]
    BiometricMismatch(String),

    #[error("Storage conflict on unique constraint {constraint}")]
    StorageConflict { constraint: UniqueConstraint },

    #[error("Invalid credential token: {0}")]
    InvalidToken(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Role {role} lacks capability {capability}")]
    Unauthorized { role: String, capability: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttendanceError {
    /// True for the claim rejections of the verification pipeline, as
    /// opposed to infrastructure or authorization failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AttendanceError::Expired { .. }
                | AttendanceError::SessionInactive(_)
                | AttendanceError::NotEnrolled { .. }
                | AttendanceError::DeviceReused { .. }
                | AttendanceError::DeviceMismatch { .. }
                | AttendanceError::OutOfRange { .. }
                | AttendanceError::AlreadyMarked { .. }
                | AttendanceError::BiometricMismatch(_)
                | AttendanceError::StorageConflict { .. }
                | AttendanceError::InvalidToken(_)
        )
    }

    /// True when the error means "this student already has a record for
    /// this session", whether caught by the pipeline check or by the
    /// ledger's unique constraint.
    pub fn is_duplicate_claim(&self) -> bool {
        matches!(
            self,
            AttendanceError::AlreadyMarked { .. }
                | AttendanceError::StorageConflict {
                    constraint: UniqueConstraint::SessionStudent
                }
        )
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, AttendanceError>;
