//! Attendance integrity: verifiable, proxy-resistant attendance claims.
//!
//! Provides rotating session credentials, geofenced claim verification,
//! trusted-device binding, an append-only attendance ledger with
//! storage-level uniqueness, and session lifecycle with absentee backfill
//! and guardian notifications.

pub mod access;
pub mod biometric;
pub mod config;
pub mod credential;
pub mod device;
pub mod directory;
pub mod engine;
pub mod error;
pub mod geo;
pub mod ids;
pub mod ledger;
pub mod notify;
pub mod session;
pub mod storage;
pub mod time;
pub mod verify;

// Re-export primary types
pub use access::{Caller, Capability, Role};
pub use config::{BiometricPolicy, EngineConfig, PercentageBasis};
pub use credential::{CredentialRotator, CredentialToken};
pub use device::{DeviceCheck, DeviceTrustStore};
pub use engine::{
    AttendanceEngine, Collaborators, CourseReport, IssuedCredential, ReportEntry, SessionReport,
};
pub use error::{AttendanceError, Result};
pub use geo::{distance_meters, Coordinates};
pub use ids::{AccountId, CourseId, DeviceId, SessionId};
pub use ledger::{AttendanceLedger, AttendanceRecord, AttendanceStatus, UniqueConstraint};
pub use session::{Session, SessionClosure, SessionManager, SessionSummary};
pub use verify::{Claim, VerificationPipeline};
