//! Attendance ledger: per-session, per-student outcomes.
//!
//! The ledger provides:
//! - Insert-if-absent for Present and Absent records
//! - Storage-level uniqueness on (session, student) and (session, device)
//! - Atomic end-of-session backfill
//! - The manual override path (update in place)
//! - Per-student and per-course aggregates

pub mod record;
pub mod stats;
pub mod store;

pub use record::{AttendanceRecord, AttendanceStatus, BiometricVerdict, PresentEntry, RecordOrigin};
pub use stats::{CourseAttendance, CourseStudentStats, StudentStats};
pub use store::{AttendanceLedger, UniqueConstraint};
