//! Session lifecycle: one live teaching instance per course at a time.
//!
//! The session module provides:
//! - Session start anchored to the teacher's location
//! - The single-active-session-per-course index
//! - Session end with Absent backfill and guardian notifications
//! - Lookups by course, by teacher, and by ID

pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{Session, SessionClosure, SessionSummary, StartSession};
