//! Notification boundary.
//!
//! After a session closes, every enrolled student with a guardian contact
//! gets one [`AttendanceNotice`]. A device mismatch on a claim raises a
//! [`SecurityAlert`] to the configured administrative contact. Delivery is
//! fire-and-forget: failures are logged by the caller, never retried and
//! never undo the state change that triggered them.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{AccountId, CourseId, DeviceId, SessionId};
use crate::ledger::AttendanceStatus;

/// Below this running percentage a notice carries a warning line.
pub const LOW_ATTENDANCE_PERCENT: f64 = 75.0;

/// Per-student outcome of a closed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceNotice {
    pub student: AccountId,
    pub student_name: String,
    pub course: CourseId,
    pub course_name: String,
    pub status: AttendanceStatus,
    pub timestamp: u64,
    /// Running attendance over the student's full history for the course.
    pub percentage: f64,
    pub present: u64,
    pub total: u64,
}

impl AttendanceNotice {
    pub fn subject(&self) -> String {
        format!("Attendance {}: {}", self.status, self.student_name)
    }

    /// Plain-text body.
    pub fn body(&self) -> String {
        let mut body = format!(
            "Student: {}\nClass: {}\nDate: {}\nStatus: {}\nCurrent attendance: {:.1}% ({} / {} classes)\n",
            self.student_name,
            self.course_name,
            crate::time::millis_to_display(self.timestamp),
            self.status.as_str().to_uppercase(),
            self.percentage,
            self.present,
            self.total,
        );
        if self.percentage < LOW_ATTENDANCE_PERCENT {
            body.push_str("Attendance is below 75%.\n");
        }
        body
    }
}

/// A claim presented from a device other than the account's bound one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub account: AccountId,
    pub account_name: String,
    pub session: SessionId,
    pub bound_device: DeviceId,
    pub presented_device: DeviceId,
    pub timestamp: u64,
}

impl SecurityAlert {
    pub fn subject(&self) -> String {
        format!("Proxy alert: claim blocked for {}", self.account_name)
    }

    pub fn body(&self) -> String {
        format!(
            "Student: {} ({})\nSession: {}\nRegistered device: {}\nAttempted device: {}\nAt: {}\n",
            self.account_name,
            self.account,
            self.session,
            self.bound_device,
            self.presented_device,
            crate::time::millis_to_rfc3339(self.timestamp),
        )
    }
}

/// Outbound notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &str, notice: &AttendanceNotice) -> Result<()>;

    fn security_alert(&self, recipient: &str, alert: &SecurityAlert) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: &str, notice: &AttendanceNotice) -> Result<()> {
        log::info!(
            "notice to {recipient}: {} | {:.1}% ({}/{})",
            notice.subject(),
            notice.percentage,
            notice.present,
            notice.total
        );
        Ok(())
    }

    fn security_alert(&self, recipient: &str, alert: &SecurityAlert) -> Result<()> {
        log::warn!(
            "security alert to {recipient}: {} (bound {}, presented {})",
            alert.subject(),
            alert.bound_device,
            alert.presented_device
        );
        Ok(())
    }
}

/// Keeps every notification in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<(String, AttendanceNotice)>>,
    alerts: Mutex<Vec<(String, SecurityAlert)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(String, AttendanceNotice)> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn alerts(&self) -> Vec<(String, SecurityAlert)> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, recipient: &str, notice: &AttendanceNotice) -> Result<()> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient.to_string(), notice.clone()));
        Ok(())
    }

    fn security_alert(&self, recipient: &str, alert: &SecurityAlert) -> Result<()> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient.to_string(), alert.clone()));
        Ok(())
    }
}
