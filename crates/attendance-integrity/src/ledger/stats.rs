//! Attendance aggregates.

use serde::{Deserialize, Serialize};

use crate::config::PercentageBasis;
use crate::ids::{AccountId, CourseId};

/// Per-student totals for one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StudentStats {
    pub total_classes: u64,
    pub present: u64,
    pub absent: u64,
}

impl StudentStats {
    /// `present / total × 100`, or 0 when there is nothing to divide by.
    pub fn percentage(&self) -> f64 {
        percentage(self.present, self.total_classes)
    }
}

/// Student totals for one course, tagged with the course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAttendance {
    pub course: CourseId,
    pub stats: StudentStats,
    pub percentage: f64,
}

/// One row of a course report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseStudentStats {
    pub student: AccountId,
    /// Denominator under the report's basis.
    pub total_classes: u64,
    pub present: u64,
    pub percentage: f64,
    pub basis: PercentageBasis,
}

/// Shared percentage rule: 0 when `total` is 0.
pub fn percentage(present: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        present as f64 / total as f64 * 100.0
    }
}
