//! The attendance ledger: append-only, indexed, uniqueness-enforcing.
//!
//! Records live in an append-order vector with secondary indexes:
//!
//! - `(session, student)` → record position (unique)
//! - `(session, device)` → record position (unique)
//! - `session` → positions
//! - `(student, course)` → positions
//!
//! Both unique constraints are checked and the record inserted inside the
//! same critical section, so two concurrent inserts for the same pair can
//! never both succeed regardless of what callers checked beforehand.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::PercentageBasis;
use crate::error::{AttendanceError, Result};
use crate::ids::{AccountId, CourseId, DeviceId, SessionId};

use super::record::{AttendanceRecord, AttendanceStatus, PresentEntry, RecordOrigin};
use super::stats::{percentage, CourseAttendance, CourseStudentStats, StudentStats};

/// The unique constraint a rejected insert collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniqueConstraint {
    /// One record per (session, student).
    SessionStudent,
    /// One student per (session, device).
    SessionDevice,
}

impl std::fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueConstraint::SessionStudent => f.write_str("(session, student)"),
            UniqueConstraint::SessionDevice => f.write_str("(session, device)"),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: Vec<AttendanceRecord>,
    by_pair: HashMap<(SessionId, AccountId), usize>,
    by_device: HashMap<(SessionId, DeviceId), usize>,
    by_session: HashMap<SessionId, Vec<usize>>,
    by_student_course: HashMap<(AccountId, CourseId), Vec<usize>>,
}

impl LedgerInner {
    fn conflict(&self, record: &AttendanceRecord) -> Option<UniqueConstraint> {
        if self
            .by_pair
            .contains_key(&(record.session.clone(), record.student.clone()))
        {
            return Some(UniqueConstraint::SessionStudent);
        }
        if let Some(device) = &record.device {
            if self
                .by_device
                .contains_key(&(record.session.clone(), device.clone()))
            {
                return Some(UniqueConstraint::SessionDevice);
            }
        }
        None
    }

    fn insert(&mut self, record: AttendanceRecord) -> Result<AttendanceRecord> {
        if let Some(constraint) = self.conflict(&record) {
            return Err(AttendanceError::StorageConflict { constraint });
        }

        let pos = self.records.len();
        self.by_pair
            .insert((record.session.clone(), record.student.clone()), pos);
        if let Some(device) = &record.device {
            self.by_device
                .insert((record.session.clone(), device.clone()), pos);
        }
        self.by_session
            .entry(record.session.clone())
            .or_default()
            .push(pos);
        self.by_student_course
            .entry((record.student.clone(), record.course.clone()))
            .or_default()
            .push(pos);
        self.records.push(record.clone());
        Ok(record)
    }

    fn get(&self, session: &SessionId, student: &AccountId) -> Option<&AttendanceRecord> {
        self.by_pair
            .get(&(session.clone(), student.clone()))
            .map(|&pos| &self.records[pos])
    }

    fn session_records(&self, session: &SessionId) -> impl Iterator<Item = &AttendanceRecord> {
        self.by_session
            .get(session)
            .into_iter()
            .flatten()
            .map(move |&pos| &self.records[pos])
    }

    fn student_stats(&self, student: &AccountId, course: &CourseId) -> StudentStats {
        let mut stats = StudentStats::default();
        if let Some(positions) = self
            .by_student_course
            .get(&(student.clone(), course.clone()))
        {
            for &pos in positions {
                stats.total_classes += 1;
                match self.records[pos].status {
                    AttendanceStatus::Present => stats.present += 1,
                    AttendanceStatus::Absent => stats.absent += 1,
                }
            }
        }
        stats
    }
}

/// Thread-safe attendance ledger.
#[derive(Debug, Default)]
pub struct AttendanceLedger {
    inner: Mutex<LedgerInner>,
}

impl AttendanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted records.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidFileFormat` if the records violate
    /// either unique constraint.
    pub fn from_records(records: Vec<AttendanceRecord>) -> Result<Self> {
        let mut inner = LedgerInner::default();
        for record in records {
            let key = format!("{}/{}", record.session, record.student);
            inner.insert(record).map_err(|e| {
                AttendanceError::InvalidFileFormat(format!("ledger record {key}: {e}"))
            })?;
        }
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Insert a Present record for an accepted claim.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::StorageConflict` if the student already has
    /// a record for the session or the device was used by another student.
    pub fn record_present(&self, entry: PresentEntry) -> Result<AttendanceRecord> {
        self.lock().insert(entry.into())
    }

    /// Insert an Absent record.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::StorageConflict` if the student already has
    /// a record for the session.
    pub fn record_absent(
        &self,
        session: &SessionId,
        student: &AccountId,
        course: &CourseId,
        at: u64,
    ) -> Result<AttendanceRecord> {
        self.lock().insert(AttendanceRecord::absent(
            session.clone(),
            student.clone(),
            course.clone(),
            at,
        ))
    }

    /// Write Absent for every student in `enrolled` without a record for
    /// `session`, in one critical section. Returns the records written.
    pub fn backfill_absent(
        &self,
        session: &SessionId,
        course: &CourseId,
        enrolled: &[AccountId],
        at: u64,
    ) -> Vec<AttendanceRecord> {
        let mut inner = self.lock();
        let mut written = Vec::new();
        for student in enrolled {
            if inner.get(session, student).is_some() {
                continue;
            }
            let record =
                AttendanceRecord::absent(session.clone(), student.clone(), course.clone(), at);
            // Uniqueness was checked under this same lock; Absent has no device.
            if let Ok(record) = inner.insert(record) {
                written.push(record);
            }
        }
        written
    }

    /// Manual override: set `status` for (session, student), creating the
    /// record if none exists. Returns the record and whether it was created.
    pub fn override_status(
        &self,
        session: &SessionId,
        student: &AccountId,
        course: &CourseId,
        status: AttendanceStatus,
        at: u64,
    ) -> Result<(AttendanceRecord, bool)> {
        let mut inner = self.lock();
        if let Some(&pos) = inner.by_pair.get(&(session.clone(), student.clone())) {
            let record = &mut inner.records[pos];
            record.status = status;
            record.recorded_at = at;
            record.origin = RecordOrigin::Manual;
            return Ok((record.clone(), false));
        }

        let mut record =
            AttendanceRecord::absent(session.clone(), student.clone(), course.clone(), at);
        record.status = status;
        record.origin = RecordOrigin::Manual;
        Ok((inner.insert(record)?, true))
    }

    /// Link a stored proof photo to an existing record. Returns the updated
    /// record, or `None` if there is no record for (session, student).
    pub fn set_proof_ref(
        &self,
        session: &SessionId,
        student: &AccountId,
        proof_ref: String,
    ) -> Option<AttendanceRecord> {
        let mut inner = self.lock();
        let pos = *inner.by_pair.get(&(session.clone(), student.clone()))?;
        let record = &mut inner.records[pos];
        record.proof_ref = Some(proof_ref);
        Some(record.clone())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// The record for (session, student), if any.
    pub fn find(&self, session: &SessionId, student: &AccountId) -> Option<AttendanceRecord> {
        self.lock().get(session, student).cloned()
    }

    /// The student whose record in `session` used `device`, if any.
    pub fn device_holder(&self, session: &SessionId, device: &DeviceId) -> Option<AccountId> {
        let inner = self.lock();
        inner
            .by_device
            .get(&(session.clone(), device.clone()))
            .map(|&pos| inner.records[pos].student.clone())
    }

    /// All records for a session in insertion order.
    pub fn records_for_session(&self, session: &SessionId) -> Vec<AttendanceRecord> {
        self.lock().session_records(session).cloned().collect()
    }

    /// Students holding a Present record for a session.
    pub fn present_students(&self, session: &SessionId) -> HashSet<AccountId> {
        self.lock()
            .session_records(session)
            .filter(|r| r.is_present())
            .map(|r| r.student.clone())
            .collect()
    }

    /// Totals over every record the student has for `course`.
    pub fn stats_for_student(&self, student: &AccountId, course: &CourseId) -> StudentStats {
        self.lock().student_stats(student, course)
    }

    /// Totals for every course the student has records in, sorted by course.
    pub fn stats_for_student_all(&self, student: &AccountId) -> Vec<CourseAttendance> {
        let inner = self.lock();
        let courses: BTreeSet<&CourseId> = inner
            .by_student_course
            .keys()
            .filter(|(s, _)| s == student)
            .map(|(_, c)| c)
            .collect();

        courses
            .into_iter()
            .map(|course| {
                let stats = inner.student_stats(student, course);
                CourseAttendance {
                    course: course.clone(),
                    stats,
                    percentage: stats.percentage(),
                }
            })
            .collect()
    }

    /// Per-student rollup for a course.
    ///
    /// Under [`PercentageBasis::SessionCount`] every row shares
    /// `session_count` as denominator; under
    /// [`PercentageBasis::RecordedClasses`] each row uses the student's own
    /// record count, matching [`AttendanceLedger::stats_for_student`].
    pub fn stats_for_course(
        &self,
        course: &CourseId,
        enrolled: &[AccountId],
        session_count: u64,
        basis: PercentageBasis,
    ) -> Vec<CourseStudentStats> {
        let inner = self.lock();
        enrolled
            .iter()
            .map(|student| {
                let stats = inner.student_stats(student, course);
                let total_classes = match basis {
                    PercentageBasis::SessionCount => session_count,
                    PercentageBasis::RecordedClasses => stats.total_classes,
                };
                CourseStudentStats {
                    student: student.clone(),
                    total_classes,
                    present: stats.present,
                    percentage: percentage(stats.present, total_classes),
                    basis,
                }
            })
            .collect()
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}
