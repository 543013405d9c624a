//! The operational surface: what teachers, students and admins call.
//!
//! [`AttendanceEngine`] wires the session manager, verification pipeline,
//! ledger and device store together and is the only place roles are
//! checked. Every operation takes the authenticated [`Caller`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::{Caller, Capability, Role};
use crate::biometric::{BiometricComparator, ImageStore};
use crate::config::{EngineConfig, PercentageBasis};
use crate::credential::CredentialToken;
use crate::device::DeviceTrustStore;
use crate::directory::{EnrollmentDirectory, IdentityDirectory};
use crate::error::{AttendanceError, Result};
use crate::geo::Coordinates;
use crate::ids::{AccountId, CourseId, DeviceId, SessionId};
use crate::ledger::{
    AttendanceLedger, AttendanceRecord, AttendanceStatus, BiometricVerdict, CourseAttendance,
    CourseStudentStats, RecordOrigin,
};
use crate::notify::{LogNotifier, Notifier};
use crate::session::manager::lock_slot;
use crate::session::{Session, SessionClosure, SessionManager, SessionSummary, StartSession};
use crate::storage::{DeviceBinding, EngineState};
use crate::verify::{Claim, VerificationPipeline};

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub enrollment: Arc<dyn EnrollmentDirectory>,
    pub identity: Arc<dyn IdentityDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub comparator: Option<Arc<dyn BiometricComparator>>,
    pub image_store: Option<Arc<dyn ImageStore>>,
}

impl Collaborators {
    /// Use one directory for both enrollment and identity, notifying
    /// through the log.
    pub fn from_directory<D>(directory: Arc<D>) -> Self
    where
        D: EnrollmentDirectory + IdentityDirectory + 'static,
    {
        Self {
            enrollment: directory.clone(),
            identity: directory,
            notifier: Arc::new(LogNotifier),
            comparator: None,
            image_store: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn BiometricComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(store);
        self
    }
}

/// The credential a teacher displays, with its QR payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub token: CredentialToken,
    /// Encoded form of `token`.
    pub payload: String,
    /// When the displayed credential should be refreshed (epoch ms).
    pub next_rotation_at: u64,
}

/// One line of a session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub student: AccountId,
    pub name: String,
    pub status: AttendanceStatus,
    pub recorded_at: u64,
    pub device: Option<DeviceId>,
    pub origin: RecordOrigin,
    pub biometric: BiometricVerdict,
}

/// Who attended one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionSummary,
    pub entries: Vec<ReportEntry>,
    pub present: usize,
    pub absent: usize,
}

/// Per-student attendance for a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseReport {
    pub course: CourseId,
    pub course_name: String,
    pub sessions: u64,
    pub basis: PercentageBasis,
    pub rows: Vec<CourseStudentStats>,
}

/// Attendance integrity engine.
pub struct AttendanceEngine {
    config: EngineConfig,
    ledger: Arc<AttendanceLedger>,
    devices: Arc<DeviceTrustStore>,
    sessions: Arc<SessionManager>,
    pipeline: VerificationPipeline,
    enrollment: Arc<dyn EnrollmentDirectory>,
    identity: Arc<dyn IdentityDirectory>,
}

impl AttendanceEngine {
    /// Create an engine with empty state.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidInput` if `config` does not validate.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_state(config, collaborators, EngineState::default())
    }

    /// Create an engine and restore persisted state into it.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidInput` for a bad config, or
    /// `AttendanceError::InvalidFileFormat` if the state breaks a
    /// uniqueness invariant or holds records for unknown sessions.
    pub fn with_state(
        config: EngineConfig,
        collaborators: Collaborators,
        state: EngineState,
    ) -> Result<Self> {
        config.validate()?;

        let known: HashSet<&SessionId> = state.sessions.iter().map(|s| &s.id).collect();
        if let Some(orphan) = state.records.iter().find(|r| !known.contains(&r.session)) {
            return Err(AttendanceError::InvalidFileFormat(format!(
                "ledger record for {} references unknown session {}",
                orphan.student, orphan.session
            )));
        }

        let ledger = Arc::new(AttendanceLedger::from_records(state.records)?);
        let devices = Arc::new(DeviceTrustStore::from_bindings(
            state.devices.into_iter().map(|b| (b.account, b.device)),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&ledger),
            Arc::clone(&collaborators.enrollment),
            Arc::clone(&collaborators.identity),
            Arc::clone(&collaborators.notifier),
            config.default_radius_m,
        ));
        sessions.restore(state.sessions)?;

        let mut pipeline = VerificationPipeline::new(
            config.clone(),
            Arc::clone(&sessions),
            Arc::clone(&ledger),
            Arc::clone(&devices),
            Arc::clone(&collaborators.enrollment),
            Arc::clone(&collaborators.identity),
            Arc::clone(&collaborators.notifier),
        );
        if let Some(comparator) = collaborators.comparator {
            pipeline = pipeline.with_comparator(comparator);
        }
        if let Some(store) = collaborators.image_store {
            pipeline = pipeline.with_image_store(store);
        }

        Ok(Self {
            config,
            ledger,
            devices,
            sessions,
            pipeline,
            enrollment: collaborators.enrollment,
            identity: collaborators.identity,
        })
    }

    /// Everything needed to rebuild this engine with [`AttendanceEngine::with_state`].
    pub fn snapshot(&self) -> EngineState {
        EngineState {
            sessions: self.sessions.sessions(),
            records: self.ledger.records(),
            devices: self
                .devices
                .bindings()
                .into_iter()
                .map(|(account, device)| DeviceBinding { account, device })
                .collect(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    pub fn devices(&self) -> &DeviceTrustStore {
        &self.devices
    }

    /// The session, or `SessionInactive` if there is no such session.
    fn session(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| AttendanceError::SessionInactive(format!("no session {id}")))
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    pub fn start_session(
        &self,
        caller: &Caller,
        course: &CourseId,
        anchor: Option<Coordinates>,
        radius_m: Option<f64>,
    ) -> Result<SessionSummary> {
        self.start_session_at(caller, course, anchor, radius_m, crate::time::now_millis())
    }

    /// Start a session for `course` anchored at the caller's location.
    pub fn start_session_at(
        &self,
        caller: &Caller,
        course: &CourseId,
        anchor: Option<Coordinates>,
        radius_m: Option<f64>,
        now: u64,
    ) -> Result<SessionSummary> {
        caller.require(Capability::StartSession)?;
        let session = self.sessions.start_at(
            StartSession {
                course: course.clone(),
                teacher: caller.account.clone(),
                anchor,
                radius_m,
            },
            now,
        )?;
        Ok(session.summary())
    }

    pub fn end_session(&self, caller: &Caller, id: &SessionId) -> Result<SessionClosure> {
        self.end_session_at(caller, id, crate::time::now_millis())
    }

    /// End a session, backfilling absentees and notifying guardians.
    pub fn end_session_at(&self, caller: &Caller, id: &SessionId, now: u64) -> Result<SessionClosure> {
        let session = self.session(id)?;
        caller.require_on_session(Capability::EndSession, &session)?;
        self.sessions.end_at(id, now)
    }

    pub fn current_token(&self, caller: &Caller, id: &SessionId) -> Result<IssuedCredential> {
        self.current_token_at(caller, id, crate::time::now_millis())
    }

    /// The credential to display for a session right now.
    pub fn current_token_at(
        &self,
        caller: &Caller,
        id: &SessionId,
        now: u64,
    ) -> Result<IssuedCredential> {
        let session = self.session(id)?;
        caller.require_on_session(Capability::ShowCredential, &session)?;
        let rotator = self.pipeline.rotator();
        let token = rotator.current_token(&session, now)?;
        Ok(IssuedCredential {
            payload: token.encode()?,
            next_rotation_at: rotator.next_rotation_at(&session, now),
            token,
        })
    }

    /// Active session for a course, if any.
    pub fn active_session(&self, caller: &Caller, course: &CourseId) -> Result<Option<SessionSummary>> {
        caller.require(Capability::ViewActiveSession)?;
        Ok(self.sessions.active_for_course(course).map(|s| s.summary()))
    }

    /// Active sessions run by the caller.
    pub fn active_sessions_for_teacher(&self, caller: &Caller) -> Result<Vec<SessionSummary>> {
        caller.require(Capability::ViewActiveSession)?;
        Ok(self
            .sessions
            .active_for_teacher(&caller.account)
            .iter()
            .map(Session::summary)
            .collect())
    }

    // ── Claims ───────────────────────────────────────────────────────────────

    pub fn submit_claim(&self, caller: &Caller, claim: &Claim) -> Result<AttendanceRecord> {
        self.submit_claim_at(caller, claim, crate::time::now_millis())
    }

    /// Run a claim through verification. Students may only claim for
    /// themselves.
    pub fn submit_claim_at(&self, caller: &Caller, claim: &Claim, now: u64) -> Result<AttendanceRecord> {
        caller.require(Capability::SubmitClaim)?;
        if caller.role != Role::Admin && caller.account != claim.claimant {
            return Err(AttendanceError::Unauthorized {
                role: caller.role.to_string(),
                capability: format!("{} for {}", Capability::SubmitClaim, claim.claimant),
            });
        }
        self.pipeline.verify_at(claim, now)
    }

    pub fn manual_mark(
        &self,
        caller: &Caller,
        id: &SessionId,
        student: &AccountId,
        status: AttendanceStatus,
    ) -> Result<AttendanceRecord> {
        self.manual_mark_at(caller, id, student, status, crate::time::now_millis())
    }

    /// Teacher override: set a student's status for an active session,
    /// creating or updating the record in place.
    ///
    /// # Errors
    ///
    /// `SessionInactive` unless the session is active, `NotEnrolled` for
    /// students outside the course, `Unauthorized` for other teachers'
    /// sessions.
    pub fn manual_mark_at(
        &self,
        caller: &Caller,
        id: &SessionId,
        student: &AccountId,
        status: AttendanceStatus,
        now: u64,
    ) -> Result<AttendanceRecord> {
        let slot = self
            .sessions
            .slot(id)
            .ok_or_else(|| AttendanceError::SessionInactive(format!("no session {id}")))?;
        let session = lock_slot(&slot);
        caller.require_on_session(Capability::ManualMark, &session)?;
        if !session.active {
            return Err(AttendanceError::SessionInactive(format!(
                "session {id} has ended"
            )));
        }
        if !self.enrollment.is_enrolled(&session.course, student)? {
            return Err(AttendanceError::NotEnrolled {
                student: student.to_string(),
                course: session.course.to_string(),
            });
        }
        let (record, created) =
            self.ledger
                .override_status(&session.id, student, &session.course, status, now)?;
        log::info!(
            "{} {} {student} as {status} in session {id}",
            caller.account,
            if created { "marked" } else { "changed" }
        );
        Ok(record)
    }

    /// Clear a student's trusted device so the next accepted claim binds a new one.
    pub fn reset_device(&self, caller: &Caller, account: &AccountId) -> Result<Option<DeviceId>> {
        caller.require(Capability::ResetDevice)?;
        Ok(self.devices.reset(account))
    }

    // ── Reports ──────────────────────────────────────────────────────────────

    /// Every record of a session with display names.
    pub fn session_report(&self, caller: &Caller, id: &SessionId) -> Result<SessionReport> {
        let session = self.session(id)?;
        caller.require_on_session(Capability::ViewReports, &session)?;

        let entries: Vec<ReportEntry> = self
            .ledger
            .records_for_session(id)
            .into_iter()
            .map(|r| ReportEntry {
                name: self
                    .identity
                    .display_name(&r.student)
                    .unwrap_or_else(|_| r.student.to_string()),
                student: r.student,
                status: r.status,
                recorded_at: r.recorded_at,
                device: r.device,
                origin: r.origin,
                biometric: r.biometric,
            })
            .collect();
        let present = entries
            .iter()
            .filter(|e| e.status == AttendanceStatus::Present)
            .count();

        Ok(SessionReport {
            session: session.summary(),
            absent: entries.len() - present,
            present,
            entries,
        })
    }

    /// Attendance of every enrolled student of a course.
    pub fn course_stats(&self, caller: &Caller, course: &CourseId) -> Result<CourseReport> {
        caller.require(Capability::ViewReports)?;
        let enrolled = self.enrollment.enrolled_students(course)?;
        let sessions = self.sessions.session_count(course);
        let basis = self.config.course_stats_basis;
        Ok(CourseReport {
            course: course.clone(),
            course_name: self.enrollment.course_name(course)?,
            sessions,
            basis,
            rows: self
                .ledger
                .stats_for_course(course, &enrolled, sessions, basis),
        })
    }

    /// Per-course attendance for one student. Students may only see their own.
    pub fn student_stats(&self, caller: &Caller, student: &AccountId) -> Result<Vec<CourseAttendance>> {
        if !caller.role.allows(Capability::ViewReports) {
            caller.require(Capability::ViewOwnStats)?;
            if &caller.account != student {
                return Err(AttendanceError::Unauthorized {
                    role: caller.role.to_string(),
                    capability: format!("{} for {student}", Capability::ViewOwnStats),
                });
            }
        }
        Ok(self.ledger.stats_for_student_all(student))
    }
}
