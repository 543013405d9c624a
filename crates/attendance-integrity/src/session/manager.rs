//! Session lifecycle: start, end, backfill, notify.
//!
//! Locking: the session table (`RwLock`) guards the session map and the
//! per-course active index; each session sits in its own `Mutex` slot. The
//! table lock is only held for map operations and is never held while
//! waiting on a slot: lookups clone slot handles and release the table
//! first. A slot may be held while the ledger lock is taken, never the
//! reverse.
//!
//! The claim path holds a slot for its whole check-and-insert; ending or
//! superseding a session holds the same slot while it deactivates and
//! backfills, so a claim racing either one lands first or sees the
//! session inactive. A slow claim in one session never blocks lookups of
//! any other session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::credential;
use crate::directory::{EnrollmentDirectory, IdentityDirectory};
use crate::error::{AttendanceError, Result};
use crate::geo::Coordinates;
use crate::ids::{AccountId, CourseId, SessionId};
use crate::ledger::AttendanceLedger;
use crate::notify::{AttendanceNotice, Notifier};

use super::types::{Session, SessionClosure, StartSession};

pub(crate) type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, SessionSlot>,
    /// Creation order, for stable listings.
    order: Vec<SessionId>,
    active_by_course: HashMap<CourseId, SessionId>,
}

/// Owns sessions and the single-active-session-per-course invariant.
pub struct SessionManager {
    table: RwLock<SessionTable>,
    ledger: Arc<AttendanceLedger>,
    enrollment: Arc<dyn EnrollmentDirectory>,
    identity: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn Notifier>,
    default_radius_m: f64,
}

pub(crate) fn lock_slot(slot: &SessionSlot) -> MutexGuard<'_, Session> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    pub fn new(
        ledger: Arc<AttendanceLedger>,
        enrollment: Arc<dyn EnrollmentDirectory>,
        identity: Arc<dyn IdentityDirectory>,
        notifier: Arc<dyn Notifier>,
        default_radius_m: f64,
    ) -> Self {
        Self {
            table: RwLock::new(SessionTable::default()),
            ledger,
            enrollment,
            identity,
            notifier,
            default_radius_m,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace all sessions with persisted ones and rebuild the active index.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidFileFormat` on duplicate session IDs
    /// or more than one active session for a course.
    pub fn restore(&self, sessions: Vec<Session>) -> Result<()> {
        let mut table = SessionTable::default();
        for session in sessions {
            if table.sessions.contains_key(&session.id) {
                return Err(AttendanceError::InvalidFileFormat(format!(
                    "duplicate session {}",
                    session.id
                )));
            }
            if session.active {
                if let Some(existing) = table
                    .active_by_course
                    .insert(session.course.clone(), session.id.clone())
                {
                    return Err(AttendanceError::InvalidFileFormat(format!(
                        "course {} has two active sessions ({existing}, {})",
                        session.course, session.id
                    )));
                }
            }
            table.order.push(session.id.clone());
            table
                .sessions
                .insert(session.id.clone(), Arc::new(Mutex::new(session)));
        }
        *self.write() = table;
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// Open a session at the current time.
    pub fn start(&self, request: StartSession) -> Result<Session> {
        self.start_at(request, crate::time::now_millis())
    }

    /// Open a session at `now`.
    ///
    /// Any session still active for the course is closed first (with
    /// Absent backfill, without notifications).
    ///
    /// # Errors
    ///
    /// `MissingLocation` without an anchor, `InvalidCoordinates` for a
    /// non-finite anchor, `InvalidInput` for a bad radius, or a directory
    /// error while closing a superseded session.
    pub fn start_at(&self, request: StartSession, now: u64) -> Result<Session> {
        let anchor = request.anchor.ok_or(AttendanceError::MissingLocation)?;
        if !anchor.latitude.is_finite() || !anchor.longitude.is_finite() {
            return Err(AttendanceError::InvalidCoordinates(anchor.to_string()));
        }
        let radius_m = request.radius_m.unwrap_or(self.default_radius_m);
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AttendanceError::InvalidInput(format!(
                "radius must be a positive number of meters, got {radius_m}"
            )));
        }

        let session = Session {
            id: SessionId::generate(&request.course, &request.teacher, now),
            course: request.course,
            teacher: request.teacher,
            anchor,
            radius_m,
            active: true,
            created_at: now,
            ended_at: None,
            credential_secret: credential::generate_secret(),
        };

        // Close whatever is active for the course, then install the new
        // session if nothing else was installed meanwhile; otherwise close
        // that one too and retry.
        let mut previous = self.read().active_by_course.get(&session.course).cloned();
        loop {
            if let Some(id) = &previous {
                self.supersede(id, &session.course, now)?;
            }

            let mut table = self.write();
            let current = table.active_by_course.get(&session.course).cloned();
            if current.is_some() && current != previous {
                previous = current;
                continue;
            }
            table
                .active_by_course
                .insert(session.course.clone(), session.id.clone());
            table.order.push(session.id.clone());
            table
                .sessions
                .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
            break;
        }

        log::info!(
            "started session {} for course {} at {} (radius {:.0}m)",
            session.id,
            session.course,
            session.anchor,
            session.radius_m
        );
        Ok(session)
    }

    /// End a session at the current time.
    pub fn end(&self, id: &SessionId) -> Result<SessionClosure> {
        self.end_at(id, crate::time::now_millis())
    }

    /// End a session at `now`: deactivate, backfill Absent, then notify.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::SessionInactive` if the session does not
    /// exist or has already ended, or a directory error if the roster
    /// cannot be read (in which case nothing changes).
    pub fn end_at(&self, id: &SessionId, now: u64) -> Result<SessionClosure> {
        let slot = self
            .slot(id)
            .ok_or_else(|| AttendanceError::SessionInactive(format!("no session {id}")))?;
        let mut closure = {
            let mut session = lock_slot(&slot);
            if !session.active {
                return Err(AttendanceError::SessionInactive(format!(
                    "session {id} has already ended"
                )));
            }
            self.close_locked(&mut session, now)?
        };
        self.release_course(&closure.session.course, id);

        closure.notifications_sent = self.notify_closure(&closure, now);
        log::info!(
            "ended session {}: {} present, {} absent, {} notified",
            id,
            closure.present.len(),
            closure.backfilled.len(),
            closure.notifications_sent
        );
        Ok(closure)
    }

    /// Close a session being replaced by a new one for `course`: backfill
    /// Absent, no notifications. Already ended sessions are left alone.
    fn supersede(&self, id: &SessionId, course: &CourseId, now: u64) -> Result<()> {
        let Some(slot) = self.slot(id) else {
            return Ok(());
        };
        let mut stale = lock_slot(&slot);
        if stale.active {
            log::warn!("superseding active session {id} for course {course}");
            self.close_locked(&mut stale, now)?;
        }
        Ok(())
    }

    /// Drop `course` from the active index if it still points at `id`.
    fn release_course(&self, course: &CourseId, id: &SessionId) {
        let mut table = self.write();
        if table.active_by_course.get(course) == Some(id) {
            table.active_by_course.remove(course);
        }
    }

    /// Deactivate and backfill a session whose slot lock the caller holds.
    fn close_locked(&self, session: &mut Session, now: u64) -> Result<SessionClosure> {
        // Read the roster before touching state so a directory failure
        // leaves the session active.
        let enrolled = self.enrollment.enrolled_students(&session.course)?;

        session.active = false;
        session.ended_at = Some(now);

        let present_set = self.ledger.present_students(&session.id);
        let backfilled = self
            .ledger
            .backfill_absent(&session.id, &session.course, &enrolled, now);
        let present = enrolled
            .into_iter()
            .filter(|s| present_set.contains(s))
            .collect();

        Ok(SessionClosure {
            session: session.summary(),
            present,
            backfilled,
            notifications_sent: 0,
        })
    }

    /// One notice per enrolled student with a guardian contact.
    /// Failures are logged and skipped.
    fn notify_closure(&self, closure: &SessionClosure, now: u64) -> usize {
        let course = &closure.session.course;
        let session = &closure.session.id;
        let course_name = self
            .enrollment
            .course_name(course)
            .unwrap_or_else(|_| course.to_string());

        let students = closure
            .present
            .iter()
            .chain(closure.backfilled.iter().map(|r| &r.student));

        let mut sent = 0;
        for student in students {
            let contact = match self.identity.guardian_contact(student) {
                Ok(Some(contact)) => contact,
                Ok(None) => {
                    log::debug!("no guardian contact for {student}, skipping notice");
                    continue;
                }
                Err(e) => {
                    log::warn!("guardian lookup failed for {student}: {e}");
                    continue;
                }
            };
            let Some(record) = self.ledger.find(session, student) else {
                continue;
            };
            let stats = self.ledger.stats_for_student(student, course);
            let notice = AttendanceNotice {
                student: student.clone(),
                student_name: self
                    .identity
                    .display_name(student)
                    .unwrap_or_else(|_| student.to_string()),
                course: course.clone(),
                course_name: course_name.clone(),
                status: record.status,
                timestamp: now,
                percentage: stats.percentage(),
                present: stats.present,
                total: stats.total_classes,
            };
            match self.notifier.notify(&contact, &notice) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("notification to {contact} for {student} failed: {e}"),
            }
        }
        sent
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    pub(crate) fn slot(&self, id: &SessionId) -> Option<SessionSlot> {
        self.read().sessions.get(id).cloned()
    }

    /// A copy of the session, if it exists.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.slot(id).map(|slot| lock_slot(&slot).clone())
    }

    /// The active session for `course`, if any.
    pub fn active_for_course(&self, course: &CourseId) -> Option<Session> {
        let slot = {
            let table = self.read();
            let id = table.active_by_course.get(course)?;
            table.sessions.get(id).cloned()?
        };
        let session = lock_slot(&slot).clone();
        session.active.then_some(session)
    }

    /// Active sessions run by `teacher`, newest first.
    pub fn active_for_teacher(&self, teacher: &AccountId) -> Vec<Session> {
        let slots: Vec<SessionSlot> = {
            let table = self.read();
            table
                .active_by_course
                .values()
                .filter_map(|id| table.sessions.get(id).cloned())
                .collect()
        };
        let mut sessions: Vec<Session> = slots
            .iter()
            .map(|slot| lock_slot(slot).clone())
            .filter(|s| s.active && &s.teacher == teacher)
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Every session of `course` in creation order.
    pub fn sessions_for_course(&self, course: &CourseId) -> Vec<Session> {
        self.sessions()
            .into_iter()
            .filter(|s| &s.course == course)
            .collect()
    }

    /// Number of sessions ever started for `course`.
    pub fn session_count(&self, course: &CourseId) -> u64 {
        self.sessions_for_course(course).len() as u64
    }

    /// Every session in creation order.
    pub fn sessions(&self) -> Vec<Session> {
        let slots: Vec<SessionSlot> = {
            let table = self.read();
            table
                .order
                .iter()
                .filter_map(|id| table.sessions.get(id).cloned())
                .collect()
        };
        slots.iter().map(|slot| lock_slot(slot).clone()).collect()
    }
}
