//! Claim verification: the ordered integrity checks.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. credential freshness
//! 2. session liveness and token authenticity
//! 3. enrollment
//! 4. trusted device, then device reuse within the session
//! 5. geofence
//! 6. duplicate claim
//! 7. biometric comparison (policy dependent)
//!
//! Steps 2 through 7 and the ledger insert run while the session's slot
//! lock is held, so they see one consistent snapshot and cannot interleave
//! with the session being ended. The proof photo is stored afterwards,
//! only for accepted claims.

use std::sync::Arc;

use crate::biometric::{BiometricComparator, ComparisonOutcome, ImageStore};
use crate::config::{BiometricPolicy, EngineConfig};
use crate::credential::{self, CredentialRotator, CredentialToken};
use crate::device::{DeviceCheck, DeviceTrustStore};
use crate::directory::{EnrollmentDirectory, IdentityDirectory};
use crate::error::{AttendanceError, Result};
use crate::geo::{self, Coordinates};
use crate::ids::{AccountId, DeviceId, SessionId};
use crate::ledger::{AttendanceLedger, AttendanceRecord, BiometricVerdict, PresentEntry};
use crate::notify::{Notifier, SecurityAlert};
use crate::session::manager::lock_slot;
use crate::session::{Session, SessionManager};

/// A student's request to be marked present.
#[derive(Debug, Clone)]
pub struct Claim {
    pub session_id: SessionId,
    pub claimant: AccountId,
    pub device: DeviceId,
    pub token: CredentialToken,
    pub location: Coordinates,
    /// Live photo for the biometric step, if the client captured one.
    pub proof_image: Option<Vec<u8>>,
}

/// Runs claims through the integrity checks and records accepted ones.
pub struct VerificationPipeline {
    config: EngineConfig,
    rotator: CredentialRotator,
    sessions: Arc<SessionManager>,
    ledger: Arc<AttendanceLedger>,
    devices: Arc<DeviceTrustStore>,
    enrollment: Arc<dyn EnrollmentDirectory>,
    identity: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn Notifier>,
    comparator: Option<Arc<dyn BiometricComparator>>,
    image_store: Option<Arc<dyn ImageStore>>,
}

impl VerificationPipeline {
    pub fn new(
        config: EngineConfig,
        sessions: Arc<SessionManager>,
        ledger: Arc<AttendanceLedger>,
        devices: Arc<DeviceTrustStore>,
        enrollment: Arc<dyn EnrollmentDirectory>,
        identity: Arc<dyn IdentityDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rotator: CredentialRotator::new(config.rotation_period_ms),
            config,
            sessions,
            ledger,
            devices,
            enrollment,
            identity,
            notifier,
            comparator: None,
            image_store: None,
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn BiometricComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(store);
        self
    }

    pub fn rotator(&self) -> &CredentialRotator {
        &self.rotator
    }

    /// Verify a claim at the current time.
    pub fn verify(&self, claim: &Claim) -> Result<AttendanceRecord> {
        self.verify_at(claim, crate::time::now_millis())
    }

    /// Verify a claim as of `now` and record it on acceptance.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's rejection, or
    /// `AttendanceError::StorageConflict` if the ledger's own unique
    /// constraints catch what the pre-checks could not.
    pub fn verify_at(&self, claim: &Claim, now: u64) -> Result<AttendanceRecord> {
        let mut alert = None;
        let result = self
            .verify_locked(claim, now, &mut alert)
            .map(|record| self.attach_proof(claim, record));

        // Alerts go out after the session lock is released.
        if let Some((recipient, alert)) = alert {
            if let Err(e) = self.notifier.security_alert(&recipient, &alert) {
                log::warn!("security alert to {recipient} failed: {e}");
            }
        }

        match &result {
            Ok(record) => log::info!(
                "accepted claim by {} for session {} ({:?})",
                record.student,
                record.session,
                record.biometric
            ),
            Err(e) if e.is_rejection() => log::debug!(
                "rejected claim by {} for session {}: {e}",
                claim.claimant,
                claim.session_id
            ),
            Err(e) => log::warn!(
                "claim by {} for session {} failed: {e}",
                claim.claimant,
                claim.session_id
            ),
        }
        result
    }

    fn verify_locked(
        &self,
        claim: &Claim,
        now: u64,
        alert: &mut Option<(String, SecurityAlert)>,
    ) -> Result<AttendanceRecord> {
        // 1. Freshness
        credential::check_freshness(claim.token.issued_at, now, self.config.validity_window_ms)?;

        // 2. Liveness
        let slot = self.sessions.slot(&claim.session_id).ok_or_else(|| {
            AttendanceError::SessionInactive(format!("no session {}", claim.session_id))
        })?;
        let session = lock_slot(&slot);
        if !session.active {
            return Err(AttendanceError::SessionInactive(format!(
                "session {} has ended",
                session.id
            )));
        }
        self.rotator.authenticate(&session, &claim.token)?;

        // 3. Enrollment
        if !self.enrollment.is_enrolled(&session.course, &claim.claimant)? {
            return Err(AttendanceError::NotEnrolled {
                student: claim.claimant.to_string(),
                course: session.course.to_string(),
            });
        }

        // 4. Device
        let check = self.devices.verify(&claim.claimant, &claim.device);
        if let DeviceCheck::Mismatch { bound } = &check {
            log::warn!(
                "device mismatch for {}: bound {bound}, presented {}",
                claim.claimant,
                claim.device
            );
            *alert = self.security_alert(&session, claim, bound, now);
            return Err(AttendanceError::DeviceMismatch {
                account: claim.claimant.to_string(),
                presented: claim.device.to_string(),
            });
        }
        if let Some(holder) = self.ledger.device_holder(&session.id, &claim.device) {
            if holder != claim.claimant {
                log::warn!(
                    "device {} reused in session {} (held by {holder}, claimed by {})",
                    claim.device,
                    session.id,
                    claim.claimant
                );
                return Err(AttendanceError::DeviceReused {
                    device: claim.device.to_string(),
                });
            }
        }

        // 5. Geofence
        let distance_m = geo::distance_meters(claim.location, session.anchor)?;
        if distance_m > session.radius_m {
            return Err(AttendanceError::OutOfRange {
                distance_m,
                radius_m: session.radius_m,
            });
        }

        // 6. Duplicate
        if self.ledger.find(&session.id, &claim.claimant).is_some() {
            return Err(AttendanceError::AlreadyMarked {
                session: session.id.to_string(),
                student: claim.claimant.to_string(),
            });
        }

        // 7. Biometric
        let biometric = self.biometric_verdict(claim)?;

        let record = self.ledger.record_present(PresentEntry {
            session: session.id.clone(),
            student: claim.claimant.clone(),
            course: session.course.clone(),
            device: Some(claim.device.clone()),
            proof_ref: None,
            biometric,
            recorded_at: now,
        })?;

        if check == DeviceCheck::Unbound && self.config.bind_on_first_claim {
            self.devices.bind(&claim.claimant, &claim.device);
        }
        Ok(record)
    }

    fn security_alert(
        &self,
        session: &Session,
        claim: &Claim,
        bound: &DeviceId,
        now: u64,
    ) -> Option<(String, SecurityAlert)> {
        let recipient = self.config.security_contact.clone()?;
        let account_name = self
            .identity
            .display_name(&claim.claimant)
            .unwrap_or_else(|_| claim.claimant.to_string());
        Some((
            recipient,
            SecurityAlert {
                account: claim.claimant.clone(),
                account_name,
                session: session.id.clone(),
                bound_device: bound.clone(),
                presented_device: claim.device.clone(),
                timestamp: now,
            },
        ))
    }

    /// Step 7. Returns the verdict to store, or the rejection under
    /// [`BiometricPolicy::Strict`].
    fn biometric_verdict(&self, claim: &Claim) -> Result<BiometricVerdict> {
        let strict = self.config.biometric_policy == BiometricPolicy::Strict;
        let soft_fail = |verdict: BiometricVerdict, reason: String| {
            if strict {
                Err(AttendanceError::BiometricMismatch(reason))
            } else {
                log::warn!("biometric check for {}: {reason}; proceeding", claim.claimant);
                Ok(verdict)
            }
        };

        let reference = match self.identity.reference_image(&claim.claimant) {
            Ok(Some(reference)) => reference,
            Ok(None) => return Ok(BiometricVerdict::Skipped),
            Err(e) => {
                return soft_fail(
                    BiometricVerdict::Unavailable,
                    format!("reference image lookup failed: {e}"),
                )
            }
        };
        let Some(live) = claim.proof_image.as_deref() else {
            return soft_fail(
                BiometricVerdict::Skipped,
                "no proof image supplied".to_string(),
            );
        };
        let Some(comparator) = &self.comparator else {
            log::warn!(
                "no biometric comparator configured; skipping check for {}",
                claim.claimant
            );
            return Ok(BiometricVerdict::Skipped);
        };

        match comparator.compare(&reference, live) {
            Ok(ComparisonOutcome::Distance(distance))
                if distance <= self.config.biometric_threshold =>
            {
                log::debug!("face matched for {} (distance {distance:.3})", claim.claimant);
                Ok(BiometricVerdict::Matched { distance })
            }
            Ok(ComparisonOutcome::Distance(distance)) => soft_fail(
                BiometricVerdict::Flagged { distance },
                format!(
                    "face distance {distance:.3} exceeds threshold {:.3}",
                    self.config.biometric_threshold
                ),
            ),
            Ok(ComparisonOutcome::NotDetected) => soft_fail(
                BiometricVerdict::NotDetected,
                "no face detected".to_string(),
            ),
            Err(e) => soft_fail(
                BiometricVerdict::Unavailable,
                format!("comparator failed: {e}"),
            ),
        }
    }

    /// Store the proof photo of an accepted claim and link it to the record.
    ///
    /// Runs after the insert and outside the session lock, so only accepted
    /// claims reach the image store. A store failure keeps the record
    /// without a reference.
    fn attach_proof(&self, claim: &Claim, record: AttendanceRecord) -> AttendanceRecord {
        let (Some(blob), Some(store)) = (claim.proof_image.as_deref(), self.image_store.as_ref())
        else {
            return record;
        };
        match store.store(blob) {
            Ok(reference) => self
                .ledger
                .set_proof_ref(&record.session, &record.student, reference)
                .unwrap_or(record),
            Err(e) => {
                log::warn!("failed to store proof image for {}: {e}", claim.claimant);
                record
            }
        }
    }
}
