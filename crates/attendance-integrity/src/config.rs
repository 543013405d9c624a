//! Engine configuration.
//!
//! Configuration is a plain serde struct with defaults matching the
//! reference deployment. It can be loaded from a JSON file; any field
//! omitted from the file keeps its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};

/// How the biometric step treats a failed or inconclusive comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricPolicy {
    /// Reject on mismatch, undetected face, comparator failure, or a
    /// missing proof image when a reference is on file.
    Strict,
    /// Flag mismatches on the record and log; proceed on undetected faces
    /// and comparator failures.
    #[default]
    Lenient,
}

/// Denominator used when turning present counts into percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentageBasis {
    /// Number of ledger records the student has for the course.
    RecordedClasses,
    /// Number of sessions ever started for the course.
    #[default]
    SessionCount,
}

/// Configuration for the attendance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Credential rotation cadence in milliseconds (default: 10_000).
    pub rotation_period_ms: u64,
    /// How old a credential may be when a claim arrives (default: 90_000).
    pub validity_window_ms: u64,
    /// Geofence radius used when a session is started without one (default: 20m).
    pub default_radius_m: f64,
    /// Maximum descriptor distance still considered a match (default: 0.6).
    pub biometric_threshold: f32,
    /// Strict or lenient biometric handling.
    pub biometric_policy: BiometricPolicy,
    /// Bind an unbound claimant to the presented device once a claim is accepted.
    pub bind_on_first_claim: bool,
    /// Denominator for course-wide reports.
    pub course_stats_basis: PercentageBasis,
    /// Administrative contact for device-mismatch alerts. `None` disables alerts.
    pub security_contact: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rotation_period_ms: 10_000,
            validity_window_ms: 90_000,
            default_radius_m: 20.0,
            biometric_threshold: 0.6,
            biometric_policy: BiometricPolicy::Lenient,
            bind_on_first_claim: true,
            course_stats_basis: PercentageBasis::SessionCount,
            security_contact: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. The loaded configuration is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidFileFormat` for malformed JSON,
    /// `AttendanceError::InvalidInput` if validation fails, or
    /// `AttendanceError::Io` for other filesystem errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path)?;
        let config: EngineConfig = serde_json::from_slice(&bytes).map_err(|e| {
            AttendanceError::InvalidFileFormat(format!(
                "failed to parse config {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the knobs are mutually consistent.
    ///
    /// The validity window must cover at least one rotation period, or a
    /// token could expire before the next one is shown.
    pub fn validate(&self) -> Result<()> {
        if self.rotation_period_ms == 0 {
            return Err(AttendanceError::InvalidInput(
                "rotation_period_ms must be > 0".into(),
            ));
        }
        if self.validity_window_ms < self.rotation_period_ms {
            return Err(AttendanceError::InvalidInput(format!(
                "validity_window_ms ({}) must be >= rotation_period_ms ({})",
                self.validity_window_ms, self.rotation_period_ms
            )));
        }
        if !self.default_radius_m.is_finite() || self.default_radius_m <= 0.0 {
            return Err(AttendanceError::InvalidInput(format!(
                "default_radius_m must be a positive number, got {}",
                self.default_radius_m
            )));
        }
        if !self.biometric_threshold.is_finite() || self.biometric_threshold < 0.0 {
            return Err(AttendanceError::InvalidInput(format!(
                "biometric_threshold must be a non-negative number, got {}",
                self.biometric_threshold
            )));
        }
        Ok(())
    }
}
