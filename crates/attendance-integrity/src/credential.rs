//! Credential rotation: short-lived, session-scoped tokens.
//!
//! A token is a pure function of the session's start time, the current
//! time and the rotation period: every client asking during the same tick
//! gets the same token, and nothing is stored per client. Each token is
//! tagged with HMAC-SHA256 under the session's secret so a client cannot
//! mint its own fresh `issued_at`.
//!
//! Rotation period (freshness granularity) and validity window (replay
//! tolerance) are independent; the window is enforced by
//! [`check_freshness`], not by matching the current tick.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AttendanceError, Result};
use crate::ids::SessionId;
use crate::session::Session;

type HmacSha256 = Hmac<Sha256>;

/// A credential as presented by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    pub session_id: SessionId,
    /// Start of the rotation tick this token belongs to (epoch ms).
    pub issued_at: u64,
    /// Hex HMAC over `session_id` and `issued_at`.
    pub tag: String,
}

impl CredentialToken {
    /// Encode as a compact base64url JSON payload (what the QR code shows).
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AttendanceError::SerializationError(e.to_string()))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a payload produced by [`CredentialToken::encode`].
    pub fn decode(payload: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim())
            .map_err(|e| AttendanceError::InvalidToken(format!("bad encoding: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AttendanceError::InvalidToken(format!("bad payload: {e}")))
    }
}

/// Derives the current token for a session.
#[derive(Debug, Clone, Copy)]
pub struct CredentialRotator {
    rotation_period_ms: u64,
}

impl CredentialRotator {
    /// Create a rotator. A zero period is treated as one millisecond.
    pub fn new(rotation_period_ms: u64) -> Self {
        Self {
            rotation_period_ms: rotation_period_ms.max(1),
        }
    }

    /// Start of the rotation tick containing `now`.
    ///
    /// Ticks are aligned to the session's creation time. Times before the
    /// session started map to the first tick.
    pub fn tick_start(&self, session: &Session, now: u64) -> u64 {
        let elapsed = now.saturating_sub(session.created_at);
        session.created_at + (elapsed / self.rotation_period_ms) * self.rotation_period_ms
    }

    /// When the token returned for `now` will be replaced.
    pub fn next_rotation_at(&self, session: &Session, now: u64) -> u64 {
        self.tick_start(session, now) + self.rotation_period_ms
    }

    /// The token valid for `session` at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::SessionInactive` once the session has ended;
    /// ended sessions stop emitting credentials.
    pub fn current_token(&self, session: &Session, now: u64) -> Result<CredentialToken> {
        if !session.active {
            return Err(AttendanceError::SessionInactive(format!(
                "session {} has ended",
                session.id
            )));
        }
        let issued_at = self.tick_start(session, now);
        Ok(CredentialToken {
            session_id: session.id.clone(),
            issued_at,
            tag: compute_tag(&session.credential_secret, &session.id, issued_at)?,
        })
    }

    /// Check that `token` was minted for `session` by this engine.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::InvalidToken` if the token names another
    /// session or its tag does not verify.
    pub fn authenticate(&self, session: &Session, token: &CredentialToken) -> Result<()> {
        if token.session_id != session.id {
            return Err(AttendanceError::InvalidToken(format!(
                "token is for session {}, claim is for {}",
                token.session_id, session.id
            )));
        }
        let tag = hex::decode(&token.tag)
            .map_err(|e| AttendanceError::InvalidToken(format!("malformed tag: {e}")))?;
        let mut mac = keyed_mac(&session.credential_secret)?;
        mac.update(tag_input(&token.session_id, token.issued_at).as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| AttendanceError::InvalidToken("tag does not verify".into()))
    }
}

/// Freshness rule: accept when `now − issued_at ≤ window_ms`.
///
/// # Errors
///
/// Returns `AttendanceError::Expired` with the measured age otherwise.
pub fn check_freshness(issued_at: u64, now: u64, window_ms: u64) -> Result<()> {
    let age_ms = now.saturating_sub(issued_at);
    if age_ms > window_ms {
        return Err(AttendanceError::Expired { age_ms, window_ms });
    }
    Ok(())
}

/// Fresh random key for a new session, hex encoded.
pub(crate) fn generate_secret() -> String {
    let key: [u8; 32] = rand::random();
    hex::encode(key)
}

fn tag_input(session_id: &SessionId, issued_at: u64) -> String {
    format!("credential:{}:{}", session_id.0, issued_at)
}

fn keyed_mac(secret_hex: &str) -> Result<HmacSha256> {
    let key = hex::decode(secret_hex)
        .map_err(|e| AttendanceError::InvalidFileFormat(format!("session secret: {e}")))?;
    HmacSha256::new_from_slice(&key)
        .map_err(|e| AttendanceError::InvalidFileFormat(format!("session secret: {e}")))
}

fn compute_tag(secret_hex: &str, session_id: &SessionId, issued_at: u64) -> Result<String> {
    let mut mac = keyed_mac(secret_hex)?;
    mac.update(tag_input(session_id, issued_at).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
