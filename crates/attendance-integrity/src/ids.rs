//! Identifier newtypes shared across the engine.
//!
//! Accounts, courses and devices are named by the surrounding system and
//! arrive as opaque strings. Session IDs are minted here.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A user account (student, teacher, admin, guardian).
    AccountId
);
string_id!(
    /// A course whose meetings are tracked.
    CourseId
);
string_id!(
    /// A durable hardware/browser identifier presented by a client.
    DeviceId
);
string_id!(
    /// One live teaching instance of a course.
    SessionId
);

impl SessionId {
    /// Derive a fresh session ID (`asn_` + bs58 of a SHA-256 digest).
    ///
    /// The digest covers the course, the teacher, the start time and 16
    /// random bytes, so two sessions started in the same millisecond
    /// still get distinct IDs.
    pub fn generate(course: &CourseId, teacher: &AccountId, started_at: u64) -> Self {
        let nonce: [u8; 16] = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(course.0.as_bytes());
        hasher.update(b":");
        hasher.update(teacher.0.as_bytes());
        hasher.update(b":");
        hasher.update(started_at.to_be_bytes());
        hasher.update(nonce);
        let digest = hasher.finalize();
        let encoded = bs58::encode(&digest[..16]).into_string();
        SessionId(format!("asn_{encoded}"))
    }
}
