//! Access control at the operational boundary.
//!
//! Roles form a closed set and map to capability sets; operations ask for
//! a capability, never for a role. The verification engine itself never
//! sees roles.

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};
use crate::ids::AccountId;
use crate::session::Session;

/// Account roles known to the attendance system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Guardian,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Guardian => "guardian",
        };
        f.write_str(s)
    }
}

/// Operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    StartSession,
    EndSession,
    ShowCredential,
    SubmitClaim,
    ViewActiveSession,
    ViewReports,
    ViewOwnStats,
    ManualMark,
    ResetDevice,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Role {
    /// Whether this role carries `capability`.
    pub fn allows(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Admin => true,
            Role::Teacher => matches!(
                capability,
                StartSession
                    | EndSession
                    | ShowCredential
                    | ViewActiveSession
                    | ViewReports
                    | ManualMark
                    | ResetDevice
            ),
            Role::Student => matches!(capability, SubmitClaim | ViewActiveSession | ViewOwnStats),
            Role::Guardian => false,
        }
    }
}

/// An authenticated caller. Authentication itself happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account: AccountId,
    pub role: Role,
}

impl Caller {
    pub fn new(account: impl Into<AccountId>, role: Role) -> Self {
        Self {
            account: account.into(),
            role,
        }
    }

    /// # Errors
    ///
    /// Returns `AttendanceError::Unauthorized` if the role lacks `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            log::warn!(
                "denied {capability} to {} ({})",
                self.account,
                self.role
            );
            Err(AttendanceError::Unauthorized {
                role: self.role.to_string(),
                capability: capability.to_string(),
            })
        }
    }

    /// Require `capability` and, for teachers, ownership of `session`.
    /// Admins may act on any session.
    pub fn require_on_session(&self, capability: Capability, session: &Session) -> Result<()> {
        self.require(capability)?;
        if self.role == Role::Teacher && session.teacher != self.account {
            return Err(AttendanceError::Unauthorized {
                role: self.role.to_string(),
                capability: format!("{capability} on session {} owned by {}", session.id, session.teacher),
            });
        }
        Ok(())
    }
}
