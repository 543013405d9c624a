//! Enrollment and identity directories.
//!
//! Course rosters and account profiles are owned by systems outside the
//! engine. The engine reads them through these two traits;
//! [`InMemoryDirectory`] backs the CLI (persisted as `directory.json`) and
//! the tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::error::{AttendanceError, Result};
use crate::ids::{AccountId, CourseId};

/// Read-only view of course membership.
pub trait EnrollmentDirectory: Send + Sync {
    /// Whether `student` is a member of `course`.
    fn is_enrolled(&self, course: &CourseId, student: &AccountId) -> Result<bool>;

    /// Every student enrolled in `course`.
    fn enrolled_students(&self, course: &CourseId) -> Result<Vec<AccountId>>;

    /// Display name of `course`; falls back to the ID.
    fn course_name(&self, course: &CourseId) -> Result<String> {
        Ok(course.to_string())
    }
}

/// Read-only view of account profiles.
pub trait IdentityDirectory: Send + Sync {
    /// Reference image URL used for biometric comparison, if on file.
    fn reference_image(&self, account: &AccountId) -> Result<Option<String>>;

    /// Display name; falls back to the ID.
    fn display_name(&self, account: &AccountId) -> Result<String> {
        Ok(account.to_string())
    }

    /// Where attendance notifications for this student go, if anywhere.
    fn guardian_contact(&self, _account: &AccountId) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A course and its roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseEntry {
    pub name: String,
    #[serde(default)]
    pub students: Vec<AccountId>,
}

/// An account profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub guardian_contact: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
}

/// Directory held entirely in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDirectory {
    #[serde(default)]
    pub courses: BTreeMap<CourseId, CourseEntry>,
    #[serde(default)]
    pub accounts: BTreeMap<AccountId, AccountEntry>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&mut self, id: impl Into<CourseId>, name: impl Into<String>) -> &mut Self {
        self.courses.insert(
            id.into(),
            CourseEntry {
                name: name.into(),
                students: Vec::new(),
            },
        );
        self
    }

    pub fn add_account(
        &mut self,
        id: impl Into<AccountId>,
        name: impl Into<String>,
        role: Role,
    ) -> &mut Self {
        self.accounts.insert(
            id.into(),
            AccountEntry {
                name: name.into(),
                role,
                guardian_contact: None,
                reference_image: None,
            },
        );
        self
    }

    /// Add `student` to the roster of `course`.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::NotFound` if the course is unknown.
    pub fn enroll(&mut self, course: &CourseId, student: &AccountId) -> Result<()> {
        let entry = self
            .courses
            .get_mut(course)
            .ok_or_else(|| AttendanceError::NotFound(format!("course not found: {course}")))?;
        if !entry.students.contains(student) {
            entry.students.push(student.clone());
        }
        Ok(())
    }

    pub fn set_guardian_contact(&mut self, account: &AccountId, contact: impl Into<String>) {
        if let Some(entry) = self.accounts.get_mut(account) {
            entry.guardian_contact = Some(contact.into());
        }
    }

    pub fn set_reference_image(&mut self, account: &AccountId, url: impl Into<String>) {
        if let Some(entry) = self.accounts.get_mut(account) {
            entry.reference_image = Some(url.into());
        }
    }

    /// Role of a known account.
    pub fn role(&self, account: &AccountId) -> Option<Role> {
        self.accounts.get(account).map(|a| a.role)
    }

    fn course(&self, course: &CourseId) -> Result<&CourseEntry> {
        self.courses
            .get(course)
            .ok_or_else(|| AttendanceError::NotFound(format!("course not found: {course}")))
    }
}

impl EnrollmentDirectory for InMemoryDirectory {
    fn is_enrolled(&self, course: &CourseId, student: &AccountId) -> Result<bool> {
        Ok(self.course(course)?.students.contains(student))
    }

    fn enrolled_students(&self, course: &CourseId) -> Result<Vec<AccountId>> {
        Ok(self.course(course)?.students.clone())
    }

    fn course_name(&self, course: &CourseId) -> Result<String> {
        Ok(self.course(course)?.name.clone())
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn reference_image(&self, account: &AccountId) -> Result<Option<String>> {
        Ok(self
            .accounts
            .get(account)
            .and_then(|a| a.reference_image.clone()))
    }

    fn display_name(&self, account: &AccountId) -> Result<String> {
        Ok(self
            .accounts
            .get(account)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| account.to_string()))
    }

    fn guardian_contact(&self, account: &AccountId) -> Result<Option<String>> {
        Ok(self
            .accounts
            .get(account)
            .and_then(|a| a.guardian_contact.clone()))
    }
}
