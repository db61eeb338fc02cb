use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{generate_id, Department, Role, Staff, StaffId, Student, StudentId};
use super::error::ClearanceError;
use super::repository::{ClearanceStore, StaffFilter};
use crate::auth::{AuthError, Authenticator, Principal};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub id: StudentId,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStaff {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<Department>,
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub principal: Principal,
    pub token: String,
}

fn validate_email(email: &str) -> Result<String, ClearanceError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(email.to_string())
        }
        _ => Err(ClearanceError::invalid(format!("'{email}' is not an email address"))),
    }
}

/// Student ids double as notification channel names, so they may not use
/// the `:` that prefixes department channels.
fn validate_student_id(id: &str) -> Result<StudentId, ClearanceError> {
    let id = required("student id", id)?;
    if id.contains(|c: char| c == ':' || c.is_whitespace()) {
        return Err(ClearanceError::invalid(format!(
            "student id '{id}' may not contain ':' or whitespace"
        )));
    }
    Ok(StudentId(id))
}

fn validate_password(password: &str) -> Result<(), ClearanceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClearanceError::invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn required(field: &str, value: &str) -> Result<String, ClearanceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClearanceError::invalid(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Student and staff registration, login and credential changes.
pub struct AccountRegistry<S> {
    store: Arc<S>,
    auth: Authenticator,
}

impl<S> AccountRegistry<S>
where
    S: ClearanceStore + 'static,
{
    pub fn new(store: Arc<S>, auth: Authenticator) -> Self {
        Self { store, auth }
    }

    /// New students start pending in every department with empty buckets.
    pub fn register_student(&self, input: NewStudent) -> Result<Student, ClearanceError> {
        let id = validate_student_id(&input.id.0)?;
        let name = required("name", &input.name)?;
        let email = validate_email(&input.email)?;
        validate_password(&input.password)?;
        let hash = self.auth.hasher().hash(&input.password)?;

        let student = self
            .store
            .insert_student(Student::new(id, name, email, hash))?;
        info!(student = %student.id, "student registered");
        Ok(student)
    }

    pub fn register_staff(&self, input: NewStaff) -> Result<Staff, ClearanceError> {
        match (input.role, input.department) {
            (Role::Staff, Some(_)) | (Role::Admin, None) => {}
            (Role::Staff, None) => {
                return Err(ClearanceError::invalid("staff must belong to a department"))
            }
            (Role::Admin, Some(_)) => {
                return Err(ClearanceError::invalid(
                    "administrators are not tied to a department",
                ))
            }
            (Role::Student, _) => {
                return Err(ClearanceError::invalid(
                    "students are registered through the student registry",
                ))
            }
        }
        let name = required("name", &input.name)?;
        let email = validate_email(&input.email)?;
        validate_password(&input.password)?;
        let hash = self.auth.hasher().hash(&input.password)?;

        let staff = self.store.insert_staff(Staff {
            id: StaffId(generate_id("stf")),
            name,
            email,
            credential_hash: hash,
            role: input.role,
            department: input.department,
            created_at: Utc::now(),
        })?;
        info!(staff = %staff.id.0, role = staff.role.label(), "staff registered");
        Ok(staff)
    }

    pub fn list_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>, ClearanceError> {
        Ok(self.store.list_staff(filter)?)
    }

    /// Accepts an email address (students or staff) or a student identifier.
    pub fn login(&self, identifier: &str, password: &str) -> Result<Session, ClearanceError> {
        let identifier = identifier.trim();
        let student = match self.store.find_student_by_email(identifier)? {
            Some(student) => Some(student),
            None => self
                .store
                .fetch_student(&StudentId(identifier.to_string()))?,
        };

        let (principal, hash) = if let Some(student) = student {
            (Principal::student(student.id.0), student.credential_hash)
        } else if let Some(staff) = self.store.find_staff_by_email(identifier)? {
            let principal = Principal {
                id: staff.id.0,
                role: staff.role,
                department: staff.department,
            };
            (principal, staff.credential_hash)
        } else {
            return Err(AuthError::InvalidCredentials.into());
        };

        if !self.auth.hasher().verify(password, &hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.auth.tokens().issue(&principal)?;
        info!(principal = %principal.id, role = principal.role.label(), "login succeeded");
        Ok(Session { principal, token })
    }

    pub fn authenticate(&self, token: &str) -> Result<Principal, ClearanceError> {
        Ok(self.auth.tokens().verify(token)?)
    }

    /// Wrong current password fails `Forbidden`.
    pub fn update_credential(
        &self,
        principal: &Principal,
        current: &str,
        new: &str,
    ) -> Result<(), ClearanceError> {
        validate_password(new)?;
        match principal.role {
            Role::Student => {
                let id = StudentId(principal.id.clone());
                let student = self
                    .store
                    .fetch_student(&id)?
                    .ok_or_else(|| ClearanceError::not_found("student", id.0.clone()))?;
                self.check_current(current, &student.credential_hash)?;
                let hash = self.auth.hasher().hash(new)?;
                self.store.update_student_credential(&id, hash)?;
            }
            Role::Staff | Role::Admin => {
                let id = StaffId(principal.id.clone());
                let staff = self
                    .store
                    .fetch_staff(&id)?
                    .ok_or_else(|| ClearanceError::not_found("staff", id.0.clone()))?;
                self.check_current(current, &staff.credential_hash)?;
                let hash = self.auth.hasher().hash(new)?;
                self.store.update_staff_credential(&id, hash)?;
            }
        }
        info!(principal = %principal.id, "credential updated");
        Ok(())
    }

    fn check_current(&self, current: &str, hash: &str) -> Result<(), ClearanceError> {
        if self.auth.hasher().verify(current, hash)? {
            Ok(())
        } else {
            Err(ClearanceError::forbidden("current password does not match"))
        }
    }
}
