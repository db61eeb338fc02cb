//! Authentication capability: credential hashing, signed session tokens, and
//! the explicit principal handed to every workflow operation.

mod credentials;
mod token;

pub use credentials::CredentialHasher;
pub use token::{SessionClaims, TokenIssuer};

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::workflows::clearance::domain::{Department, Role};

/// Authenticated caller. Staff always carry a department; students and
/// administrators never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
}

impl Principal {
    pub fn student(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Student,
            department: None,
        }
    }

    pub fn staff(id: impl Into<String>, department: Department) -> Self {
        Self {
            id: id.into(),
            role: Role::Staff,
            department: Some(department),
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
            department: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins act for every department, staff only for their own.
    pub fn acts_for(&self, department: Department) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Staff => self.department == Some(department),
            Role::Student => false,
        }
    }

    /// Department scope for read projections; `None` means all departments.
    pub fn department_scope(&self) -> Option<Department> {
        match self.role {
            Role::Staff => self.department,
            _ => None,
        }
    }
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Hasher plus token issuer, built once at the composition root.
#[derive(Debug, Clone)]
pub struct Authenticator {
    hasher: CredentialHasher,
    tokens: TokenIssuer,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self {
            hasher: CredentialHasher::new(config)?,
            tokens: TokenIssuer::new(config),
        })
    }

    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_act_only_for_their_department() {
        let staff = Principal::staff("stf-1", Department::Hostel);
        assert!(staff.acts_for(Department::Hostel));
        assert!(!staff.acts_for(Department::Finance));
        assert_eq!(staff.department_scope(), Some(Department::Hostel));

        let admin = Principal::admin("adm-1");
        assert!(Department::ALL.iter().all(|d| admin.acts_for(*d)));
        assert_eq!(admin.department_scope(), None);

        assert!(!Principal::student("U1").acts_for(Department::Library));
    }
}
