//! Signed, time-limited session tokens carrying the principal.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, Principal};
use crate::config::AuthConfig;
use crate::workflows::clearance::domain::{Department, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    lifetime_secs: u64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.token_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.token_secret.as_bytes()),
            issuer: config.token_issuer.clone(),
            lifetime_secs: config.token_lifetime_secs,
        }
    }

    pub fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.lifetime_secs).unwrap_or(i64::MAX - now);
        let claims = SessionClaims {
            sub: principal.id.clone(),
            role: principal.role,
            department: principal.department,
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(lifetime),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Crypto(format!("token encode: {e}")))
    }

    /// Checks signature, issuer and expiry, then rebuilds the principal.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);
        validation.leeway = 0;

        let claims = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(e.to_string()),
            })?;

        match (claims.role, claims.department) {
            (Role::Staff, Some(_)) | (Role::Student | Role::Admin, None) => Ok(Principal {
                id: claims.sub,
                role: claims.role,
                department: claims.department,
            }),
            _ => Err(AuthError::TokenInvalid(
                "role and department claims disagree".to_string(),
            )),
        }
    }
}
