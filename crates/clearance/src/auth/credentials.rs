//! Credential hashing using Argon2id.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use uuid::Uuid;

use super::AuthError;
use crate::config::AuthConfig;

/// Produces and checks PHC-format hashes. If a pepper is configured it is
/// prepended to the password before hashing and verification.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
    pepper: Option<String>,
}

impl CredentialHasher {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.hash_memory_kib, config.hash_iterations, 1, None)
            .map_err(|e| AuthError::Crypto(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self {
            params,
            pepper: config.pepper.clone(),
        })
    }

    fn peppered(&self, password: &str) -> String {
        match &self.pepper {
            Some(pepper) => format!("{pepper}{password}"),
            None => password.to_string(),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
            .map_err(|e| AuthError::Crypto(format!("salt generation: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let input = self.peppered(password);
        argon2
            .hash_password(input.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Crypto(format!("hash error: {e}")))
    }

    /// `Ok(false)` on mismatch, `Err(AuthError::Crypto)` if the stored hash is malformed.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::Crypto(format!("invalid hash format: {e}")))?;
        let input = self.peppered(password);
        match Argon2::default().verify_password(input.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Crypto(format!("verify error: {e}"))),
        }
    }
}
