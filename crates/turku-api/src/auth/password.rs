//! Secret hashing and verification using argon2id.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

/// Hashes and verifies machine, storage and registration secrets.
#[derive(Debug, Clone, Default)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hasher with explicit argon2 cost parameters.
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a secret with a random salt.
    pub fn hash(&self, secret: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self.argon2().hash_password(secret.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    /// Verify a secret against a stored hash.
    ///
    /// An unparsable stored hash never verifies.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("Stored secret hash is not a valid PHC string");
            return false;
        };
        self.argon2()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
