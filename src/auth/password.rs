use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

/// Upper bound on accepted plaintext length, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password exceeds {} bytes", MAX_PASSWORD_BYTES)]
    TooLong,
    #[error("malformed password digest: {0}")]
    Malformed(String),
    #[error("password hashing failed: {0}")]
    Internal(String),
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String, HashError>;

    /// `Ok(false)` on mismatch; `Err` only when the digest itself is unusable.
    fn verify(&self, digest: &str, plain: &str) -> Result<bool, HashError>;
}

/// Argon2id with a configurable work factor.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn with_cost(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, HashError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| HashError::Internal(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String, HashError> {
        if plain.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::TooLong);
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Internal(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, digest: &str, plain: &str) -> Result<bool, HashError> {
        if plain.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::TooLong);
        }
        let parsed = PasswordHash::new(digest).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashError::Malformed(e.to_string())
        })?;
        // Params and salt come from the digest, not from `self`.
        match self.argon2().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(HashError::Malformed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Hasher {
        Argon2Hasher::with_cost(1024, 1, 1).expect("valid params")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = cheap();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&hash, password).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = cheap();
        let hash = hasher
            .hash("correct-horse-battery-staple")
            .expect("hashing should succeed");
        assert!(!hasher
            .verify(&hash, "wrong-password")
            .expect("verify should not error"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = cheap();
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_uses_params_from_digest() {
        let strong = Argon2Hasher::with_cost(2048, 2, 1).unwrap();
        let hash = strong.hash("pw123456").unwrap();
        assert!(cheap().verify(&hash, "pw123456").unwrap());
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = cheap().verify("not-a-valid-hash", "anything").unwrap_err();
        assert!(matches!(err, HashError::Malformed(_)));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let long = "x".repeat(MAX_PASSWORD_BYTES + 1);
        assert!(matches!(cheap().hash(&long), Err(HashError::TooLong)));
    }
}
