use crate::{config::SecurityConfig, error::Result, Error};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};

/// Argon2id password hashing.
///
/// Defaults follow the OWASP minimum configuration: 19 MiB memory, two
/// iterations, one lane, 32-byte output.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
            Some(32),
        )
        .map_err(|e| Error::internal(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::internal(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::internal(format!("Invalid password hash format: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::internal(format!("Password verification error: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            // Reduced cost so the test suite stays fast
            argon2_memory_cost: 8192,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            field_encryption_key: String::new(),
            cookie_secret: String::new(),
            backup_code_pepper: String::new(),
            lockout_max_attempts: 5,
            lockout_window_seconds: 900,
            lockout_max_lockouts: 3,
        }
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hasher = PasswordHasher::new(&test_config()).unwrap();
        let password = "SecurePass123!";

        let hash = hasher.hash_password(password).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert_ne!(hash, password);

        assert!(hasher.verify_password(password, &hash).unwrap());
        assert!(!hasher.verify_password("WrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = PasswordHasher::new(&test_config()).unwrap();
        let a = hasher.hash_password("same-password").unwrap();
        let b = hasher.hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }
}
