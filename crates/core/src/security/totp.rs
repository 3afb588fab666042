use crate::{error::Result, Error};
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

/// TOTP enrollment and verification plus single-use backup codes.
///
/// Codes are accepted within the current 30-second step with a skew of one
/// step in either direction. Backup codes are stored only as peppered
/// SHA-256 hashes.
pub struct TotpService {
    issuer: String,
    backup_code_pepper: String,
}

impl TotpService {
    pub fn new(issuer: impl Into<String>, backup_code_pepper: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            backup_code_pepper: backup_code_pepper.into(),
        }
    }

    /// Generate a new random shared secret, base32 encoded.
    pub fn generate_secret(&self) -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        match Secret::Raw(bytes.to_vec()).to_encoded() {
            Secret::Encoded(encoded) => encoded,
            // to_encoded always yields the encoded form
            raw => raw.to_string(),
        }
    }

    /// Provisioning URI for authenticator apps.
    pub fn provisioning_uri(&self, secret: &str, email: &str) -> String {
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA256&digits=6&period=30",
            self.issuer, email, secret, self.issuer
        )
    }

    /// Verify a six-digit code against the shared secret.
    pub fn verify_code(&self, secret: &str, code: &str) -> Result<bool> {
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let totp = self.create_totp(secret)?;
        totp.check_current(code)
            .map_err(|e| Error::internal(format!("TOTP verification error: {}", e)))
    }

    /// Generate `count` single-use backup codes in `XXXX-XXXX` form.
    pub fn generate_backup_codes(&self, count: usize) -> Vec<String> {
        const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let mut rng = rand::thread_rng();

        (0..count)
            .map(|_| {
                let chars: Vec<char> = (0..8)
                    .map(|_| {
                        let mut byte = [0u8; 1];
                        rng.fill_bytes(&mut byte);
                        ALPHABET[byte[0] as usize % ALPHABET.len()] as char
                    })
                    .collect();
                format!(
                    "{}-{}",
                    chars[..4].iter().collect::<String>(),
                    chars[4..].iter().collect::<String>()
                )
            })
            .collect()
    }

    /// Peppered hash of a backup code for at-rest storage and lookup.
    pub fn hash_backup_code(&self, code: &str) -> String {
        let normalized = code.trim().to_uppercase().replace('-', "");
        let mut hasher = Sha256::new();
        hasher.update(self.backup_code_pepper.as_bytes());
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn create_totp(&self, secret: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| Error::internal(format!("Invalid TOTP secret: {}", e)))?;

        TOTP::new(Algorithm::SHA256, 6, 1, 30, secret_bytes)
            .map_err(|e| Error::internal(format!("Failed to create TOTP: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TotpService {
        TotpService::new("cost-watchdog", "test-pepper")
    }

    #[test]
    fn test_generated_secret_is_valid_base32() {
        let svc = service();
        let secret = svc.generate_secret();
        assert!(Secret::Encoded(secret).to_bytes().is_ok());
    }

    #[test]
    fn test_current_code_verifies() {
        let svc = service();
        let secret = svc.generate_secret();
        let totp = svc.create_totp(&secret).unwrap();
        let code = totp.generate_current().unwrap();

        assert!(svc.verify_code(&secret, &code).unwrap());
        assert!(!svc.verify_code(&secret, "000000").unwrap() || code == "000000");
    }

    #[test]
    fn test_malformed_code_rejected_without_error() {
        let svc = service();
        let secret = svc.generate_secret();
        assert!(!svc.verify_code(&secret, "12345").unwrap());
        assert!(!svc.verify_code(&secret, "abcdef").unwrap());
    }

    #[test]
    fn test_backup_codes_shape_and_hash() {
        let svc = service();
        let codes = svc.generate_backup_codes(10);
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 9);
            assert_eq!(code.chars().nth(4), Some('-'));
        }

        // Hash is insensitive to case and separator
        let h1 = svc.hash_backup_code(&codes[0]);
        let h2 = svc.hash_backup_code(&codes[0].to_lowercase().replace('-', ""));
        assert_eq!(h1, h2);

        // Pepper changes the hash
        let other = TotpService::new("cost-watchdog", "other-pepper");
        assert_ne!(h1, other.hash_backup_code(&codes[0]));
    }
}
