use crate::{error::ErrorCode, error::Result, Error};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};

/// AES-256-GCM field-level encryption for values stored at rest
/// (invoice numbers, contract numbers, MFA secrets).
///
/// Ciphertext layout: 12-byte nonce followed by the GCM output, base64
/// encoded for text columns.
pub struct FieldEncryption {
    cipher: Aes256Gcm,
}

/// Result of a lenient read: the plaintext, and whether the stored value
/// was found unencrypted and should be re-encrypted on the next write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenientDecrypt {
    pub value: String,
    pub was_plaintext: bool,
}

impl FieldEncryption {
    pub fn new(key: &str) -> Result<Self> {
        let key_bytes = key.as_bytes();

        if key_bytes.len() != 32 {
            return Err(Error::new(
                ErrorCode::EncryptionError,
                "Field encryption key must be exactly 32 bytes",
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|e| {
            Error::new(ErrorCode::EncryptionError, format!("Encryption failed: {}", e))
        })?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 12 {
            return Err(Error::new(
                ErrorCode::DecryptionError,
                "Invalid ciphertext length",
            ));
        }

        let (nonce_bytes, encrypted_data) = ciphertext.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher.decrypt(nonce, encrypted_data).map_err(|e| {
            Error::new(ErrorCode::DecryptionError, format!("Decryption failed: {}", e))
        })
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        let encrypted = self.encrypt(plaintext.as_bytes())?;
        Ok(STANDARD.encode(&encrypted))
    }

    pub fn decrypt_string(&self, ciphertext: &str) -> Result<String> {
        let decoded = STANDARD.decode(ciphertext).map_err(|e| {
            Error::new(ErrorCode::DecryptionError, format!("Invalid base64: {}", e))
        })?;

        let decrypted = self.decrypt(&decoded)?;

        String::from_utf8(decrypted)
            .map_err(|e| Error::new(ErrorCode::DecryptionError, format!("Invalid UTF-8: {}", e)))
    }

    /// Decrypt a stored value that may predate field encryption.
    ///
    /// Historical contract-number rows were written as plaintext; any read
    /// that fails to decode is treated as such and flagged so the caller
    /// re-encrypts on the next write.
    pub fn decrypt_string_lenient(&self, stored: &str) -> LenientDecrypt {
        match self.decrypt_string(stored) {
            Ok(value) => LenientDecrypt {
                value,
                was_plaintext: false,
            },
            Err(_) => LenientDecrypt {
                value: stored.to_string(),
                was_plaintext: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> FieldEncryption {
        FieldEncryption::new("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let enc = service();
        let ciphertext = enc.encrypt_string("RE-2024-0042").unwrap();
        assert_ne!(ciphertext, "RE-2024-0042");
        assert_eq!(enc.decrypt_string(&ciphertext).unwrap(), "RE-2024-0042");
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(FieldEncryption::new("short").is_err());
    }

    #[test]
    fn test_lenient_decrypt_passes_through_plaintext() {
        let enc = service();
        let result = enc.decrypt_string_lenient("V-1998-LEGACY");
        assert!(result.was_plaintext);
        assert_eq!(result.value, "V-1998-LEGACY");

        let ciphertext = enc.encrypt_string("V-2024-007").unwrap();
        let result = enc.decrypt_string_lenient(&ciphertext);
        assert!(!result.was_plaintext);
        assert_eq!(result.value, "V-2024-007");
    }
}
