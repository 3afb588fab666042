use crate::{error::ErrorCode, error::Result, Error};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const MAX_TOKEN_AGE_SECONDS: i64 = 24 * 60 * 60;

/// Double-submit CSRF tokens.
///
/// The server issues `token.timestamp.hmac16` in a non-HttpOnly cookie;
/// mutating requests must echo the same value in `X-CSRF-Token`. The
/// timestamp is base36-encoded unix seconds; `hmac16` is the first 16 hex
/// characters of HMAC-SHA-256 over `token.timestamp`. API-key
/// authenticated requests bypass this check entirely.
#[derive(Clone)]
pub struct CsrfService {
    secret: Vec<u8>,
}

impl CsrfService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Issue a fresh signed token for the cookie.
    pub fn issue(&self) -> String {
        let mut token_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        let timestamp = to_base36(Utc::now().timestamp() as u64);
        let mac = self.sign(&token, &timestamp);
        format!("{}.{}.{}", token, timestamp, mac)
    }

    /// Validate the double-submit pair from cookie and header.
    pub fn validate(&self, cookie_value: &str, header_value: &str) -> Result<()> {
        // Compare the full values in constant time before any parsing
        let equal: bool = cookie_value
            .as_bytes()
            .ct_eq(header_value.as_bytes())
            .into();
        if !equal {
            return Err(Error::new(
                ErrorCode::CsrfValidationFailed,
                "CSRF token mismatch between cookie and header",
            ));
        }

        let mut parts = cookie_value.splitn(3, '.');
        let (token, timestamp, mac) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(ts), Some(m)) if !t.is_empty() && !ts.is_empty() && !m.is_empty() => {
                (t, ts, m)
            }
            _ => {
                return Err(Error::new(
                    ErrorCode::CsrfValidationFailed,
                    "Malformed CSRF token",
                ))
            }
        };

        let expected = self.sign(token, timestamp);
        let mac_ok: bool = expected.as_bytes().ct_eq(mac.as_bytes()).into();
        if !mac_ok {
            return Err(Error::new(
                ErrorCode::CsrfValidationFailed,
                "CSRF token signature invalid",
            ));
        }

        let issued_at = from_base36(timestamp).ok_or_else(|| {
            Error::new(ErrorCode::CsrfValidationFailed, "Malformed CSRF timestamp")
        })? as i64;

        let age = Utc::now().timestamp() - issued_at;
        if age > MAX_TOKEN_AGE_SECONDS || age < -60 {
            return Err(Error::new(
                ErrorCode::CsrfValidationFailed,
                "CSRF token expired",
            ));
        }

        Ok(())
    }

    /// Whether this HTTP method requires CSRF validation.
    pub fn method_requires_check(method: &str) -> bool {
        !matches!(method.to_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS")
    }

    fn sign(&self, token: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(token.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        digest[..16].to_string()
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

fn from_base36(value: &str) -> Option<u64> {
    u64::from_str_radix(value, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let svc = CsrfService::new("0123456789abcdef0123456789abcdef");
        let token = svc.issue();
        assert_eq!(token.split('.').count(), 3);
        assert!(svc.validate(&token, &token).is_ok());
    }

    #[test]
    fn test_header_cookie_mismatch_rejected() {
        let svc = CsrfService::new("0123456789abcdef0123456789abcdef");
        let a = svc.issue();
        let b = svc.issue();
        assert!(svc.validate(&a, &b).is_err());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let svc = CsrfService::new("0123456789abcdef0123456789abcdef");
        let token = svc.issue();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[2] = "0000000000000000";
        let forged = parts.join(".");
        assert!(svc.validate(&forged, &forged).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let svc = CsrfService::new("0123456789abcdef0123456789abcdef");
        // Construct a token with a timestamp 25 hours in the past
        let old = (Utc::now().timestamp() - 25 * 3600) as u64;
        let timestamp = to_base36(old);
        let token = "aabbccddeeff00112233445566778899";
        let mac = svc.sign(token, &timestamp);
        let value = format!("{}.{}.{}", token, timestamp, mac);
        let err = svc.validate(&value, &value).unwrap_err();
        assert_eq!(err.code, ErrorCode::CsrfValidationFailed);
    }

    #[test]
    fn test_safe_methods_skip_check() {
        assert!(!CsrfService::method_requires_check("GET"));
        assert!(!CsrfService::method_requires_check("head"));
        assert!(CsrfService::method_requires_check("POST"));
        assert!(CsrfService::method_requires_check("DELETE"));
    }

    #[test]
    fn test_base36_round_trip() {
        for v in [0u64, 1, 35, 36, 1_700_000_000] {
            assert_eq!(from_base36(&to_base36(v)), Some(v));
        }
    }
}
