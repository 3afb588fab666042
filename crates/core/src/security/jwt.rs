use crate::{config::JwtConfig, error::ErrorCode, error::Result, Error};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by access tokens.
///
/// `jti` is the shared session id: the paired refresh token carries the
/// same value, so terminating the session invalidates both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Claims carried by refresh tokens.
///
/// `fid` is the rotation family id. Legacy tokens issued before family
/// tracking have no `fid`; the auth service accepts them once and migrates
/// them into a fresh family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
}

/// A freshly issued access/refresh pair with its shared session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub jti: String,
    pub family_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry: Duration,
    refresh_token_expiry: Duration,
    issuer: String,
    audience: String,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.len() < 32 {
            return Err(Error::configuration(
                "JWT secret must be at least 32 characters",
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_expiry: Duration::seconds(config.access_token_expiry),
            refresh_token_expiry: Duration::seconds(config.refresh_token_expiry),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    /// Issue an access/refresh pair sharing a fresh `jti` under the given
    /// rotation family.
    pub fn issue_pair(&self, user_id: Uuid, role: &str, family_id: &str) -> Result<IssuedTokens> {
        let now = Utc::now();
        let jti = Uuid::new_v4().to_string();
        let access_expires_at = now + self.access_token_expiry;
        let refresh_expires_at = now + self.refresh_token_expiry;

        let access_claims = AccessClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: access_expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
        };

        let refresh_claims = RefreshClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: refresh_expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
            fid: Some(family_id.to_string()),
        };

        let header = Header::new(Algorithm::HS256);

        let access_token = encode(&header, &access_claims, &self.encoding_key).map_err(|e| {
            Error::new(
                ErrorCode::TokenInvalid,
                format!("Failed to sign access token: {}", e),
            )
        })?;

        let refresh_token = encode(&header, &refresh_claims, &self.encoding_key).map_err(|e| {
            Error::new(
                ErrorCode::TokenInvalid,
                format!("Failed to sign refresh token: {}", e),
            )
        })?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            jti,
            family_id: family_id.to_string(),
            access_expires_at,
            refresh_expires_at,
        })
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims> {
        let token_data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| map_jwt_error(e, "access"))?;
        Ok(token_data.claims)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims> {
        let token_data = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| map_jwt_error(e, "refresh"))?;
        Ok(token_data.claims)
    }

    pub fn refresh_token_expiry_seconds(&self) -> i64 {
        self.refresh_token_expiry.num_seconds()
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error, kind: &str) -> Error {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => Error::new(
            ErrorCode::TokenExpired,
            format!("{} token has expired", kind),
        ),
        _ => Error::new(
            ErrorCode::TokenInvalid,
            format!("Invalid {} token: {}", kind, err),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;

    fn service() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "0123456789abcdef0123456789abcdef".into(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "cost-watchdog".into(),
            audience: "cost-watchdog-api".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_pair_shares_jti_and_family() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let pair = svc.issue_pair(user_id, "analyst", "fam-1").unwrap();

        let access = svc.verify_access_token(&pair.access_token).unwrap();
        let refresh = svc.verify_refresh_token(&pair.refresh_token).unwrap();

        assert_eq!(access.jti, refresh.jti);
        assert_eq!(access.jti, pair.jti);
        assert_eq!(refresh.fid.as_deref(), Some("fam-1"));
        assert_eq!(access.sub, user_id.to_string());
        assert_eq!(access.iss, "cost-watchdog");
        assert_eq!(access.aud, "cost-watchdog-api");
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = JwtService::new(&JwtConfig {
            secret: "too-short".into(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "cost-watchdog".into(),
            audience: "cost-watchdog-api".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let svc = service();
        let other = JwtService::new(&JwtConfig {
            secret: "0123456789abcdef0123456789abcdef".into(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "cost-watchdog".into(),
            audience: "some-other-api".into(),
        })
        .unwrap();

        let pair = other.issue_pair(Uuid::new_v4(), "viewer", "fam-2").unwrap();
        assert!(svc.verify_access_token(&pair.access_token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let svc = service();
        let pair = svc.issue_pair(Uuid::new_v4(), "viewer", "fam-3").unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        assert!(svc.verify_access_token(&tampered).is_err());
    }
}
