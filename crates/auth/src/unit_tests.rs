use crate::dto::*;
use validator::Validate;

#[test]
fn test_login_request_validation() {
    let valid = LoginRequest {
        email: "controller@example.com".to_string(),
        password: "password123".to_string(),
        mfa_code: None,
    };
    assert!(valid.validate().is_ok());

    let invalid_email = LoginRequest {
        email: "not-an-email".to_string(),
        password: "password123".to_string(),
        mfa_code: None,
    };
    assert!(invalid_email.validate().is_err());

    let empty_password = LoginRequest {
        email: "controller@example.com".to_string(),
        password: "".to_string(),
        mfa_code: None,
    };
    assert!(empty_password.validate().is_err());
}

#[test]
fn test_password_reset_confirm_requires_long_password() {
    let too_short = PasswordResetConfirm {
        token: "abc".to_string(),
        new_password: "short".to_string(),
    };
    assert!(too_short.validate().is_err());

    let ok = PasswordResetConfirm {
        token: "abc".to_string(),
        new_password: "a-long-enough-password".to_string(),
    };
    assert!(ok.validate().is_ok());
}

#[test]
fn test_api_key_create_request_validation() {
    let unnamed = ApiKeyCreateRequest {
        name: "".to_string(),
        scopes: vec![],
        expires_in_days: None,
    };
    assert!(unnamed.validate().is_err());

    let ok = ApiKeyCreateRequest {
        name: "ingest-robot".to_string(),
        scopes: vec!["upload".to_string()],
        expires_in_days: Some(90),
    };
    assert!(ok.validate().is_ok());
}
