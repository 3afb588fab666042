use once_cell::sync::Lazy;
use regex::Regex;

/// Device classification parsed from a User-Agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

/// Rule-based User-Agent classifier for the session listing.
///
/// Unknown strings map to `Unknown`/`unknown` without raising. Order
/// matters: Edge and Opera embed `Chrome`, Chrome embeds `Safari`.
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_lowercase();

    let browser = if ua.contains("edg/") || ua.contains("edge/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox/") {
        "Firefox"
    } else if ua.contains("chrome/") {
        "Chrome"
    } else if ua.contains("safari/") {
        "Safari"
    } else if ua.contains("curl/") {
        "curl"
    } else {
        "Unknown"
    };

    let os = if ua.contains("windows nt") {
        "Windows"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    let device_type = if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else if ua.contains("ipad") || ua.contains("tablet") {
        "tablet"
    } else if browser == "Unknown" && os == "Unknown" {
        "unknown"
    } else {
        "desktop"
    };

    DeviceInfo {
        browser: browser.to_string(),
        os: os.to_string(),
        device_type: device_type.to_string(),
    }
}

/// Restrict a filename to `[A-Za-z0-9.-]` for object-store keys.
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if sanitized.trim_matches('-').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Rewrite an e-mail address to `x***@domain` for log emission.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('x');
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

static SENSITIVE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(password.*|token|refresh_?token|access_?token|api_?key|secret|mfa_?code|backup_?code|totp_?code)$",
    )
    .expect("sensitive field pattern is valid")
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("email pattern is valid")
});

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-csrf-token",
];

/// Whether a header must be redacted before logging.
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Whether a body field name must be redacted before logging.
pub fn is_sensitive_field(name: &str) -> bool {
    SENSITIVE_FIELD.is_match(name)
}

/// Redact a JSON value for log emission: sensitive fields are replaced
/// with `[REDACTED]`, e-mail addresses inside strings are masked.
pub fn redact_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(key, val)| {
                    if is_sensitive_field(key) {
                        (key.clone(), serde_json::Value::String("[REDACTED]".into()))
                    } else {
                        (key.clone(), redact_json(val))
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_json).collect())
        }
        serde_json::Value::String(s) => {
            let masked = EMAIL_PATTERN
                .replace_all(s, |caps: &regex::Captures<'_>| mask_email(&caps[0]));
            serde_json::Value::String(masked.into_owned())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_common_user_agents() {
        let chrome = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(chrome.browser, "Chrome");
        assert_eq!(chrome.os, "Windows");
        assert_eq!(chrome.device_type, "desktop");

        let iphone = parse_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(iphone.browser, "Safari");
        assert_eq!(iphone.os, "iOS");
        assert_eq!(iphone.device_type, "mobile");

        let unknown = parse_user_agent("some-robot/1.0");
        assert_eq!(unknown.browser, "Unknown");
        assert_eq!(unknown.os, "Unknown");
        assert_eq!(unknown.device_type, "unknown");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("Stadtwerke Rechnung März 2024.pdf"),
            "Stadtwerke-Rechnung-M-rz-2024.pdf"
        );
        assert_eq!(sanitize_filename("../../etc/passwd"), "..-..-etc-passwd");
        assert_eq!(sanitize_filename("???"), "upload");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("controller@example.com"), "c***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn test_sensitive_detection() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("x-csrf-token"));
        assert!(!is_sensitive_header("content-type"));

        assert!(is_sensitive_field("password"));
        assert!(is_sensitive_field("passwordConfirmation"));
        assert!(is_sensitive_field("refreshToken"));
        assert!(is_sensitive_field("totp_code"));
        assert!(!is_sensitive_field("amount"));
    }

    #[test]
    fn test_redact_json() {
        let input = json!({
            "email": "controller@example.com",
            "password": "hunter2",
            "nested": { "apiKey": "cwk_abc", "note": "contact admin@firm.de" },
            "amount": 42
        });

        let redacted = redact_json(&input);
        assert_eq!(redacted["email"], "c***@example.com");
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["nested"]["apiKey"], "[REDACTED]");
        assert_eq!(redacted["nested"]["note"], "contact a***@firm.de");
        assert_eq!(redacted["amount"], 42);
    }
}
