use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Contextual metadata attached to every [`super::Error`].
///
/// `error_id` is generated per error instance; `request_id` is copied from
/// the request that triggered the failure so operators can correlate the API
/// response, the log line, and the audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_id: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub trace: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            request_id: None,
            timestamp: Utc::now(),
            trace: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn add_trace(mut self, trace: String) -> Self {
        self.trace.push(trace);
        self
    }

    pub fn add_metadata(&mut self, key: String, value: serde_json::Value) {
        self.metadata.insert(key, value);
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}
