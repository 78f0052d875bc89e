//! Request and Response message types.
//!
//! Defines the message format for command requests and responses between
//! the renderer and the DevTools endpoint.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// A command request from local end to remote end.
///
/// # Format
///
/// ```json
/// {
///   "id": 7,
///   "method": "Page.navigate",
///   "params": { "url": "https://example.com" },
///   "sessionId": "ABCD"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Monotonic identifier for request/response correlation.
    pub id: u64,

    /// Page session the command targets; `None` for browser-wide commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Command with method and params.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a new request.
    #[inline]
    #[must_use]
    pub fn new(id: u64, session_id: Option<String>, command: Command) -> Self {
        Self {
            id,
            session_id,
            command,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response from remote end to local end.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": 7, "result": { ... }, "sessionId": "ABCD" }
/// ```
///
/// Error:
/// ```json
/// { "id": 7, "error": { "code": -32000, "message": "..." } }
/// ```
///
/// Events carry no `id`; deserializing one as a `Response` fails, which is
/// how the transport classifies incoming frames.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: u64,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload (if error).
    #[serde(default)]
    pub error: Option<ResponseError>,

    /// Session the response belongs to.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

impl Response {
    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, converting an error response to [`Error::Cdp`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cdp`] if the remote end reported an error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::Cdp {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// ResponseError
// ============================================================================

/// Error payload inside an error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    /// DevTools error code.
    pub code: i64,
    /// DevTools error message.
    pub message: String,
}

// ============================================================================
// Helpers
// ============================================================================

/// Gets a string field out of a result value.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the field is missing or not a string.
pub(crate) fn require_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::protocol(format!("Expected string field `{key}` in response")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PageCommand;

    #[test]
    fn test_request_serialization() {
        let request = Request::new(
            3,
            Some("S1".to_string()),
            Command::Page(PageCommand::Navigate {
                url: "https://example.com".to_string(),
            }),
        );
        let json = serde_json::to_string(&request).expect("serialize");

        assert!(json.contains(r#""id":3"#));
        assert!(json.contains(r#""sessionId":"S1""#));
        assert!(json.contains(r#""method":"Page.navigate""#));
    }

    #[test]
    fn test_request_without_session_omits_field() {
        let request = Request::new(1, None, Command::Page(PageCommand::Enable));
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_success_response() {
        let json = r#"{"id":7,"result":{"targetId":"T1"}}"#;
        let response: Response = serde_json::from_str(json).expect("parse");

        assert!(!response.is_error());
        let result = response.into_result().expect("success");
        assert_eq!(require_str(&result, "targetId").expect("field"), "T1");
    }

    #[test]
    fn test_error_response() {
        let json = r#"{"id":7,"error":{"code":-32000,"message":"Target closed"}}"#;
        let response: Response = serde_json::from_str(json).expect("parse");

        assert!(response.is_error());
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "DevTools error -32000: Target closed");
    }

    #[test]
    fn test_event_frame_is_not_a_response() {
        let json = r#"{"method":"Page.loadEventFired","params":{"timestamp":1.0}}"#;
        assert!(serde_json::from_str::<Response>(json).is_err());
    }

    #[test]
    fn test_require_str_missing_field() {
        let value = serde_json::json!({"other": 1});
        assert!(require_str(&value, "targetId").is_err());
    }
}
