//! Event message types.
//!
//! Events are unsolicited notifications from the browser (load lifecycle,
//! target lifecycle). They carry a `method` and no `id`.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Event
// ============================================================================

/// An event notification from the browser.
///
/// # Format
///
/// ```json
/// {
///   "method": "Page.domContentEventFired",
///   "params": { "timestamp": 349470.186 },
///   "sessionId": "ABCD"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Event name in `Domain.eventName` format.
    pub method: String,

    /// Event payload.
    #[serde(default)]
    pub params: Value,

    /// Session the event originated from, if page-scoped.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

impl Event {
    /// Returns `true` if this event matches a method and optional session.
    ///
    /// A `None` session filter only matches browser-wide events, mirroring
    /// how commands are addressed.
    #[must_use]
    pub fn matches(&self, method: &str, session_id: Option<&str>) -> bool {
        self.method == method && self.session_id.as_deref() == session_id
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parse() {
        let json = r#"{"method":"Page.domContentEventFired","params":{"timestamp":1.5},"sessionId":"S1"}"#;
        let event: Event = serde_json::from_str(json).expect("parse");

        assert_eq!(event.method, "Page.domContentEventFired");
        assert_eq!(event.session_id.as_deref(), Some("S1"));
    }

    #[test]
    fn test_event_matches_session_filter() {
        let event: Event =
            serde_json::from_str(r#"{"method":"Page.loadEventFired","sessionId":"S1"}"#)
                .expect("parse");

        assert!(event.matches("Page.loadEventFired", Some("S1")));
        assert!(!event.matches("Page.loadEventFired", Some("S2")));
        assert!(!event.matches("Page.loadEventFired", None));
        assert!(!event.matches("Page.domContentEventFired", Some("S1")));
    }

    #[test]
    fn test_event_params_default_to_null() {
        let event: Event =
            serde_json::from_str(r#"{"method":"Target.targetCrashed"}"#).expect("parse");
        assert!(event.params.is_null());
        assert!(event.session_id.is_none());
    }
}
