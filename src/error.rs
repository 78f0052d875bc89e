//! Error types for the URL renderer.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Request rejection | [`Error::Validation`], [`Error::Busy`] |
//! | Browser lifecycle | [`Error::Launch`], [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Cdp`] |
//! | Rendering | [`Error::Navigation`], [`Error::Script`], [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Rejections ([`Error::Validation`], [`Error::Busy`]) are produced before any
//! browser interaction; everything else can poison the shared browser handle
//! and is treated as a release trigger by the orchestrator.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Request Rejection
    // ========================================================================
    /// Request input is missing or malformed.
    ///
    /// The message is the exact client-facing text ("URL is required",
    /// "URL is invalid").
    #[error("{message}")]
    Validation {
        /// Client-facing rejection message.
        message: String,
    },

    /// Another render is already in flight.
    ///
    /// Single-flight admission control: the request is rejected, never queued.
    #[error("Process is not idle")]
    Busy,

    // ========================================================================
    // Browser Lifecycle Errors
    // ========================================================================
    /// Failed to launch the Chromium process.
    #[error("Failed to launch Chromium: {message}")]
    Launch {
        /// Description of the launch failure.
        message: String,
    },

    /// DevTools WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// DevTools connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected response shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error response from the DevTools endpoint.
    #[error("DevTools error {code}: {message}")]
    Cdp {
        /// DevTools error code.
        code: i64,
        /// DevTools error message.
        message: String,
    },

    // ========================================================================
    // Rendering Errors
    // ========================================================================
    /// Navigation failed (DNS failure, network error, page crash).
    #[error("Navigation failed: {message}")]
    Navigation {
        /// Error text reported by the browser.
        message: String,
    },

    /// In-page script evaluation failed.
    #[error("Script error: {message}")]
    Script {
        /// Error message from script execution.
        message: String,
    },

    /// Operation exceeded its timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a validation rejection with the exact client-facing message.
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a launch failure error.
    #[inline]
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a navigation error.
    #[inline]
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
        }
    }

    /// Creates a script error.
    #[inline]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a pre-browser rejection.
    ///
    /// Rejections are reported to the client without ever touching the
    /// browser, so they must not trigger a handle release.
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Busy)
    }

    /// Returns `true` if the shared browser handle should be treated as
    /// poisoned after this error.
    #[inline]
    #[must_use]
    pub fn is_browser_error(&self) -> bool {
        !self.is_rejection()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_busy_display_is_exact_wire_message() {
        assert_eq!(Error::Busy.to_string(), "Process is not idle");
    }

    #[test]
    fn test_validation_display_is_bare_message() {
        let err = Error::validation("URL is required");
        assert_eq!(err.to_string(), "URL is required");
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("navigation", 50_000);
        assert_eq!(err.to_string(), "Timeout after 50000ms: navigation");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_is_rejection() {
        assert!(Error::Busy.is_rejection());
        assert!(Error::validation("URL is invalid").is_rejection());
        assert!(!Error::navigation("net::ERR_NAME_NOT_RESOLVED").is_rejection());
    }

    #[test]
    fn test_is_browser_error() {
        assert!(Error::ConnectionClosed.is_browser_error());
        assert!(Error::navigation("crash").is_browser_error());
        assert!(Error::timeout("readiness", 30_000).is_browser_error());
        assert!(!Error::Busy.is_browser_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "no chromium");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
