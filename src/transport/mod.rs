//! WebSocket transport layer.
//!
//! Internal module handling the DevTools WebSocket connection: request
//! correlation, event waiters, and connection lifecycle.

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
