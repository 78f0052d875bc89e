//! Chrome DevTools Protocol message types.
//!
//! This module defines the message format for communication between the
//! renderer (local end) and the Chromium DevTools endpoint (remote end).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Request`] | Local → Remote | Command request |
//! | [`Response`] | Remote → Local | Command response |
//! | [`Event`] | Remote → Local | Browser notification |
//!
//! # Command Naming
//!
//! Commands follow the `Domain.methodName` format:
//!
//! - `Target.createBrowserContext`
//! - `Page.navigate`
//! - `Runtime.evaluate`
//!
//! Commands issued against a specific page carry a `sessionId`; browser-wide
//! commands (target management, browser shutdown) do not.

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions organized by protocol domain.
pub mod command;

/// Event message types.
pub mod event;

/// Request and Response types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    BrowserCommand, Command, EmulationCommand, PageCommand, RuntimeCommand, TargetCommand,
};
pub use event::Event;
pub use request::{Request, Response, ResponseError};
