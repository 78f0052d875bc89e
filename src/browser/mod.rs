//! Browser entities: the shared browser handle, per-render sessions, pages.
//!
//! The traits here are the seam between the render orchestrator and the real
//! Chromium implementation ([`chromium`]): the orchestrator only ever talks
//! to `dyn Browser` / `dyn BrowserSession` / `dyn PageHandle`, so tests can
//! substitute stubs and count calls.
//!
//! Ownership rules:
//!
//! - The one live [`Browser`] is owned by [`BrowserLifecycleManager`]; it can
//!   be invalidated between renders (rotation, crash, signal), so callers
//!   must re-acquire it per render, never cache it.
//! - A [`BrowserSession`] is an isolated context created for exactly one
//!   render and destroyed unconditionally at the end of that render.
//! - A [`PageHandle`] lives inside one session; closed before its session.

// ============================================================================
// Submodules
// ============================================================================

/// Chromium process + CDP implementation of the browser traits.
pub mod chromium;

/// Browser lifecycle manager (lazy launch, rotation, release, signals).
pub mod manager;

/// Per-session anti-fingerprinting profile.
pub mod stealth;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use stealth::StealthProfile;

// ============================================================================
// Re-exports
// ============================================================================

pub use chromium::{ChromiumBrowser, ChromiumLauncher};
pub use manager::BrowserLifecycleManager;

// ============================================================================
// Browser Traits
// ============================================================================

/// Launches browser processes.
///
/// The lifecycle manager holds one launcher and calls it whenever it needs
/// a fresh handle.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launches a browser and returns a live handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails to start or the DevTools
    /// endpoint does not come up within the launch timeout.
    async fn launch(&self) -> Result<Arc<dyn Browser>>;
}

/// A live handle to a launched browser process.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Creates an isolated session (browser context) for one render.
    ///
    /// The fingerprint profile is applied to every page created from the
    /// session.
    async fn new_session(&self, profile: &StealthProfile) -> Result<Arc<dyn BrowserSession>>;

    /// Closes the browser and its process.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the browser process is reachable.
    fn is_alive(&self) -> bool;
}

/// An isolated per-render browser context.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Opens a page inside this session.
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// Disposes the session and everything in it.
    async fn close(&self) -> Result<()>;
}

/// A page inside a session.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigates to a URL and waits for DOMContentLoaded, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluates a script in the page, awaiting it if it returns a Promise.
    async fn evaluate(&self, script: &str, timeout: Duration) -> Result<Value>;

    /// Captures a PNG screenshot of the viewport.
    async fn screenshot_png(&self) -> Result<Vec<u8>>;

    /// Closes the page.
    async fn close(&self) -> Result<()>;
}
