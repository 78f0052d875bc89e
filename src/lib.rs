//! Single-flight URL rendering on headless Chromium.
//!
//! The crate loads a URL in a browser it manages itself, waits until the
//! page's dynamic content is actually present (marker text observed via a
//! `MutationObserver`), and returns the HTML together with a stored
//! screenshot and the render duration. One render runs at a time; concurrent
//! requests are rejected, never queued. Observers can subscribe to
//! `processing`/`idle` transitions.
//!
//! # Architecture
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | Orchestration | [`render`] | admission gate, render state machine, envelope |
//! | Fan-out | [`broadcast`] | status events to registered observers |
//! | Browser | [`browser`] | process lifecycle, sessions, stealth profiles |
//! | Protocol | [`protocol`] | DevTools message types |
//! | Transport | [`transport`] | WebSocket connection and event loop |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use url_renderer::{
//!     BrowserLifecycleManager, ChromiumLauncher, LaunchOptions, RendererConfig,
//!     RenderOrchestrator, RotationPolicy, StatusBroadcaster,
//! };
//!
//! let launcher = Arc::new(ChromiumLauncher::new(LaunchOptions::new()));
//! let manager = Arc::new(BrowserLifecycleManager::new(launcher, RotationPolicy::default()));
//! manager.spawn_signal_handler();
//!
//! let broadcaster = StatusBroadcaster::new();
//! let orchestrator = RenderOrchestrator::new(RendererConfig::new(), manager, broadcaster);
//!
//! let response = orchestrator.render("https://example.com/item?id=123").await;
//! ```

// ============================================================================
// Modules
// ============================================================================

/// Status event fan-out to registered observers.
pub mod broadcast;

/// Browser process lifecycle, sessions, and stealth profiles.
pub mod browser;

/// Configuration types.
pub mod config;

/// Error types.
pub mod error;

/// DevTools protocol message types.
pub mod protocol;

/// The render pipeline.
pub mod render;

/// WebSocket transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use broadcast::{Registration, StatusBroadcaster, StatusEvent, StatusEventKind, StatusSink};
pub use browser::{
    Browser, BrowserLauncher, BrowserLifecycleManager, BrowserSession, ChromiumBrowser,
    ChromiumLauncher, PageHandle,
};
pub use browser::stealth::StealthProfile;
pub use config::{LaunchOptions, RendererConfig, RotationPolicy};
pub use error::{Error, Result};
pub use render::{
    ContentReadinessWaiter, ProcessGate, ProcessStatus, RenderOrchestrator, RenderResponse,
    RenderResult, ScreenshotStore,
};

// ============================================================================
// Test Support
// ============================================================================

/// Initialize tracing for tests.
///
/// Safe to call from every test; only the first call installs a subscriber.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("url_renderer=debug"))
        .with_target(false)
        .with_test_writer()
        .try_init();
}
