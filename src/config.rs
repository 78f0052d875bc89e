//! Renderer configuration.
//!
//! Three knobs live here:
//!
//! - [`RendererConfig`] — per-render behavior (markers, timeouts, screenshot
//!   layout)
//! - [`LaunchOptions`] — how the Chromium process is started
//! - [`RotationPolicy`] — when the shared browser is deliberately replaced
//!
//! # Example
//!
//! ```ignore
//! use url_renderer::RendererConfig;
//!
//! let config = RendererConfig::new()
//!     .with_markers(["配送", "商品详情"])
//!     .with_navigation_timeout(Duration::from_secs(50));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Bound on `Page.navigate` plus the load-event wait (50s).
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(50);

/// In-page content-readiness timeout (30s). Not an error when it elapses.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on process spawn + DevTools endpoint discovery + WebSocket connect.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Screenshot partitions older than this are pruned before each capture.
pub const DEFAULT_SCREENSHOT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// RendererConfig
// ============================================================================

/// Per-render configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Marker strings whose presence in the page's visible text signals
    /// that dynamic content has finished loading.
    pub markers: Vec<String>,

    /// Maximum time for navigation (goto + DOMContentLoaded).
    pub navigation_timeout: Duration,

    /// Maximum time the in-page readiness waiter observes for markers.
    pub readiness_timeout: Duration,

    /// Root directory for date-partitioned screenshot output.
    pub screenshot_root: PathBuf,

    /// Retention window for screenshot partitions.
    pub screenshot_retention: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            markers: vec!["配送".to_string(), "商品详情".to_string()],
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            screenshot_root: PathBuf::from("screenshots"),
            screenshot_retention: DEFAULT_SCREENSHOT_RETENTION,
        }
    }
}

impl RendererConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content-readiness marker set.
    #[inline]
    #[must_use]
    pub fn with_markers(mut self, markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the navigation timeout.
    #[inline]
    #[must_use]
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Sets the readiness timeout.
    #[inline]
    #[must_use]
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Sets the screenshot root directory.
    #[inline]
    #[must_use]
    pub fn with_screenshot_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.screenshot_root = root.into();
        self
    }

    /// Sets the screenshot retention window.
    #[inline]
    #[must_use]
    pub fn with_screenshot_retention(mut self, retention: Duration) -> Self {
        self.screenshot_retention = retention;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if a timeout is zero or the marker set is
    /// empty (an empty set would force every render to wait out the full
    /// readiness timeout).
    pub fn validate(&self) -> Result<(), String> {
        if self.markers.is_empty() {
            return Err("At least one readiness marker is required".to_string());
        }
        if self.navigation_timeout.is_zero() || self.readiness_timeout.is_zero() {
            return Err("Timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// LaunchOptions
// ============================================================================

/// Chromium process launch configuration.
///
/// The fixed flag set disables sandboxing (required for containerized
/// execution) and zygote forking (so killing the child kills the whole
/// browser, never leaving zombie renderers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Path to the Chromium binary executable.
    pub binary: PathBuf,

    /// Run without a visible window.
    pub headless: bool,

    /// Maximum time for the browser to come up and accept a connection.
    pub launch_timeout: Duration,

    /// Additional custom command-line arguments.
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("chromium"),
            headless: true,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    /// Creates launch options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Chromium binary path.
    #[inline]
    #[must_use]
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = path.into();
        self
    }

    /// Disables headless mode (visible window, debugging only).
    #[inline]
    #[must_use]
    pub fn with_headful(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Sets the launch timeout.
    #[inline]
    #[must_use]
    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Adds a custom command-line argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Converts options to Chromium command-line arguments.
    ///
    /// `user_data_dir` is the throwaway profile directory for this process.
    #[must_use]
    pub fn to_args(&self, user_data_dir: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(12 + self.extra_args.len());

        if self.headless {
            args.push("--headless=new".to_string());
        }

        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
        args.push("--disable-dev-shm-usage".to_string());
        args.push("--no-zygote".to_string());
        args.push("--disable-gpu".to_string());
        args.push("--no-first-run".to_string());
        args.push("--no-default-browser-check".to_string());
        args.push("--remote-debugging-port=0".to_string());
        args.push(format!("--user-data-dir={}", user_data_dir.display()));

        args.extend(self.extra_args.clone());
        args.push("about:blank".to_string());
        args
    }
}

// ============================================================================
// RotationPolicy
// ============================================================================

/// Policy for deliberate periodic replacement of the browser process.
///
/// Rotation defeats long-lived-process fingerprinting and bounds memory
/// growth. It is a policy knob, not a correctness requirement; the manager
/// only rotates between renders, never mid-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate after this many completed renders.
    pub max_renders: Option<u32>,

    /// Rotate once the handle is older than this.
    pub max_age: Option<Duration>,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_renders: Some(20),
            max_age: Some(Duration::from_secs(30 * 60)),
        }
    }
}

impl RotationPolicy {
    /// Disables rotation entirely.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_renders: None,
            max_age: None,
        }
    }

    /// Returns `true` if a handle with the given stats should be rotated.
    #[must_use]
    pub fn should_rotate(&self, completed_renders: u32, age: Duration) -> bool {
        if let Some(max) = self.max_renders
            && completed_renders >= max
        {
            return true;
        }
        if let Some(max) = self.max_age
            && age >= max
        {
            return true;
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
