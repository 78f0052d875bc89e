//! Command definitions organized by protocol domain.
//!
//! Only the DevTools verbs the renderer actually uses are modeled:
//!
//! | Domain | Commands |
//! |--------|----------|
//! | `Target` | Context/page lifecycle, session attach |
//! | `Page` | Enable, navigate, init scripts, screenshots |
//! | `Runtime` | Script evaluation |
//! | `Emulation` | Fingerprint overrides |
//! | `Browser` | Process shutdown |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by domain.
///
/// This enum wraps domain-specific command enums for unified serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Target domain commands.
    Target(TargetCommand),
    /// Page domain commands.
    Page(PageCommand),
    /// Runtime domain commands.
    Runtime(RuntimeCommand),
    /// Emulation domain commands.
    Emulation(EmulationCommand),
    /// Browser domain commands.
    Browser(BrowserCommand),
}

// ============================================================================
// Target Commands
// ============================================================================

/// Target domain commands for context and page lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum TargetCommand {
    /// Create an isolated browser context (one per render).
    #[serde(rename = "Target.createBrowserContext")]
    CreateBrowserContext {
        /// Tear the context down if the connection drops.
        #[serde(rename = "disposeOnDetach")]
        dispose_on_detach: bool,
    },

    /// Dispose a browser context and everything in it.
    #[serde(rename = "Target.disposeBrowserContext")]
    DisposeBrowserContext {
        /// Context to dispose.
        #[serde(rename = "browserContextId")]
        browser_context_id: String,
    },

    /// Create a page target inside a context.
    #[serde(rename = "Target.createTarget")]
    CreateTarget {
        /// Initial URL for the target.
        url: String,
        /// Owning context.
        #[serde(rename = "browserContextId")]
        browser_context_id: String,
    },

    /// Attach to a target, yielding a session for page-scoped commands.
    #[serde(rename = "Target.attachToTarget")]
    AttachToTarget {
        /// Target to attach to.
        #[serde(rename = "targetId")]
        target_id: String,
        /// Use flat session routing (`sessionId` on each message).
        flatten: bool,
    },

    /// Close a page target.
    #[serde(rename = "Target.closeTarget")]
    CloseTarget {
        /// Target to close.
        #[serde(rename = "targetId")]
        target_id: String,
    },
}

// ============================================================================
// Page Commands
// ============================================================================

/// Page domain commands.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum PageCommand {
    /// Enable page-domain events (load lifecycle).
    #[serde(rename = "Page.enable")]
    Enable,

    /// Navigate to a URL.
    #[serde(rename = "Page.navigate")]
    Navigate {
        /// URL to navigate to.
        url: String,
    },

    /// Register a script evaluated before any page script on new documents.
    #[serde(rename = "Page.addScriptToEvaluateOnNewDocument")]
    AddScriptToEvaluateOnNewDocument {
        /// Script source.
        source: String,
    },

    /// Capture a screenshot of the current viewport.
    #[serde(rename = "Page.captureScreenshot")]
    CaptureScreenshot {
        /// Image format ("png" or "jpeg").
        format: String,
    },
}

// ============================================================================
// Runtime Commands
// ============================================================================

/// Runtime domain commands for script evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum RuntimeCommand {
    /// Evaluate an expression in the page context.
    #[serde(rename = "Runtime.evaluate")]
    Evaluate {
        /// Expression to evaluate.
        expression: String,
        /// Await the expression if it evaluates to a Promise.
        #[serde(rename = "awaitPromise")]
        await_promise: bool,
        /// Serialize the result by value instead of by object reference.
        #[serde(rename = "returnByValue")]
        return_by_value: bool,
    },
}

// ============================================================================
// Emulation Commands
// ============================================================================

/// Emulation domain commands for per-session fingerprint overrides.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum EmulationCommand {
    /// Override the user agent and Accept-Language.
    #[serde(rename = "Emulation.setUserAgentOverride")]
    SetUserAgentOverride {
        /// User agent string.
        #[serde(rename = "userAgent")]
        user_agent: String,
        /// Accept-Language header value.
        #[serde(rename = "acceptLanguage")]
        accept_language: String,
    },

    /// Override viewport metrics.
    #[serde(rename = "Emulation.setDeviceMetricsOverride")]
    SetDeviceMetricsOverride {
        /// Viewport width in pixels.
        width: u32,
        /// Viewport height in pixels.
        height: u32,
        /// Device scale factor (0 disables the override).
        #[serde(rename = "deviceScaleFactor")]
        device_scale_factor: f64,
        /// Emulate a mobile device.
        mobile: bool,
    },

    /// Override the timezone.
    #[serde(rename = "Emulation.setTimezoneOverride")]
    SetTimezoneOverride {
        /// IANA timezone identifier.
        #[serde(rename = "timezoneId")]
        timezone_id: String,
    },

    /// Override the locale.
    #[serde(rename = "Emulation.setLocaleOverride")]
    SetLocaleOverride {
        /// ICU locale identifier.
        locale: String,
    },
}

// ============================================================================
// Browser Commands
// ============================================================================

/// Browser domain commands.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowserCommand {
    /// Gracefully close the browser process.
    #[serde(rename = "Browser.close")]
    Close,
}

// ============================================================================
// Tests
// ============================================================================
