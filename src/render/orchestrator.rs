//! The render state machine.
//!
//! [`RenderOrchestrator::render`] is the one entry point a transport layer
//! calls. It owns the full sequence for a URL: validate, win the
//! single-flight gate, announce `processing`, acquire the shared browser,
//! open an isolated session and page, navigate, wait for content markers,
//! capture and store a screenshot, and tear everything down in a fixed order
//! (page, then session, then gate) no matter which step failed.
//!
//! Errors never escape: every outcome is folded into the uniform
//! [`RenderResponse`] envelope, and an admitted render emits exactly two
//! status events (`processing`, then `idle`) on every path.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;

use crate::broadcast::{StatusBroadcaster, StatusEventKind};
use crate::browser::stealth::StealthProfile;
use crate::browser::{BrowserLifecycleManager, BrowserSession, PageHandle};
use crate::config::RendererConfig;
use crate::error::{Error, Result};

use super::gate::{ProcessGate, ProcessStatus};
use super::readiness::ContentReadinessWaiter;
use super::screenshots::ScreenshotStore;

// ============================================================================
// Wire Types
// ============================================================================

/// A successful render's payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    /// Full page HTML at readiness.
    pub html: String,
    /// Screenshot path relative to the store root.
    pub screenshot: String,
    /// Wall-clock render duration in seconds.
    pub time_taken: f64,
    /// The URL that was rendered.
    pub url: String,
}

/// The uniform response envelope. Every render produces one; errors are
/// folded in rather than propagated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    /// Whether the render produced a result.
    pub success: bool,
    /// The payload; present iff `success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RenderResult>,
    /// Client-facing error message; present iff `!success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderResponse {
    /// Wraps a successful result.
    #[must_use]
    pub fn ok(data: RenderResult) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Wraps a failure message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// RenderOrchestrator
// ============================================================================

/// Drives renders end to end, one at a time.
pub struct RenderOrchestrator {
    /// Render behavior knobs.
    config: RendererConfig,
    /// Single-flight admission.
    gate: ProcessGate,
    /// Owns the shared browser process.
    manager: Arc<BrowserLifecycleManager>,
    /// Status fan-out for observers.
    broadcaster: StatusBroadcaster,
    /// Screenshot storage.
    screenshots: ScreenshotStore,
    /// Content readiness wait.
    readiness: ContentReadinessWaiter,
}

impl RenderOrchestrator {
    /// Creates an orchestrator over the given browser manager and status
    /// broadcaster.
    #[must_use]
    pub fn new(
        config: RendererConfig,
        manager: Arc<BrowserLifecycleManager>,
        broadcaster: StatusBroadcaster,
    ) -> Self {
        let screenshots =
            ScreenshotStore::new(&config.screenshot_root, config.screenshot_retention);
        let readiness =
            ContentReadinessWaiter::new(config.markers.clone(), config.readiness_timeout);
        Self {
            config,
            gate: ProcessGate::new(),
            manager,
            broadcaster,
            screenshots,
            readiness,
        }
    }

    /// Current externally visible status.
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        self.gate.status()
    }

    /// Renders one URL.
    ///
    /// Rejections (bad URL, busy) return a failure envelope without touching
    /// the browser or emitting status events. An admitted render emits
    /// `processing` before work starts and `idle` after teardown, on success
    /// and failure alike.
    pub async fn render(&self, url: &str) -> RenderResponse {
        if let Err(e) = validate_url(url) {
            info!(url, error = %e, "Render request rejected");
            return RenderResponse::failure(e.to_string());
        }

        let Some(permit) = self.gate.try_begin() else {
            info!(url, "Render request rejected, renderer busy");
            return RenderResponse::failure(Error::Busy.to_string());
        };

        self.broadcaster
            .push(StatusEventKind::Status(ProcessStatus::Processing));
        info!(url, "Render started");

        let outcome = self.run_render(url).await;

        match &outcome {
            Ok(result) => {
                info!(
                    url,
                    time_taken = result.time_taken,
                    screenshot = %result.screenshot,
                    "Render complete"
                );
                self.manager.note_render_finished().await;
            }
            Err(e) => {
                error!(url, error = %e, "Render failed");
                if e.is_browser_error() {
                    // The handle may be wedged in an unknown state; the next
                    // render gets a fresh process.
                    self.manager.release("render failure").await;
                }
            }
        }

        // Broadcast before reopening the gate: a request admitted in between
        // would otherwise push its `processing` ahead of this `idle`.
        self.broadcaster
            .push(StatusEventKind::Status(ProcessStatus::Idle));
        permit.release();

        match outcome {
            Ok(result) => RenderResponse::ok(result),
            Err(e) => RenderResponse::failure(e.to_string()),
        }
    }

    /// The admitted-render body: browser, session, page, teardown.
    async fn run_render(&self, url: &str) -> Result<RenderResult> {
        let browser = self.manager.acquire().await?;
        let profile = StealthProfile::randomized();
        let session = browser.new_session(&profile).await?;

        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                close_session(session.as_ref()).await;
                return Err(e);
            }
        };

        let outcome = self.drive_page(url, page.as_ref()).await;

        // Fixed teardown order: page, then session. Each failure is logged
        // and swallowed so one cannot mask the render outcome or skip the
        // other.
        if let Err(e) = page.close().await {
            warn!(url, error = %e, "Failed to close page");
        }
        close_session(session.as_ref()).await;

        outcome
    }

    /// Navigate, wait for content, capture.
    async fn drive_page(&self, url: &str, page: &dyn PageHandle) -> Result<RenderResult> {
        let started = Instant::now();

        page.navigate(url, self.config.navigation_timeout).await?;
        let html = self.readiness.wait_for_content(page).await?;
        let png = page.screenshot_png().await?;
        let shot = self.screenshots.save(url, &png).await?;

        Ok(RenderResult {
            html,
            screenshot: shot.relative,
            time_taken: started.elapsed().as_secs_f64(),
            url: url.to_string(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Rejects empty and non-HTTP URLs with the exact client-facing messages.
fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::validation("URL is required"));
    }
    let parsed = Url::parse(url).map_err(|_| Error::validation("URL is invalid"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation("URL is invalid"));
    }
    Ok(())
}

async fn close_session(session: &dyn BrowserSession) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close browser session");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;
    use tokio::sync::mpsc;

    use super::*;
    use crate::browser::{Browser, BrowserLauncher};
    use crate::config::RotationPolicy;

    // ------------------------------------------------------------------
    // Stub browser stack
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct Behavior {
        fail_navigate: bool,
        fail_screenshot: bool,
        /// When set, navigate blocks until notified.
        hold_navigation: Option<Arc<Notify>>,
    }

    #[derive(Default)]
    struct Counters {
        pages_closed: AtomicU32,
        sessions_closed: AtomicU32,
        navigations: AtomicU32,
    }

    struct StubPage {
        behavior: Arc<Behavior>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl PageHandle for StubPage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            self.counters.navigations.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.behavior.hold_navigation {
                hold.notified().await;
            }
            if self.behavior.fail_navigate {
                return Err(Error::navigation("net::ERR_NAME_NOT_RESOLVED"));
            }
            Ok(())
        }

        async fn evaluate(&self, _script: &str, _timeout: Duration) -> Result<Value> {
            Ok(Value::String("<html><body>配送</body></html>".to_string()))
        }

        async fn screenshot_png(&self) -> Result<Vec<u8>> {
            if self.behavior.fail_screenshot {
                return Err(Error::ConnectionClosed);
            }
            Ok(b"\x89PNG-stub".to_vec())
        }

        async fn close(&self) -> Result<()> {
            self.counters.pages_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubSession {
        behavior: Arc<Behavior>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
            Ok(Arc::new(StubPage {
                behavior: Arc::clone(&self.behavior),
                counters: Arc::clone(&self.counters),
            }))
        }

        async fn close(&self) -> Result<()> {
            self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubBrowser {
        alive: AtomicBool,
        behavior: Arc<Behavior>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Browser for StubBrowser {
        async fn new_session(&self, _profile: &StealthProfile) -> Result<Arc<dyn BrowserSession>> {
            Ok(Arc::new(StubSession {
                behavior: Arc::clone(&self.behavior),
                counters: Arc::clone(&self.counters),
            }))
        }

        async fn close(&self) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    struct StubLauncher {
        launches: AtomicU32,
        behavior: Arc<Behavior>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BrowserLauncher for StubLauncher {
        async fn launch(&self) -> Result<Arc<dyn Browser>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubBrowser {
                alive: AtomicBool::new(true),
                behavior: Arc::clone(&self.behavior),
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        orchestrator: Arc<RenderOrchestrator>,
        launcher: Arc<StubLauncher>,
        counters: Arc<Counters>,
        manager: Arc<BrowserLifecycleManager>,
        broadcaster: StatusBroadcaster,
        events: mpsc::UnboundedReceiver<crate::broadcast::StatusEvent>,
        _registration: crate::broadcast::Registration,
        _shots: tempfile::TempDir,
    }

    fn harness(behavior: Behavior) -> Harness {
        crate::init_test_logging();

        let behavior = Arc::new(behavior);
        let counters = Arc::new(Counters::default());
        let launcher = Arc::new(StubLauncher {
            launches: AtomicU32::new(0),
            behavior,
            counters: Arc::clone(&counters),
        });
        let manager = Arc::new(BrowserLifecycleManager::new(
            Arc::clone(&launcher) as Arc<dyn BrowserLauncher>,
            RotationPolicy::disabled(),
        ));

        let broadcaster = StatusBroadcaster::new();
        let (tx, events) = mpsc::unbounded_channel();
        let registration = broadcaster.register(Arc::new(tx));

        let shots = tempfile::tempdir().expect("tempdir");
        let config = RendererConfig::new().with_screenshot_root(shots.path());

        let orchestrator = Arc::new(RenderOrchestrator::new(
            config,
            Arc::clone(&manager),
            broadcaster.clone(),
        ));

        Harness {
            orchestrator,
            launcher,
            counters,
            manager,
            broadcaster,
            events,
            _registration: registration,
            _shots: shots,
        }
    }

    fn drain_statuses(
        events: &mut mpsc::UnboundedReceiver<crate::broadcast::StatusEvent>,
    ) -> Vec<ProcessStatus> {
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Some(status) = event.data {
                statuses.push(status);
            }
        }
        statuses
    }

    // ------------------------------------------------------------------
    // Validation and admission
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_url_is_rejected_before_the_browser() {
        let mut h = harness(Behavior::default());

        let response = h.orchestrator.render("").await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("URL is required"));
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 0);
        assert!(drain_statuses(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_non_http_url_is_rejected() {
        let h = harness(Behavior::default());

        for url in ["ftp://example.com", "not a url", "file:///etc/passwd"] {
            let response = h.orchestrator.render(url).await;
            assert!(!response.success, "{url} must be rejected");
            assert_eq!(response.error.as_deref(), Some("URL is invalid"));
        }
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_render_is_rejected_not_queued() {
        let hold = Arc::new(Notify::new());
        let h = harness(Behavior {
            hold_navigation: Some(Arc::clone(&hold)),
            ..Behavior::default()
        });

        let first = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move { orchestrator.render("https://example.com/a").await })
        };

        // Wait until the first render is inside navigate.
        while h.counters.navigations.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.orchestrator.status(), ProcessStatus::Processing);

        let second = h.orchestrator.render("https://example.com/b").await;
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("Process is not idle"));

        hold.notify_one();
        let first = first.await.expect("join");
        assert!(first.success);
        assert_eq!(h.orchestrator.status(), ProcessStatus::Idle);
        // Only the admitted render navigated.
        assert_eq!(h.counters.navigations.load(Ordering::SeqCst), 1);
    }

    // ------------------------------------------------------------------
    // Success path
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_successful_render_produces_full_result() {
        let mut h = harness(Behavior::default());

        let response = h.orchestrator.render("https://example.com/?id=item1").await;

        assert!(response.success, "error: {:?}", response.error);
        let data = response.data.expect("data");
        assert!(data.html.contains("配送"));
        assert_eq!(data.url, "https://example.com/?id=item1");
        assert!(data.time_taken >= 0.0);
        assert!(data.screenshot.ends_with("-item1.png"));

        assert_eq!(
            drain_statuses(&mut h.events),
            vec![ProcessStatus::Processing, ProcessStatus::Idle]
        );
        assert_eq!(h.counters.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.sessions_closed.load(Ordering::SeqCst), 1);
        assert!(h.manager.has_browser().await, "success must keep the browser");
    }

    #[tokio::test]
    async fn test_browser_is_reused_across_renders() {
        let h = harness(Behavior::default());

        for _ in 0..3 {
            assert!(h.orchestrator.render("https://example.com").await.success);
        }
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_event_is_pushed_before_the_gate_reopens() {
        // Records the gate status observed at the moment each event is
        // delivered: the `idle` event must go out while the gate is still
        // held, so no freshly admitted render can broadcast ahead of it.
        struct GateWatchingSink {
            orchestrator: Arc<RenderOrchestrator>,
            seen: parking_lot::Mutex<Vec<(&'static str, ProcessStatus)>>,
        }

        impl crate::broadcast::StatusSink for GateWatchingSink {
            fn send(&self, event: &crate::broadcast::StatusEvent) -> bool {
                self.seen
                    .lock()
                    .push((event.event_type, self.orchestrator.status()));
                true
            }
        }

        let h = harness(Behavior::default());
        let sink = Arc::new(GateWatchingSink {
            orchestrator: Arc::clone(&h.orchestrator),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let _reg = h.broadcaster.register(Arc::clone(&sink) as _);

        assert!(h.orchestrator.render("https://example.com").await.success);

        let seen = sink.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("status", ProcessStatus::Processing),
                ("status", ProcessStatus::Processing),
            ],
            "both events must be delivered while the gate is held"
        );
        assert_eq!(h.orchestrator.status(), ProcessStatus::Idle);
    }

    // ------------------------------------------------------------------
    // Failure paths
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_navigation_failure_releases_browser_and_resets_gate() {
        let mut h = harness(Behavior {
            fail_navigate: true,
            ..Behavior::default()
        });

        let response = h.orchestrator.render("https://example.com").await;

        assert!(!response.success);
        assert!(
            response.error.as_deref().unwrap_or("").contains("Navigation failed"),
            "error: {:?}",
            response.error
        );

        // Teardown still ran in full.
        assert_eq!(h.counters.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.sessions_closed.load(Ordering::SeqCst), 1);
        assert!(!h.manager.has_browser().await, "failed render must release");
        assert_eq!(h.orchestrator.status(), ProcessStatus::Idle);
        assert_eq!(
            drain_statuses(&mut h.events),
            vec![ProcessStatus::Processing, ProcessStatus::Idle]
        );

        // The next render gets a fresh process.
        let _ = h.orchestrator.render("https://example.com").await;
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_screenshot_failure_is_folded_into_the_envelope() {
        let h = harness(Behavior {
            fail_screenshot: true,
            ..Behavior::default()
        });

        let response = h.orchestrator.render("https://example.com").await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Connection closed"));
        assert_eq!(h.orchestrator.status(), ProcessStatus::Idle);
    }

    // ------------------------------------------------------------------
    // Envelope shape
    // ------------------------------------------------------------------

    #[test]
    fn test_envelope_serialization() {
        let ok = RenderResponse::ok(RenderResult {
            html: "<html></html>".to_string(),
            screenshot: "2026-08-23/12-00-00-x.png".to_string(),
            time_taken: 1.25,
            url: "https://example.com".to_string(),
        });
        let json = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["timeTaken"], 1.25);
        assert!(json.get("error").is_none());

        let failed = RenderResponse::failure("Process is not idle");
        let json = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Process is not idle");
        assert!(json.get("data").is_none());
    }
}
