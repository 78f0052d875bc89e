//! Chromium process management and CDP implementation of the browser traits.
//!
//! Each [`ChromiumBrowser`] owns:
//! - One Chromium process (child process, killed on drop)
//! - One DevTools WebSocket connection
//! - One throwaway user-data directory
//!
//! The launch sequence is: spawn the process with the fixed flag set, scrape
//! the `DevTools listening on ws://…` line from stderr, connect. The whole
//! sequence is bounded by [`LaunchOptions::launch_timeout`]; on timeout the
//! half-started process is killed rather than leaked.

// ============================================================================
// Imports
// ============================================================================

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::config::LaunchOptions;
use crate::error::{Error, Result};
use crate::protocol::request::require_str;
use crate::protocol::{
    BrowserCommand, Command as Cdp, EmulationCommand, PageCommand, RuntimeCommand, TargetCommand,
};
use crate::transport::Connection;

use super::stealth::StealthProfile;
use super::{Browser, BrowserLauncher, BrowserSession, PageHandle};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of the stderr line announcing the DevTools endpoint.
const DEVTOOLS_LINE_PREFIX: &str = "DevTools listening on ";

/// Bound on the graceful `Browser.close` before the process is killed anyway.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards a child process and ensures it is killed when dropped.
struct ProcessGuard {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    /// Creates a new process guard.
    fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Takes the child out of the guard, disarming its `Drop`.
    fn take(&mut self) -> Option<(Child, u32)> {
        self.child.take().map(|child| (child, self.pid))
    }

    /// Kills the process and waits for it to exit.
    async fn kill(&mut self) {
        if let Some((child, pid)) = self.take() {
            kill_child(child, pid).await;
        }
    }
}

/// Kills a child process and waits for it to exit.
async fn kill_child(mut child: Child, pid: u32) {
    debug!(pid, "Killing Chromium process");
    if let Err(e) = child.kill().await {
        debug!(pid, error = %e, "Failed to kill process");
    }
    if let Err(e) = child.wait().await {
        debug!(pid, error = %e, "Failed to wait for process");
    }
    info!(pid, "Process terminated");
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// ChromiumLauncher
// ============================================================================

/// Launches [`ChromiumBrowser`] instances from a fixed [`LaunchOptions`].
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    /// Launch configuration.
    options: LaunchOptions,
}

impl ChromiumLauncher {
    /// Creates a launcher with the given options.
    #[inline]
    #[must_use]
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>> {
        let browser = ChromiumBrowser::launch(&self.options).await?;
        Ok(browser as Arc<dyn Browser>)
    }
}

// ============================================================================
// ChromiumBrowser
// ============================================================================

/// A handle to a launched Chromium process.
pub struct ChromiumBrowser {
    /// DevTools connection.
    connection: Connection,
    /// Protected process handle.
    process: Mutex<ProcessGuard>,
    /// Throwaway profile directory, removed when the handle drops.
    _user_data_dir: TempDir,
}

impl ChromiumBrowser {
    /// Launches a Chromium process and connects to its DevTools endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Launch`] if the process fails to spawn or exits early
    /// - [`Error::Timeout`] if the endpoint does not come up in time
    /// - [`Error::Connection`] if the WebSocket handshake fails
    pub async fn launch(options: &LaunchOptions) -> Result<Arc<Self>> {
        let user_data_dir = tempfile::Builder::new()
            .prefix("url-renderer-")
            .tempdir()
            .map_err(|e| Error::launch(format!("user data dir: {e}")))?;

        let mut cmd = Command::new(&options.binary);
        cmd.args(options.to_args(user_data_dir.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::launch(e.to_string()))?;
        let pid = child.id();
        info!(pid, binary = %options.binary.display(), "Chromium process spawned");

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::launch("stderr not captured"))?;

        let launch_timeout = options.launch_timeout;
        let connection = match timeout(launch_timeout, Self::connect(stderr)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                let mut guard = ProcessGuard::new(child);
                guard.kill().await;
                return Err(e);
            }
            Err(_) => {
                let mut guard = ProcessGuard::new(child);
                guard.kill().await;
                return Err(Error::timeout(
                    "browser launch",
                    launch_timeout.as_millis() as u64,
                ));
            }
        };

        Ok(Arc::new(Self {
            connection,
            process: Mutex::new(ProcessGuard::new(child)),
            _user_data_dir: user_data_dir,
        }))
    }

    /// Scrapes the DevTools endpoint from stderr and connects to it.
    async fn connect(stderr: ChildStderr) -> Result<Connection> {
        let mut lines = BufReader::new(stderr).lines();

        let ws_url = loop {
            match lines.next_line().await? {
                Some(line) => {
                    trace!(line = %line, "Chromium stderr");
                    if let Some(rest) = line.trim().strip_prefix(DEVTOOLS_LINE_PREFIX) {
                        break rest.trim().to_string();
                    }
                }
                None => {
                    return Err(Error::launch(
                        "process exited before announcing DevTools endpoint",
                    ));
                }
            }
        };

        debug!(url = %ws_url, "DevTools endpoint discovered");

        // Keep draining stderr so the pipe buffer never blocks the browser.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(line = %line, "Chromium stderr");
            }
        });

        Connection::connect(&ws_url).await
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_session(&self, profile: &StealthProfile) -> Result<Arc<dyn BrowserSession>> {
        let result = self
            .connection
            .send(
                None,
                Cdp::Target(TargetCommand::CreateBrowserContext {
                    dispose_on_detach: true,
                }),
            )
            .await?;
        let context_id = require_str(&result, "browserContextId")?;
        debug!(context_id = %context_id, "Browser context created");

        Ok(Arc::new(ChromiumSession {
            connection: self.connection.clone(),
            context_id,
            profile: profile.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        // Graceful first, so Chromium flushes its profile; the guard kill is
        // the backstop.
        let graceful = self
            .connection
            .send_with_timeout(
                None,
                Cdp::Browser(BrowserCommand::Close),
                GRACEFUL_CLOSE_TIMEOUT,
            )
            .await;
        if let Err(e) = graceful {
            debug!(error = %e, "Graceful Browser.close failed");
        }

        self.connection.shutdown();

        // Take the child out under the lock; kill it without holding the lock
        // across an await point.
        let child = self.process.lock().take();
        if let Some((child, pid)) = child {
            kill_child(child, pid).await;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }
}

// ============================================================================
// ChromiumSession
// ============================================================================

/// An isolated browser context for one render.
struct ChromiumSession {
    /// Shared DevTools connection.
    connection: Connection,
    /// Context identifier.
    context_id: String,
    /// Fingerprint profile applied to pages created from this session.
    profile: StealthProfile,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        let result = self
            .connection
            .send(
                None,
                Cdp::Target(TargetCommand::CreateTarget {
                    url: "about:blank".to_string(),
                    browser_context_id: self.context_id.clone(),
                }),
            )
            .await?;
        let target_id = require_str(&result, "targetId")?;

        let result = self
            .connection
            .send(
                None,
                Cdp::Target(TargetCommand::AttachToTarget {
                    target_id: target_id.clone(),
                    flatten: true,
                }),
            )
            .await?;
        let session_id = require_str(&result, "sessionId")?;
        debug!(target_id = %target_id, session_id = %session_id, "Page attached");

        let page = ChromiumPage {
            connection: self.connection.clone(),
            target_id,
            session_id,
        };
        page.apply_profile(&self.profile).await?;

        Ok(Arc::new(page))
    }

    async fn close(&self) -> Result<()> {
        debug!(context_id = %self.context_id, "Disposing browser context");
        self.connection
            .send(
                None,
                Cdp::Target(TargetCommand::DisposeBrowserContext {
                    browser_context_id: self.context_id.clone(),
                }),
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// ChromiumPage
// ============================================================================

/// A page target attached via a flat session.
struct ChromiumPage {
    /// Shared DevTools connection.
    connection: Connection,
    /// Target identifier (used for closing).
    target_id: String,
    /// Session identifier (used for page-scoped commands).
    session_id: String,
}

impl ChromiumPage {
    /// Sends a page-scoped command.
    async fn send(&self, command: Cdp) -> Result<Value> {
        self.connection.send(Some(&self.session_id), command).await
    }

    /// Applies the fingerprint profile before any navigation happens.
    async fn apply_profile(&self, profile: &StealthProfile) -> Result<()> {
        self.send(Cdp::Page(PageCommand::Enable)).await?;
        self.send(Cdp::Page(PageCommand::AddScriptToEvaluateOnNewDocument {
            source: profile.init_script(),
        }))
        .await?;
        self.send(Cdp::Emulation(EmulationCommand::SetUserAgentOverride {
            user_agent: profile.user_agent.clone(),
            accept_language: profile.accept_language.clone(),
        }))
        .await?;
        self.send(Cdp::Emulation(EmulationCommand::SetDeviceMetricsOverride {
            width: profile.viewport.0,
            height: profile.viewport.1,
            device_scale_factor: 1.0,
            mobile: false,
        }))
        .await?;
        self.send(Cdp::Emulation(EmulationCommand::SetTimezoneOverride {
            timezone_id: profile.timezone.clone(),
        }))
        .await?;
        self.send(Cdp::Emulation(EmulationCommand::SetLocaleOverride {
            locale: profile.locale.clone(),
        }))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn navigate(&self, url: &str, nav_timeout: Duration) -> Result<()> {
        debug!(url = %url, session_id = %self.session_id, "Navigating");
        let started = Instant::now();

        let nav_fut = self.connection.send_with_timeout(
            Some(&self.session_id),
            Cdp::Page(PageCommand::Navigate {
                url: url.to_string(),
            }),
            nav_timeout,
        );
        let event_fut = self.connection.wait_for_event(
            "Page.domContentEventFired",
            Some(&self.session_id),
            nav_timeout,
        );
        tokio::pin!(nav_fut);
        tokio::pin!(event_fut);

        // `biased` polls the event branch first, so its waiter is registered
        // before the navigate command goes out; a page that loads instantly
        // cannot fire the event unseen.
        let mut nav_acked = false;
        loop {
            tokio::select! {
                biased;

                event = &mut event_fut => {
                    event.map_err(|e| {
                        if e.is_timeout() {
                            Error::timeout("navigation", nav_timeout.as_millis() as u64)
                        } else {
                            e
                        }
                    })?;
                    if !nav_acked {
                        check_navigate_ack(&nav_fut.await?)?;
                    }
                    break;
                }

                nav = &mut nav_fut, if !nav_acked => {
                    check_navigate_ack(&nav?)?;
                    nav_acked = true;
                }
            }
        }

        debug!(url = %url, elapsed_ms = started.elapsed().as_millis() as u64, "Navigation complete");
        Ok(())
    }

    async fn evaluate(&self, script: &str, eval_timeout: Duration) -> Result<Value> {
        debug!(session_id = %self.session_id, script_len = script.len(), "Evaluating script");

        let result = self
            .connection
            .send_with_timeout(
                Some(&self.session_id),
                Cdp::Runtime(RuntimeCommand::Evaluate {
                    expression: script.to_string(),
                    await_promise: true,
                    return_by_value: true,
                }),
                eval_timeout,
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("unknown script exception");
            return Err(Error::script(message));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        debug!(session_id = %self.session_id, "Capturing screenshot");

        let result = self
            .send(Cdp::Page(PageCommand::CaptureScreenshot {
                format: "png".to_string(),
            }))
            .await?;

        let data = require_str(&result, "data")?;
        Base64Standard
            .decode(&data)
            .map_err(|e| Error::protocol(format!("Failed to decode screenshot: {e}")))
    }

    async fn close(&self) -> Result<()> {
        debug!(target_id = %self.target_id, "Closing page");
        self.connection
            .send(
                None,
                Cdp::Target(TargetCommand::CloseTarget {
                    target_id: self.target_id.clone(),
                }),
            )
            .await?;
        Ok(())
    }
}

/// Rejects a `Page.navigate` ack that carries a non-empty `errorText`.
fn check_navigate_ack(result: &Value) -> Result<()> {
    if let Some(error_text) = result.get("errorText").and_then(Value::as_str)
        && !error_text.is_empty()
    {
        return Err(Error::navigation(error_text));
    }
    Ok(())
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        // The guard's Drop sends the kill signal; nothing async can run here.
        self.connection.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
