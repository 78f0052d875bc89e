//! Browser lifecycle management.
//!
//! One shared browser process serves all renders. The manager launches it
//! lazily on first acquire, hands the same handle to subsequent renders,
//! replaces it when it dies or crashes mid-render, and rotates it after a
//! configurable number of renders or age so a long-lived process does not
//! accumulate a recognizable fingerprint (or leaked memory).
//!
//! All slot access goes through one async mutex, so two concurrent acquires
//! never race into launching two processes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RotationPolicy;
use crate::error::Result;

use super::{Browser, BrowserLauncher};

// ============================================================================
// Slot
// ============================================================================

/// The currently live browser plus its usage counters.
struct Slot {
    /// Live browser handle.
    browser: Arc<dyn Browser>,
    /// When the process was launched.
    launched_at: Instant,
    /// Renders completed against this process.
    renders: u32,
}

// ============================================================================
// BrowserLifecycleManager
// ============================================================================

/// Owns the single shared browser and decides when to replace it.
pub struct BrowserLifecycleManager {
    /// Launches replacement processes.
    launcher: Arc<dyn BrowserLauncher>,
    /// When to retire a healthy process.
    policy: RotationPolicy,
    /// The slot; `None` means no process is running.
    slot: Mutex<Option<Slot>>,
}

impl BrowserLifecycleManager {
    /// Creates a manager. No process is launched until the first
    /// [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(launcher: Arc<dyn BrowserLauncher>, policy: RotationPolicy) -> Self {
        Self {
            launcher,
            policy,
            slot: Mutex::new(None),
        }
    }

    /// Returns the shared browser, launching one if necessary.
    ///
    /// A handle that stopped responding since the last render is discarded
    /// and replaced transparently. Callers must call this once per render
    /// rather than caching the result.
    ///
    /// # Errors
    ///
    /// Propagates launch failures; the slot stays empty so the next acquire
    /// retries.
    pub async fn acquire(&self) -> Result<Arc<dyn Browser>> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.as_ref() {
            if current.browser.is_alive() {
                return Ok(Arc::clone(&current.browser));
            }
            warn!("Browser handle is dead; relaunching");
            if let Some(stale) = slot.take()
                && let Err(e) = stale.browser.close().await
            {
                debug!(error = %e, "Error while discarding dead browser");
            }
        }

        info!("Launching browser");
        let browser = self.launcher.launch().await?;
        *slot = Some(Slot {
            browser: Arc::clone(&browser),
            launched_at: Instant::now(),
            renders: 0,
        });
        Ok(browser)
    }

    /// Tears down the current browser, if any.
    ///
    /// Idempotent: releasing an empty slot is a no-op. Teardown errors are
    /// logged, never propagated, because the slot must end up empty either
    /// way.
    pub async fn release(&self, reason: &str) {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(current) => {
                info!(
                    reason,
                    renders = current.renders,
                    age_secs = current.launched_at.elapsed().as_secs(),
                    "Releasing browser"
                );
                if let Err(e) = current.browser.close().await {
                    warn!(reason, error = %e, "Browser teardown reported an error");
                }
            }
            None => debug!(reason, "Release with no browser running"),
        }
    }

    /// Records a completed render and rotates the process if the policy says
    /// it has served enough.
    pub async fn note_render_finished(&self) {
        let rotate = {
            let mut slot = self.slot.lock().await;
            match slot.as_mut() {
                Some(current) => {
                    current.renders += 1;
                    self.policy
                        .should_rotate(current.renders, current.launched_at.elapsed())
                }
                None => false,
            }
        };

        if rotate {
            self.release("rotation").await;
        }
    }

    /// Spawns a task that tears the browser down on SIGINT/SIGTERM.
    ///
    /// The task resolves after the first signal; process exit is the
    /// embedder's decision.
    pub fn spawn_signal_handler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let signal = wait_for_shutdown_signal().await;
            info!(signal, "Shutdown signal received");
            manager.release(signal).await;
        })
    }

    /// Returns `true` if a browser process is currently held.
    ///
    /// Diagnostic only; the answer can be stale by the time it is read.
    pub async fn has_browser(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Age of the current process, if one is running.
    pub async fn browser_age(&self) -> Option<Duration> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|slot| slot.launched_at.elapsed())
    }
}

/// Waits for the first shutdown signal and names it.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler; falling back to Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

// ============================================================================
// Tests
// ============================================================================
