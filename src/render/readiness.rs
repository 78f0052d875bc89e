//! Marker-based content readiness.
//!
//! After navigation the page is often a shell that fills in asynchronously.
//! [`ContentReadinessWaiter`] injects a script that resolves once the body
//! text contains one of the configured marker strings, watching mutations via
//! a `MutationObserver`. The in-page timeout is not a failure: the script
//! resolves with whatever HTML is present, and the render proceeds with it.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::browser::PageHandle;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Extra headroom over the in-page timeout before the evaluate itself is
/// declared hung.
const EVALUATE_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// ContentReadinessWaiter
// ============================================================================

/// Waits for marker text to appear in the page, then extracts its HTML.
#[derive(Debug, Clone)]
pub struct ContentReadinessWaiter {
    /// Marker strings; any one of them satisfies the wait.
    markers: Vec<String>,
    /// In-page wait budget.
    timeout: Duration,
}

impl ContentReadinessWaiter {
    /// Creates a waiter for the given markers and budget.
    #[must_use]
    pub fn new(markers: Vec<String>, timeout: Duration) -> Self {
        Self { markers, timeout }
    }

    /// Waits until a marker appears (or the budget runs out), then returns
    /// `document.documentElement.outerHTML`.
    ///
    /// # Errors
    ///
    /// Returns an error only for browser-level failures (evaluate error,
    /// hung evaluate, non-string result). The in-page timeout itself resolves
    /// normally with the partial HTML.
    pub async fn wait_for_content(&self, page: &dyn PageHandle) -> Result<String> {
        let script = self.build_script();
        let outer_timeout = self.timeout + EVALUATE_GRACE;

        debug!(
            markers = ?self.markers,
            timeout_ms = self.timeout.as_millis() as u64,
            "Waiting for content markers"
        );

        let value = page.evaluate(&script, outer_timeout).await?;
        match value {
            Value::String(html) => Ok(html),
            other => {
                warn!(result = %other, "Readiness script returned a non-string value");
                Err(Error::script("readiness script did not return HTML"))
            }
        }
    }

    /// Builds the in-page wait script.
    ///
    /// The promise resolves with the document HTML in all three cases:
    /// marker already present, marker appearing via mutation, and timeout.
    #[must_use]
    pub fn build_script(&self) -> String {
        // serde_json does the escaping; markers may contain quotes or
        // non-ASCII text.
        let markers_json =
            serde_json::to_string(&self.markers).unwrap_or_else(|_| "[]".to_string());
        let timeout_ms = self.timeout.as_millis() as u64;

        format!(
            r#"new Promise((resolve) => {{
  const markers = {markers_json};
  const hasMarker = () => {{
    const text = document.body ? document.body.innerText : '';
    return markers.some((marker) => text.includes(marker));
  }};
  const finish = () => resolve(document.documentElement.outerHTML);

  if (hasMarker()) {{
    finish();
    return;
  }}

  const observer = new MutationObserver(() => {{
    if (hasMarker()) {{
      observer.disconnect();
      clearTimeout(timer);
      finish();
    }}
  }});
  const timer = setTimeout(() => {{
    observer.disconnect();
    finish();
  }}, {timeout_ms});

  observer.observe(document.body || document.documentElement, {{
    childList: true,
    subtree: true,
    characterData: true,
  }});
}})"#
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct StubPage {
        result: Value,
        evaluations: AtomicU32,
    }

    #[async_trait]
    impl PageHandle for StubPage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&self, script: &str, timeout: Duration) -> Result<Value> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            assert!(script.contains("MutationObserver"));
            assert!(timeout > Duration::from_secs(5), "grace must be added");
            Ok(self.result.clone())
        }

        async fn screenshot_png(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn waiter() -> ContentReadinessWaiter {
        ContentReadinessWaiter::new(
            vec!["配送".to_string(), "商品详情".to_string()],
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_script_embeds_escaped_markers() {
        let waiter = ContentReadinessWaiter::new(
            vec!["配送".to_string(), "with \"quotes\"".to_string()],
            Duration::from_secs(30),
        );
        let script = waiter.build_script();

        assert!(script.contains("配送"));
        assert!(script.contains(r#"with \"quotes\""#));
        assert!(script.contains("30000"));
        assert!(script.contains("characterData"));
    }

    #[tokio::test]
    async fn test_wait_returns_html_string() {
        let page = Arc::new(StubPage {
            result: Value::String("<html><body>配送</body></html>".to_string()),
            evaluations: AtomicU32::new(0),
        });

        let html = waiter()
            .wait_for_content(page.as_ref())
            .await
            .expect("wait");
        assert!(html.contains("配送"));
        assert_eq!(page.evaluations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_rejects_non_string_result() {
        let page = StubPage {
            result: Value::Null,
            evaluations: AtomicU32::new(0),
        };

        let err = waiter().wait_for_content(&page).await.unwrap_err();
        assert!(matches!(err, Error::Script { .. }));
    }
}
