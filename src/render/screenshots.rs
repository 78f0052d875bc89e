//! Screenshot storage.
//!
//! Screenshots land under `<root>/YYYY-MM-DD/HH-MM-SS-<id>.png`. The dated
//! partition makes retention pruning a directory removal, and `<id>` comes
//! from the render URL's `id` query parameter so captures can be traced back
//! to the request that produced them.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Dated partition directory format.
const PARTITION_FORMAT: &str = "%Y-%m-%d";

/// Longest id accepted from the query string.
const MAX_ID_LEN: usize = 40;

// ============================================================================
// AllocatedShot
// ============================================================================

/// A reserved screenshot location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedShot {
    /// Absolute path to write the PNG to.
    pub absolute: PathBuf,
    /// Working-directory-relative path (`<root>/<date>/<name>.png`, forward
    /// slashes), ready for a transport layer to prefix with a base URL.
    pub relative: String,
}

// ============================================================================
// ScreenshotStore
// ============================================================================

/// Allocates dated screenshot paths and prunes expired partitions.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    /// Directory all captures live under.
    root: PathBuf,
    /// Partitions older than this are removed on allocation.
    retention: Duration,
}

impl ScreenshotStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    /// Captures `png` for `url`: prunes expired partitions, allocates a path
    /// in today's partition, and writes the bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition directory or the file cannot be
    /// created. Pruning failures are logged and ignored.
    pub async fn save(&self, url: &str, png: &[u8]) -> Result<AllocatedShot> {
        let shot = self.allocate(url).await?;
        tokio::fs::write(&shot.absolute, png).await?;
        info!(path = %shot.relative, bytes = png.len(), "Screenshot written");
        Ok(shot)
    }

    /// Reserves a unique path in today's partition without writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition directory cannot be created.
    pub async fn allocate(&self, url: &str) -> Result<AllocatedShot> {
        self.prune().await;

        let now = Utc::now();
        let partition = now.format(PARTITION_FORMAT).to_string();
        let dir = self.root.join(&partition);
        tokio::fs::create_dir_all(&dir).await?;

        let id = capture_id(url);
        let stamp = now.format("%H-%M-%S");

        let mut name = format!("{stamp}-{id}.png");
        let mut absolute = dir.join(&name);
        // Same id twice within one second still gets distinct paths.
        while tokio::fs::try_exists(&absolute).await.unwrap_or(false) {
            name = format!("{stamp}-{id}-{}.png", short_uuid());
            absolute = dir.join(&name);
        }

        // The relative path keeps the store directory name so the transport
        // layer can prefix a base URL without knowing the layout.
        let relative = match self.root.file_name().and_then(|dir| dir.to_str()) {
            Some(dir) => format!("{dir}/{partition}/{name}"),
            None => format!("{partition}/{name}"),
        };

        debug!(path = %relative, "Screenshot path allocated");
        Ok(AllocatedShot { relative, absolute })
    }

    /// Removes partitions older than the retention window.
    async fn prune(&self) {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // Root not created yet; nothing to prune.
            Err(_) => return,
        };

        let today = Utc::now().date_naive();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(date) = NaiveDate::parse_from_str(name, PARTITION_FORMAT) else {
                continue;
            };

            let age = today.signed_duration_since(date);
            let expired = age
                .to_std()
                .map(|age| age > self.retention)
                .unwrap_or(false);
            if expired {
                match tokio::fs::remove_dir_all(entry.path()).await {
                    Ok(()) => info!(partition = %name, "Expired screenshot partition removed"),
                    Err(e) => warn!(partition = %name, error = %e, "Failed to prune partition"),
                }
            }
        }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Derives the capture id from the render URL's `id` query parameter,
/// falling back to a short random id.
fn capture_id(url: &str) -> String {
    let from_query = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| sanitize_id(&value))
            .filter(|id| !id.is_empty())
    });

    from_query.unwrap_or_else(short_uuid)
}

/// Keeps filename-safe characters only and bounds the length.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_ID_LEN)
        .collect()
}

/// Eight hex characters of a fresh UUID.
fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ============================================================================
// Tests
// ============================================================================
