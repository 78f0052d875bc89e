//! Single-flight admission.
//!
//! The renderer serves one URL at a time. [`ProcessGate`] is the atomic flag
//! that enforces it: a render begins only if [`ProcessGate::try_begin`] wins
//! the compare-and-swap, and the returned [`RenderPermit`] flips the flag
//! back when dropped, so a panicking render can never wedge the gate shut.
//! There is no queue; losers are rejected immediately.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// ProcessStatus
// ============================================================================

/// Externally visible renderer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// No render in flight; the next request will be admitted.
    Idle,
    /// A render is in flight; further requests are rejected.
    Processing,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Processing => f.write_str("processing"),
        }
    }
}

// ============================================================================
// ProcessGate
// ============================================================================

/// Atomic single-flight gate.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ProcessGate {
    /// `true` while a permit is outstanding.
    busy: Arc<AtomicBool>,
}

impl ProcessGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to begin a render.
    ///
    /// Returns a permit if the gate was idle; `None` if a render is already
    /// in flight. Exactly one caller can win between two releases.
    #[must_use]
    pub fn try_begin(&self) -> Option<RenderPermit> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Render admitted");
            Some(RenderPermit {
                busy: Arc::clone(&self.busy),
                released: false,
            })
        } else {
            debug!("Render rejected, gate busy");
            None
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        if self.busy.load(Ordering::Acquire) {
            ProcessStatus::Processing
        } else {
            ProcessStatus::Idle
        }
    }
}

// ============================================================================
// RenderPermit
// ============================================================================

/// Proof of gate admission; returns the gate to idle exactly once.
#[derive(Debug)]
pub struct RenderPermit {
    busy: Arc<AtomicBool>,
    released: bool,
}

impl RenderPermit {
    /// Releases the permit explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.busy.store(false, Ordering::Release);
            debug!("Render permit released");
        }
    }
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_idle() {
        let gate = ProcessGate::new();
        assert_eq!(gate.status(), ProcessStatus::Idle);
    }

    #[test]
    fn test_single_flight() {
        let gate = ProcessGate::new();

        let permit = gate.try_begin().expect("first begin must win");
        assert_eq!(gate.status(), ProcessStatus::Processing);
        assert!(gate.try_begin().is_none(), "second begin must lose");

        permit.release();
        assert_eq!(gate.status(), ProcessStatus::Idle);
        assert!(gate.try_begin().is_some(), "gate must readmit after release");
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let gate = ProcessGate::new();
        {
            let _permit = gate.try_begin().expect("begin");
            assert_eq!(gate.status(), ProcessStatus::Processing);
        }
        assert_eq!(gate.status(), ProcessStatus::Idle);
    }

    #[test]
    fn test_clones_share_the_flag() {
        let gate = ProcessGate::new();
        let other = gate.clone();

        let _permit = gate.try_begin().expect("begin");
        assert_eq!(other.status(), ProcessStatus::Processing);
        assert!(other.try_begin().is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Idle).unwrap(),
            "\"idle\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let gate = ProcessGate::new();
        let winners: usize = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_begin().map(std::mem::forget).is_some())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
    }
}
