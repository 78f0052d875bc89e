//! The render pipeline: admission gate, readiness wait, screenshot storage,
//! and the orchestrator tying them together.

// ============================================================================
// Submodules
// ============================================================================

/// Single-flight admission gate and process status.
pub mod gate;

/// Marker-based content readiness wait.
pub mod readiness;

/// Dated screenshot storage with retention pruning.
pub mod screenshots;

/// The render state machine.
pub mod orchestrator;

// ============================================================================
// Re-exports
// ============================================================================

pub use gate::{ProcessGate, ProcessStatus, RenderPermit};
pub use orchestrator::{RenderOrchestrator, RenderResponse, RenderResult};
pub use readiness::ContentReadinessWaiter;
pub use screenshots::{AllocatedShot, ScreenshotStore};
