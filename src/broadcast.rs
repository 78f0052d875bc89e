//! Status fan-out.
//!
//! Observers (SSE responses, WebSocket sessions, tests) register a sink and
//! receive every status transition plus periodic pings. Delivery is
//! best-effort per sink: a sink that reports failure is dropped from the
//! registry and never stalls the others.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::render::ProcessStatus;

// ============================================================================
// StatusEvent
// ============================================================================

/// One event delivered to every registered observer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// `"status"` or `"ping"`.
    pub event_type: &'static str,
    /// The renderer state; absent on pings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProcessStatus>,
    /// When the event was produced.
    pub created_at: DateTime<Utc>,
    /// Seconds since the previous event, absent on the first one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<f64>,
}

impl StatusEvent {
    /// Encodes the event as one Server-Sent Events frame.
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        // StatusEvent has no unserializable fields; this cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {json}\n\n")
    }
}

/// What to broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEventKind {
    /// A renderer state transition.
    Status(ProcessStatus),
    /// A keepalive.
    Ping,
}

// ============================================================================
// StatusSink
// ============================================================================

/// Receives broadcast events.
///
/// `send` returns `false` when the sink is gone (client disconnected,
/// channel closed); the broadcaster drops such sinks.
pub trait StatusSink: Send + Sync {
    /// Delivers one event; `false` means the sink is dead.
    fn send(&self, event: &StatusEvent) -> bool;
}

impl StatusSink for tokio::sync::mpsc::UnboundedSender<StatusEvent> {
    fn send(&self, event: &StatusEvent) -> bool {
        Self::send(self, event.clone()).is_ok()
    }
}

// ============================================================================
// StatusBroadcaster
// ============================================================================

struct Inner {
    /// Registered sinks by registration id.
    sinks: Mutex<FxHashMap<u64, Arc<dyn StatusSink>>>,
    /// Next registration id; monotonic, never reused.
    next_id: AtomicU64,
    /// When the previous event was pushed.
    last_push: Mutex<Option<Instant>>,
}

/// Fan-out registry for [`StatusEvent`]s.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<Inner>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    /// Creates an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sinks: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(1),
                last_push: Mutex::new(None),
            }),
        }
    }

    /// Registers a sink; it receives every subsequent push until the
    /// registration is cancelled or the sink reports failure.
    pub fn register(&self, sink: Arc<dyn StatusSink>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.lock().insert(id, sink);
        debug!(id, "Status observer registered");
        Registration {
            id,
            inner: Arc::clone(&self.inner),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Broadcasts one event to every registered sink.
    ///
    /// Sinks that report failure are removed. Sinks may register or cancel
    /// concurrently; they are snapshotted before delivery.
    pub fn push(&self, kind: StatusEventKind) {
        let time_taken = {
            let mut last_push = self.inner.last_push.lock();
            let elapsed = last_push.map(|at| at.elapsed().as_secs_f64());
            *last_push = Some(Instant::now());
            elapsed
        };

        let (event_type, data) = match kind {
            StatusEventKind::Status(status) => ("status", Some(status)),
            StatusEventKind::Ping => ("ping", None),
        };
        let event = StatusEvent {
            event_type,
            data,
            created_at: Utc::now(),
            time_taken,
        };

        let snapshot: Vec<(u64, Arc<dyn StatusSink>)> = self
            .inner
            .sinks
            .lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        trace!(event_type, observers = snapshot.len(), "Broadcasting event");

        let mut dead = Vec::new();
        for (id, sink) in snapshot {
            if !sink.send(&event) {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut sinks = self.inner.sinks.lock();
            for id in dead {
                sinks.remove(&id);
                debug!(id, "Dead status observer dropped");
            }
        }
    }

    /// Spawns a task pushing `ping` events on a fixed interval.
    pub fn spawn_heartbeat(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is not a heartbeat.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broadcaster.push(StatusEventKind::Ping);
            }
        })
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.sinks.lock().len()
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Handle to a registered sink; cancelling (or dropping) unregisters it.
pub struct Registration {
    id: u64,
    inner: Arc<Inner>,
    cancelled: AtomicBool,
}

impl Registration {
    /// Unregisters the sink. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.sinks.lock().remove(&self.id);
            debug!(id = self.id, "Status observer cancelled");
        }
    }

    /// The registration id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn channel_sink() -> (Arc<dyn StatusSink>, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(tx), rx)
    }

    #[tokio::test]
    async fn test_push_delivers_to_all_observers() {
        let broadcaster = StatusBroadcaster::new();
        let (sink_a, mut rx_a) = channel_sink();
        let (sink_b, mut rx_b) = channel_sink();
        let _reg_a = broadcaster.register(sink_a);
        let _reg_b = broadcaster.register(sink_b);

        broadcaster.push(StatusEventKind::Status(ProcessStatus::Processing));

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.recv().await.expect("event");
            assert_eq!(event.event_type, "status");
            assert_eq!(event.data, Some(ProcessStatus::Processing));
        }
    }

    #[tokio::test]
    async fn test_first_push_has_no_time_taken() {
        let broadcaster = StatusBroadcaster::new();
        let (sink, mut rx) = channel_sink();
        let _reg = broadcaster.register(sink);

        broadcaster.push(StatusEventKind::Status(ProcessStatus::Processing));
        broadcaster.push(StatusEventKind::Status(ProcessStatus::Idle));

        let first = rx.recv().await.expect("first");
        let second = rx.recv().await.expect("second");
        assert!(first.time_taken.is_none());
        assert!(second.time_taken.is_some());
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery_and_is_idempotent() {
        let broadcaster = StatusBroadcaster::new();
        let (sink, mut rx) = channel_sink();
        let reg = broadcaster.register(sink);

        reg.cancel();
        reg.cancel();
        broadcaster.push(StatusEventKind::Ping);

        assert_eq!(broadcaster.observer_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_sink_is_dropped_without_affecting_others() {
        struct FailingSink;
        impl StatusSink for FailingSink {
            fn send(&self, _event: &StatusEvent) -> bool {
                false
            }
        }

        let broadcaster = StatusBroadcaster::new();
        let _dead = broadcaster.register(Arc::new(FailingSink));
        let (sink, mut rx) = channel_sink();
        let _reg = broadcaster.register(sink);

        broadcaster.push(StatusEventKind::Ping);

        assert_eq!(broadcaster.observer_count(), 1);
        assert_eq!(rx.recv().await.expect("event").event_type, "ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pushes_pings_on_interval() {
        let broadcaster = StatusBroadcaster::new();
        let (sink, mut rx) = channel_sink();
        let _reg = broadcaster.register(sink);

        let handle = broadcaster.spawn_heartbeat(Duration::from_secs(30));

        // Paused time advances only when the runtime is otherwise idle, so
        // each recv corresponds to exactly one interval tick.
        for _ in 0..3 {
            let event = rx.recv().await.expect("ping");
            assert_eq!(event.event_type, "ping");
            assert!(event.data.is_none());
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_registration_ids_are_never_reused() {
        let broadcaster = StatusBroadcaster::new();
        let (sink_a, _rx_a) = channel_sink();
        let (sink_b, _rx_b) = channel_sink();

        let reg_a = broadcaster.register(sink_a);
        let first_id = reg_a.id();
        reg_a.cancel();

        let reg_b = broadcaster.register(sink_b);
        assert!(reg_b.id() > first_id);
    }

    #[test]
    fn test_sse_frame_shape() {
        let event = StatusEvent {
            event_type: "status",
            data: Some(ProcessStatus::Idle),
            created_at: Utc::now(),
            time_taken: None,
        };

        let frame = event.to_sse_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"eventType\":\"status\""));
        assert!(frame.contains("\"data\":\"idle\""));
        assert!(!frame.contains("timeTaken"));
    }
}
