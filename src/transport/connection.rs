//! WebSocket connection and event loop.
//!
//! This module handles the WebSocket connection to the Chromium DevTools
//! endpoint, including request/response correlation and event routing.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming messages from the browser (responses, events)
//! - Outgoing commands from the Rust API
//! - Request/response correlation by integer id
//! - Event waiters (one-shot, method + session filtered)

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Command, Event, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// The stream type returned by [`connect_async`].
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Map of request ids to response channels.
type CorrelationMap = FxHashMap<u64, oneshot::Sender<Result<Response>>>;

/// A one-shot waiter for a specific event.
struct EventWaiter {
    /// Waiter token, for removal on timeout.
    token: u64,
    /// Event method to match.
    method: String,
    /// Session filter (`None` matches only browser-wide events).
    session_id: Option<String>,
    /// Delivery channel for the matched event.
    tx: oneshot::Sender<Event>,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for its response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(u64),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the Chromium DevTools endpoint.
///
/// Handles request/response correlation and event routing. The connection
/// spawns an internal event loop task.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and can be shared across tasks.
/// All operations are non-blocking.
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Registered event waiters (shared with event loop).
    waiters: Arc<Mutex<Vec<EventWaiter>>>,
    /// Monotonic id source for requests and waiter tokens.
    next_id: Arc<AtomicU64>,
    /// Cleared when the event loop exits for any reason.
    alive: Arc<AtomicBool>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            correlation: Arc::clone(&self.correlation),
            waiters: Arc::clone(&self.waiters),
            next_id: Arc::clone(&self.next_id),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl Connection {
    /// Connects to a DevTools WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::connection(e.to_string()))?;
        debug!(url = %ws_url, "DevTools WebSocket connected");
        Ok(Self::new(ws_stream))
    }

    /// Creates a connection from an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub(crate) fn new(ws_stream: WsStream) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let waiters: Arc<Mutex<Vec<EventWaiter>>> = Arc::new(Mutex::new(Vec::new()));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            Arc::clone(&waiters),
            Arc::clone(&alive),
        ));

        Self {
            command_tx,
            correlation,
            waiters,
            next_id: Arc::new(AtomicU64::new(1)),
            alive,
        }
    }

    /// Returns `true` while the event loop is running.
    ///
    /// A dead connection means the browser process crashed or closed the
    /// socket; callers must relaunch rather than retry.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Sends a command and waits for its result with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is down
    /// - [`Error::Timeout`] if no response arrives in time
    /// - [`Error::Cdp`] if the browser reports an error
    pub async fn send(&self, session_id: Option<&str>, command: Command) -> Result<Value> {
        self.send_with_timeout(session_id, command, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Sends a command and waits for its result with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_with_timeout(
        &self,
        session_id: Option<&str>,
        command: Command,
        request_timeout: Duration,
    ) -> Result<Value> {
        // Check pending request limit
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(request_id, session_id.map(str::to_string), command);

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result?.into_result(),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Timeout - clean up correlation entry
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(request_id));

                Err(Error::timeout(
                    format!("request {request_id}"),
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Waits for a single event matching `method` and `session_id`.
    ///
    /// The waiter is removed whether it matches, times out, or the
    /// connection dies; no watcher is ever leaked.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the event does not fire in time
    /// - [`Error::ConnectionClosed`] if the connection dies first
    pub async fn wait_for_event(
        &self,
        method: &str,
        session_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Event> {
        if !self.is_alive() {
            return Err(Error::ConnectionClosed);
        }

        let token = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.waiters.lock().push(EventWaiter {
            token,
            method: method.to_string(),
            session_id: session_id.map(str::to_string),
            tx,
        });

        match timeout(wait_timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.waiters.lock().retain(|w| w.token != token);
                Err(Error::timeout(
                    format!("event {method}"),
                    wait_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        waiters: Arc<Mutex<Vec<EventWaiter>>>,
        alive: Arc<AtomicBool>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming messages from the browser
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &waiters);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(request_id, "Removed timed-out correlation");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        alive.store(false, Ordering::Release);
        Self::fail_pending_requests(&correlation);
        waiters.lock().clear();

        debug!("Event loop terminated");
    }

    /// Handles an incoming text message from the browser.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        waiters: &Arc<Mutex<Vec<EventWaiter>>>,
    ) {
        // Responses carry an id, events do not; try Response first.
        if let Ok(response) = from_str::<Response>(text) {
            let tx = correlation.lock().remove(&response.id);

            if let Some(tx) = tx {
                let _ = tx.send(Ok(response));
            } else {
                warn!(id = response.id, "Response for unknown request");
            }

            return;
        }

        if let Ok(event) = from_str::<Event>(text) {
            trace!(method = %event.method, "Event received");

            let mut matched = Vec::new();
            {
                let mut guard = waiters.lock();
                let mut i = 0;
                while i < guard.len() {
                    if event.matches(&guard[i].method, guard[i].session_id.as_deref()) {
                        matched.push(guard.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
            }

            for waiter in matched {
                let _ = waiter.tx.send(event.clone());
            }

            return;
        }

        warn!(text = %text, "Failed to parse incoming message");
    }

    /// Handles a send command from the Rust API.
    async fn handle_send_command(
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut futures_util::stream::SplitSink<WsStream, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Store correlation before sending
        correlation.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await
            && let Some(tx) = correlation.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(request_id, "Request sent");
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_COMMAND_TIMEOUT.as_secs(), 30);
        assert_eq!(MAX_PENDING_REQUESTS, 64);
    }

    #[test]
    fn test_incoming_response_correlates() {
        let correlation: Arc<Mutex<CorrelationMap>> = Arc::new(Mutex::new(Default::default()));
        let waiters: Arc<Mutex<Vec<EventWaiter>>> = Arc::new(Mutex::new(Vec::new()));

        let (tx, mut rx) = oneshot::channel();
        correlation.lock().insert(9, tx);

        Connection::handle_incoming_message(
            r#"{"id":9,"result":{"ok":true}}"#,
            &correlation,
            &waiters,
        );

        let response = rx.try_recv().expect("delivered").expect("success");
        assert_eq!(response.id, 9);
        assert!(correlation.lock().is_empty());
    }

    #[test]
    fn test_incoming_event_wakes_matching_waiter_only() {
        let correlation: Arc<Mutex<CorrelationMap>> = Arc::new(Mutex::new(Default::default()));
        let waiters: Arc<Mutex<Vec<EventWaiter>>> = Arc::new(Mutex::new(Vec::new()));

        let (tx_match, mut rx_match) = oneshot::channel();
        let (tx_other, mut rx_other) = oneshot::channel();
        {
            let mut guard = waiters.lock();
            guard.push(EventWaiter {
                token: 1,
                method: "Page.domContentEventFired".to_string(),
                session_id: Some("S1".to_string()),
                tx: tx_match,
            });
            guard.push(EventWaiter {
                token: 2,
                method: "Page.domContentEventFired".to_string(),
                session_id: Some("S2".to_string()),
                tx: tx_other,
            });
        }

        Connection::handle_incoming_message(
            r#"{"method":"Page.domContentEventFired","params":{},"sessionId":"S1"}"#,
            &correlation,
            &waiters,
        );

        assert!(rx_match.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
        assert_eq!(waiters.lock().len(), 1);
    }

    #[test]
    fn test_garbage_message_is_ignored() {
        let correlation: Arc<Mutex<CorrelationMap>> = Arc::new(Mutex::new(Default::default()));
        let waiters: Arc<Mutex<Vec<EventWaiter>>> = Arc::new(Mutex::new(Vec::new()));

        Connection::handle_incoming_message("not json", &correlation, &waiters);
        assert!(correlation.lock().is_empty());
    }
}
