//! Cloud session and its event loop.
//!
//! A [`CloudSession`] owns one WebSocket transport at a time and keeps
//! itself connected: when the server drops the connection (which it does
//! periodically for idle clients), the session re-dials with the same
//! credentials, re-sends the handshake and flushes anything queued
//! during the outage. Only an explicit [`end()`](CloudSession::end)
//! stops it.
//!
//! # Event Loop
//!
//! The session spawns a tokio task that handles:
//!
//! - Inbound messages: line reassembly, decode, apply to the store
//! - Outbound `set` packets from the application
//! - Handshake + queue flush on every connection-open
//! - Reconnect with backoff on server-initiated close
//!
//! # Delivery Guarantee
//!
//! At-most-once: a packet handed to a live transport is never retried.
//! Packets that were still queued when the transport died survive into
//! the next connection's flush.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Inbound, LineReassembler, PacketCodec, decode};

use super::config::{SessionBuilder, SessionConfig};
use super::queue::OutgoingQueue;
use super::store::VariableStore;

// ============================================================================
// Types
// ============================================================================

/// The transport stream type produced by `connect_async`.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Change listener callback type.
///
/// Called with `(name, value)` for every applied `set`, whether it
/// originated locally or from the server.
pub type SetListener = dyn Fn(&str, &str) + Send + Sync;

/// Internal commands for the event loop.
enum SessionCommand {
    /// Send a serialized packet line (or queue it while disconnected).
    Send(String),
    /// Close the transport and stop reconnecting.
    End,
}

/// How a connection or wait phase ended.
#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    /// Transport lost; dial again.
    Reconnect,
    /// Session ended; terminate the event loop.
    Shutdown,
}

// ============================================================================
// Shared State
// ============================================================================

/// Registered change listeners.
#[derive(Default)]
struct Listeners {
    /// Fire on every applied set.
    global: Vec<Arc<SetListener>>,
    /// Fire only for a specific variable name.
    named: FxHashMap<String, Vec<Arc<SetListener>>>,
}

/// State shared between the session handle and the event loop.
struct Shared {
    /// Authoritative local variable state.
    store: Mutex<VariableStore>,
    /// Change subscribers.
    listeners: Mutex<Listeners>,
    /// Set once by `end()`; never cleared.
    closed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            store: Mutex::new(VariableStore::new()),
            listeners: Mutex::new(Listeners::default()),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Applies one set to the store and notifies subscribers.
    ///
    /// Listeners are cloned out of the lock before invocation so a
    /// callback may call back into the session without deadlocking.
    fn apply_set(&self, name: &str, value: &str) {
        let created = self.store.lock().apply(name, value);
        if created {
            debug!(name, "Variable created");
        }

        let to_notify: Vec<Arc<SetListener>> = {
            let listeners = self.listeners.lock();
            listeners
                .global
                .iter()
                .chain(listeners.named.get(name).into_iter().flatten())
                .cloned()
                .collect()
        };

        for listener in to_notify {
            listener(name, value);
        }
    }
}

// ============================================================================
// CloudSession
// ============================================================================

/// A live cloud variable session for one project.
///
/// Create with [`CloudSession::builder()`]. The session connects
/// eagerly, then maintains the connection in a background task until
/// [`end()`](Self::end) (or drop).
///
/// # Example
///
/// ```no_run
/// use cloudvars::CloudSession;
///
/// # async fn example() -> cloudvars::Result<()> {
/// let session = CloudSession::builder()
///     .server_url("wss://clouddata.example.org")
///     .username("griffpatch")
///     .credential("sessionid=abc123;")
///     .project_id(104)
///     .connect()
///     .await?;
///
/// session.on_set(|name, value| println!("{name} = {value}"));
/// session.set("score", "42")?;
/// # Ok(())
/// # }
/// ```
pub struct CloudSession {
    /// Channel into the event loop.
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// State shared with the event loop.
    shared: Arc<Shared>,
    /// Packet encoder holding the session envelope.
    codec: PacketCodec,
}

impl std::fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSession")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CloudSession - Public API
// ============================================================================

impl CloudSession {
    /// Creates a configuration builder for a session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Opens a session from a validated configuration.
    ///
    /// Dials the server once before returning; subsequent reconnects are
    /// handled internally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the initial connect fails.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let mut codec = PacketCodec::new(&config.identity.username, &config.project_id);
        if let Some(token) = &config.token {
            codec = codec.with_token(token);
        }

        let stream = Self::open_transport(&config).await?;
        info!(
            user = %config.identity.username,
            project_id = %config.project_id,
            "Cloud session connected"
        );

        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_event_loop(
            config,
            codec.clone(),
            Arc::clone(&shared),
            command_rx,
            stream,
        ));

        Ok(Self {
            command_tx,
            shared,
            codec,
        })
    }

    /// Sets a variable, write-through.
    ///
    /// The local store is updated and listeners fire immediately; the
    /// packet is then sent, or queued if the transport is down. No echo
    /// from the server is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] after [`end()`](Self::end).
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::AlreadyClosed);
        }

        let line = self.codec.set_line(name, value)?;
        self.shared.apply_set(name, value);

        self.command_tx
            .send(SessionCommand::Send(line))
            .map_err(|_| Error::ConnectionClosed)?;

        trace!(name, "Local set dispatched");
        Ok(())
    }

    /// Returns the last known value of a variable.
    ///
    /// Pure local read; `None` if the name was never observed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] after [`end()`](Self::end).
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        if self.shared.is_closed() {
            return Err(Error::AlreadyClosed);
        }

        Ok(self.shared.store.lock().get(name).map(str::to_string))
    }

    /// Returns a snapshot of all known variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] after [`end()`](Self::end).
    pub fn variables(&self) -> Result<FxHashMap<String, String>> {
        if self.shared.is_closed() {
            return Err(Error::AlreadyClosed);
        }

        Ok(self.shared.store.lock().snapshot())
    }

    /// Registers a listener fired on every applied set.
    ///
    /// Fires with `(name, value)` for local and remote sets alike,
    /// including sets whose value equals the previous one.
    pub fn on_set(&self, listener: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.shared.listeners.lock().global.push(Arc::new(listener));
    }

    /// Registers a listener fired only for one variable name.
    pub fn on_variable(&self, name: &str, listener: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.shared
            .listeners
            .lock()
            .named
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Returns `true` once the session has been ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Ends the session.
    ///
    /// Closes the transport and suppresses any further reconnect.
    /// Idempotent; safe to call from any thread.
    pub fn end(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.command_tx.send(SessionCommand::End);
        debug!("Session ended");
    }
}

impl Drop for CloudSession {
    fn drop(&mut self) {
        // The event loop would otherwise keep reconnecting forever.
        self.end();
    }
}

// ============================================================================
// CloudSession - Event Loop
// ============================================================================

impl CloudSession {
    /// Dials the server with the identity credential attached.
    async fn open_transport(config: &SessionConfig) -> Result<WsStream> {
        let mut request = config
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::connection(e.to_string()))?;

        if !config.identity.credential.is_empty() {
            let cookie = HeaderValue::from_str(&config.identity.credential)
                .map_err(|e| Error::connection(format!("Invalid credential: {e}")))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| Error::connection(e.to_string()))?;

        Ok(stream)
    }

    /// Event loop that owns the transport across reconnects.
    ///
    /// The first reconnect attempt after a server-initiated close is
    /// immediate; only failed dial attempts back off.
    async fn run_event_loop(
        config: SessionConfig,
        codec: PacketCodec,
        shared: Arc<Shared>,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        first_stream: WsStream,
    ) {
        let mut queue = OutgoingQueue::new();
        let mut stream = Some(first_stream);
        let mut attempt: u32 = 0;

        loop {
            if shared.is_closed() {
                break;
            }

            let ws = match stream.take() {
                Some(ws) => ws,
                None => match Self::open_transport(&config).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        let delay = config.reconnect.delay_for(attempt);
                        warn!(error = %e, attempt, ?delay, "Reconnect attempt failed");
                        attempt = attempt.saturating_add(1);

                        let exit =
                            Self::wait_backoff(delay, &mut command_rx, &mut queue).await;
                        if exit == LoopExit::Shutdown {
                            break;
                        }
                        continue;
                    }
                },
            };

            attempt = 0;
            let exit =
                Self::run_connection(ws, &codec, &shared, &mut command_rx, &mut queue).await;

            match exit {
                LoopExit::Shutdown => break,
                LoopExit::Reconnect => {
                    debug!("Transport lost; re-establishing");
                }
            }
        }

        debug!("Event loop terminated");
    }

    /// Drives one live connection until it dies or the session ends.
    async fn run_connection(
        ws: WsStream,
        codec: &PacketCodec,
        shared: &Arc<Shared>,
        command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
        queue: &mut OutgoingQueue,
    ) -> LoopExit {
        let (mut ws_write, mut ws_read) = ws.split();

        // Handshake first on every connection.
        let handshake = match codec.handshake_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode handshake");
                return LoopExit::Reconnect;
            }
        };
        if let Err(e) = ws_write.send(Message::Text(handshake.into())).await {
            warn!(error = %e, "Handshake send failed");
            return LoopExit::Reconnect;
        }

        // Flush the backlog in FIFO order. A line whose send fails was
        // in flight and is lost; untransmitted lines go back on the
        // queue for the next connection.
        let mut backlog = queue.drain().into_iter();
        let flushed = backlog.len();
        while let Some(line) = backlog.next() {
            if let Err(e) = ws_write.send(Message::Text(line.into())).await {
                warn!(error = %e, "Flush failed; requeueing remainder");
                for rest in backlog {
                    queue.push(rest);
                }
                return LoopExit::Reconnect;
            }
        }
        if flushed > 0 {
            debug!(count = flushed, "Flushed outgoing queue");
        }

        // Fresh reassembly buffer per connection.
        let mut reassembler = LineReassembler::new();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            for line in reassembler.push(&text) {
                                Self::handle_line(&line, shared);
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by server");
                            return LoopExit::Reconnect;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            return LoopExit::Reconnect;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            return LoopExit::Reconnect;
                        }

                        // Ignore Binary, Ping, Pong, Frame
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Send(line)) => {
                            if let Err(e) = ws_write.send(Message::Text(line.into())).await {
                                // In flight at failure: lost, not retried.
                                warn!(error = %e, "Send failed; packet lost");
                                return LoopExit::Reconnect;
                            }
                        }

                        Some(SessionCommand::End) | None => {
                            let _ = ws_write.close().await;
                            return LoopExit::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Waits out a backoff delay while still accepting commands.
    ///
    /// Packets set during the outage are queued for the next flush.
    async fn wait_backoff(
        delay: std::time::Duration,
        command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
        queue: &mut OutgoingQueue,
    ) -> LoopExit {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return LoopExit::Reconnect,

                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Send(line)) => queue.push(line),
                        Some(SessionCommand::End) | None => return LoopExit::Shutdown,
                    }
                }
            }
        }
    }

    /// Decodes and applies one inbound line.
    ///
    /// A malformed line is logged and dropped; siblings in the same
    /// chunk are unaffected.
    fn handle_line(line: &str, shared: &Arc<Shared>) {
        match decode(line) {
            Ok(Inbound::Set { name, value }) => {
                trace!(name = %name, "Remote set applied");
                shared.apply_set(&name, &value);
            }

            Ok(Inbound::Handshake) => {
                debug!("Handshake echo received");
            }

            Ok(Inbound::Unknown { method }) => {
                warn!(method = %method, "Unrecognized packet method; ignoring");
            }

            Err(e) => {
                warn!(error = %e, "Dropping malformed line");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::session::config::ReconnectPolicy;

    const WAIT: Duration = Duration::from_secs(5);

    type ServerWs = WebSocketStream<TcpStream>;

    /// Installs a test subscriber once so failures come with log output.
    fn init_tracing() {
        use tracing_subscriber::EnvFilter;

        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Binds a mock cloud server on a random local port.
    async fn bind_server() -> (TcpListener, String) {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));
        (listener, url)
    }

    /// Accepts one client connection.
    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client should connect")
            .expect("accept");
        tokio_tungstenite::accept_async(stream).await.expect("upgrade")
    }

    /// Reads the next text frame from the client.
    async fn next_text(ws: &mut ServerWs) -> String {
        loop {
            match timeout(WAIT, ws.next()).await.expect("message expected") {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("Expected text frame, got {other:?}"),
            }
        }
    }

    /// Parses a packet line, trimming the frame delimiter.
    fn parse(line: &str) -> Value {
        serde_json::from_str(line.trim_end()).expect("valid packet json")
    }

    async fn connect_session_with(
        url: &str,
        listener: &TcpListener,
        policy: ReconnectPolicy,
    ) -> (CloudSession, ServerWs) {
        let connect = CloudSession::builder()
            .server_url(url)
            .username("testuser")
            .credential("sessionid=secret;")
            .project_id(104)
            .reconnect_policy(policy)
            .connect();

        let (session, server) = tokio::join!(connect, accept(listener));
        (session.expect("connect"), server)
    }

    async fn connect_session(url: &str, listener: &TcpListener) -> (CloudSession, ServerWs) {
        connect_session_with(url, listener, ReconnectPolicy::immediate()).await
    }

    /// Subscribes a channel-backed listener for deterministic waits.
    fn subscribe(session: &CloudSession) -> mpsc::UnboundedReceiver<(String, String)> {
        let (tx, rx) = mpsc::unbounded_channel();
        session.on_set(move |name, value| {
            let _ = tx.send((name.to_string(), value.to_string()));
        });
        rx
    }

    async fn recv_set(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
        timeout(WAIT, rx.recv())
            .await
            .expect("notification expected")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_handshake_sent_on_connect() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;

        let line = next_text(&mut server).await;
        assert!(line.ends_with('\n'));

        let packet = parse(&line);
        assert_eq!(packet["method"], "handshake");
        assert_eq!(packet["user"], "testuser");
        assert_eq!(packet["project_id"], "104");
        assert!(packet.get("name").is_none());

        session.end();
    }

    #[tokio::test]
    async fn test_set_is_write_through() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;

        session.set("score", "42").expect("set");

        // Visible locally before any server round trip.
        assert_eq!(session.get("score").expect("get").as_deref(), Some("42"));
        assert_eq!(session.get("missing").expect("get"), None);

        let _handshake = next_text(&mut server).await;
        let packet = parse(&next_text(&mut server).await);
        assert_eq!(packet["method"], "set");
        assert_eq!(packet["name"], "score");
        assert_eq!(packet["value"], "42");

        session.end();
    }

    #[tokio::test]
    async fn test_remote_set_applied_last_writer_wins() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        for value in ["1", "2", "3"] {
            let line = format!(
                "{{\"user\":\"srv\",\"project_id\":\"104\",\"method\":\"set\",\"name\":\"a\",\"value\":\"{value}\"}}\n"
            );
            server.send(Message::Text(line.into())).await.expect("send");
        }

        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "1".into()));
        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "2".into()));
        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "3".into()));

        assert_eq!(session.get("a").expect("get").as_deref(), Some("3"));
        session.end();
    }

    #[tokio::test]
    async fn test_repeated_equal_values_notify_each_time() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        let line = "{\"method\":\"set\",\"name\":\"a\",\"value\":\"7\"}\n";
        server.send(Message::Text(line.into())).await.expect("send");
        server.send(Message::Text(line.into())).await.expect("send");

        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "7".into()));
        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "7".into()));

        session.end();
    }

    #[tokio::test]
    async fn test_malformed_line_skipped_siblings_processed() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        let chunk = "{\"method\":\"set\",\"name\":\"a\",\"value\":\"1\"}\n\
                     this is not json\n\
                     {\"method\":\"set\",\"name\":\"b\",\"value\":\"2\"}\n";
        server.send(Message::Text(chunk.into())).await.expect("send");

        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "1".into()));
        assert_eq!(recv_set(&mut notifications).await, ("b".into(), "2".into()));

        assert_eq!(session.get("a").expect("get").as_deref(), Some("1"));
        assert_eq!(session.get("b").expect("get").as_deref(), Some("2"));

        session.end();
    }

    #[tokio::test]
    async fn test_packet_split_across_messages() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        // A complete line plus the head of a split one, then the tail.
        let first = "{\"method\":\"set\",\"name\":\"a\",\"value\":\"1\"}\n{\"method\":\"se";
        let second = "t\",\"name\":\"b\",\"value\":\"2\"}\n";
        server.send(Message::Text(first.into())).await.expect("send");
        server.send(Message::Text(second.into())).await.expect("send");

        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "1".into()));
        assert_eq!(recv_set(&mut notifications).await, ("b".into(), "2".into()));

        session.end();
    }

    #[tokio::test]
    async fn test_unknown_method_ignored() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        let chunk = "{\"method\":\"rename\",\"name\":\"a\"}\n\
                     {\"method\":\"set\",\"name\":\"a\",\"value\":\"1\"}\n";
        server.send(Message::Text(chunk.into())).await.expect("send");

        // The unknown packet produced no notification; the set did.
        assert_eq!(recv_set(&mut notifications).await, ("a".into(), "1".into()));

        session.end();
    }

    #[tokio::test]
    async fn test_named_listener_scoped_to_one_variable() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on_variable("watched", move |_, value| {
            let _ = tx.send(value.to_string());
        });
        let mut all = subscribe(&session);

        let chunk = "{\"method\":\"set\",\"name\":\"other\",\"value\":\"x\"}\n\
                     {\"method\":\"set\",\"name\":\"watched\",\"value\":\"y\"}\n";
        server.send(Message::Text(chunk.into())).await.expect("send");

        assert_eq!(recv_set(&mut all).await.0, "other");
        assert_eq!(recv_set(&mut all).await.0, "watched");

        // Named listener saw only its variable.
        assert_eq!(
            timeout(WAIT, rx.recv()).await.expect("named").expect("open"),
            "y"
        );
        assert!(rx.try_recv().is_err());

        session.end();
    }

    #[tokio::test]
    async fn test_local_set_notifies_once() {
        let (listener, url) = bind_server().await;
        let (session, _server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        session.set("score", "9").expect("set");

        assert_eq!(recv_set(&mut notifications).await, ("score".into(), "9".into()));
        assert!(notifications.try_recv().is_err());

        session.end();
    }

    #[tokio::test]
    async fn test_reconnect_resends_handshake_and_flushes_backlog() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;

        let _handshake = next_text(&mut server).await;

        // Server drops the connection, as it does for idle clients.
        drop(server);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Sets during the outage are buffered, not lost.
        session.set("a", "1").expect("set");
        session.set("b", "2").expect("set");
        session.set("a", "3").expect("set");

        // The session re-dials on its own; accept the new transport.
        let mut server = accept(&listener).await;

        let packet = parse(&next_text(&mut server).await);
        assert_eq!(packet["method"], "handshake");

        // Backlog arrives after the handshake, in original order.
        let expected = [("a", "1"), ("b", "2"), ("a", "3")];
        for (name, value) in expected {
            let packet = parse(&next_text(&mut server).await);
            assert_eq!(packet["method"], "set");
            assert_eq!(packet["name"], name);
            assert_eq!(packet["value"], value);
        }

        session.end();
    }

    #[tokio::test]
    async fn test_sets_during_failing_redials_flush_after_server_returns() {
        let (listener, url) = bind_server().await;
        let addr = listener.local_addr().expect("addr");

        // Nonzero backoff so the loop parks between failed dials and
        // sweeps pending sets into the outgoing queue.
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        };
        let (session, mut server) = connect_session_with(&url, &listener, policy).await;

        let _handshake = next_text(&mut server).await;

        // Server goes away entirely: the connection dies and every
        // re-dial is refused.
        drop(server);
        drop(listener);
        tokio::time::sleep(Duration::from_millis(300)).await;

        session.set("a", "1").expect("set");
        session.set("b", "2").expect("set");
        session.set("a", "3").expect("set");

        // Let a few dial attempts fail with the sets buffered.
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Server comes back on the same port.
        let listener = TcpListener::bind(addr).await.expect("rebind");
        let mut server = accept(&listener).await;

        let packet = parse(&next_text(&mut server).await);
        assert_eq!(packet["method"], "handshake");

        // Outage backlog flushes after the handshake, in original order.
        let expected = [("a", "1"), ("b", "2"), ("a", "3")];
        for (name, value) in expected {
            let packet = parse(&next_text(&mut server).await);
            assert_eq!(packet["method"], "set");
            assert_eq!(packet["name"], name);
            assert_eq!(packet["value"], value);
        }

        session.end();
    }

    #[tokio::test]
    async fn test_end_suppresses_reconnect() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;

        let _handshake = next_text(&mut server).await;
        session.end();

        // The close we observe must not be followed by a new dial.
        let reconnect = timeout(Duration::from_millis(400), listener.accept()).await;
        assert!(reconnect.is_err(), "session reconnected after end()");
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_closes_api() {
        let (listener, url) = bind_server().await;
        let (session, _server) = connect_session(&url, &listener).await;

        assert!(!session.is_closed());
        session.end();
        session.end();
        assert!(session.is_closed());

        assert!(matches!(session.set("a", "1"), Err(Error::AlreadyClosed)));
        assert!(matches!(session.get("a"), Err(Error::AlreadyClosed)));
        assert!(matches!(session.variables(), Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_variables_snapshot() {
        let (listener, url) = bind_server().await;
        let (session, mut server) = connect_session(&url, &listener).await;
        let mut notifications = subscribe(&session);

        session.set("local", "1").expect("set");
        let line = "{\"method\":\"set\",\"name\":\"remote\",\"value\":\"2\"}\n";
        server.send(Message::Text(line.into())).await.expect("send");

        let _ = recv_set(&mut notifications).await;
        let _ = recv_set(&mut notifications).await;

        let snapshot = session.variables().expect("snapshot");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("local").map(String::as_str), Some("1"));
        assert_eq!(snapshot.get("remote").map(String::as_str), Some("2"));

        session.end();
    }

    #[tokio::test]
    async fn test_connect_fails_against_dead_server() {
        let (listener, url) = bind_server().await;
        drop(listener);

        let result = CloudSession::builder()
            .server_url(url)
            .username("u")
            .project_id(1)
            .connect()
            .await;

        let err = result.unwrap_err();
        assert!(err.is_connection_error(), "unexpected error: {err}");
    }
}
