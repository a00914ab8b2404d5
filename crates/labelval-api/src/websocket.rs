//! Inspection event stream.
//!
//! One persistent WebSocket per node. Frames are decoded into
//! [`InspectionEvent`]s and dispatched synchronously, inside the read loop,
//! to at most one handler per event kind. Registering a handler for a kind
//! replaces the previous one, so re-registration after a reconnect can
//! never double-deliver.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected ─start()─▶ Connecting ─handshake─▶ Open
//!       ▲                                          │ stop() or peer close
//!       └──── close ack or grace timeout ◀── Closing
//! ```
//!
//! A read error or an unrequested close ends in `Disconnected` and raises a
//! [`StreamFault`]. The stream never reconnects by itself.
//!
//! ```rust,ignore
//! let stream = EventStream::new(endpoint.events_url()?, StreamConfig::default());
//! stream.on_label_end(|n| println!("label end {}", n.repeat));
//! stream.start(client.token()).await?;
//! // ...
//! stream.close().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::events::{
    EventEnvelope, Heartbeat, InspectionEvent, RepeatNotice, SessionStateChange, SetupDetect,
    StateChange, decode_frame,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long `stop()` waits for the peer to acknowledge the close
    /// handshake before dropping the socket. Default: 2s.
    pub close_grace: Duration,

    /// Silence longer than this is treated as a dead connection.
    /// Heartbeats arrive well within it. Default: 30s.
    pub read_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(2),
            read_timeout: Some(Duration::from_secs(30)),
        }
    }
}

// ── Connection state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

// ── Faults ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A frame could not be decoded. The connection stays open.
    MalformedFrame,
    /// The peer closed or dropped the connection without being asked to.
    Closed,
    /// The socket returned an error or went silent past the read timeout.
    ReadError,
}

/// Stream-fault notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    pub kind: FaultKind,
    pub message: String,
}

impl StreamFault {
    fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the connection was lost as a result of this fault.
    pub fn is_disconnect(&self) -> bool {
        self.kind != FaultKind::MalformedFrame
    }
}

impl std::fmt::Display for StreamFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ── Handler slots ────────────────────────────────────────────────────

type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;
type Slot<T> = ArcSwapOption<Handler<T>>;

#[derive(Default)]
struct Handlers {
    heartbeat: Slot<Heartbeat>,
    state_change: Slot<StateChange>,
    setup_capture: Slot<RepeatNotice>,
    setup_detect: Slot<SetupDetect>,
    label_end: Slot<RepeatNotice>,
    session_state_change: Slot<SessionStateChange>,
    fault: Slot<StreamFault>,
}

fn install<T>(slot: &Slot<T>, f: impl Fn(&T) + Send + Sync + 'static) {
    slot.store(Some(Arc::new(Box::new(f))));
}

fn fire<T>(slot: &Slot<T>, value: &T) {
    if let Some(handler) = slot.load_full() {
        (*handler)(value);
    }
}

impl Handlers {
    fn dispatch(&self, envelope: &EventEnvelope) {
        match &envelope.event {
            InspectionEvent::Heartbeat(e) => fire(&self.heartbeat, e),
            InspectionEvent::StateChange(e) => fire(&self.state_change, e),
            InspectionEvent::SetupCapture(e) => fire(&self.setup_capture, e),
            InspectionEvent::SetupDetect(e) => fire(&self.setup_detect, e),
            InspectionEvent::LabelEnd(e) => fire(&self.label_end, e),
            InspectionEvent::SessionStateChange(e) => fire(&self.session_state_change, e),
        }
    }

    fn clear(&self) {
        self.heartbeat.store(None);
        self.state_change.store(None);
        self.setup_capture.store(None);
        self.setup_detect.store(None);
        self.label_end.store(None);
        self.session_state_change.store(None);
        self.fault.store(None);
    }
}

// ── EventStream ──────────────────────────────────────────────────────

struct ReadTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Event-stream connection to one node.
pub struct EventStream {
    url: Url,
    config: StreamConfig,
    handlers: Arc<Handlers>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    task: Mutex<Option<ReadTask>>,
}

impl EventStream {
    pub fn new(url: Url, config: StreamConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url,
            config,
            handlers: Arc::new(Handlers::default()),
            state_tx: Arc::new(state_tx),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection-state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    // ── Handler registration ─────────────────────────────────────────

    pub fn on_heartbeat(&self, f: impl Fn(&Heartbeat) + Send + Sync + 'static) {
        install(&self.handlers.heartbeat, f);
    }

    pub fn on_state_change(&self, f: impl Fn(&StateChange) + Send + Sync + 'static) {
        install(&self.handlers.state_change, f);
    }

    pub fn on_setup_capture(&self, f: impl Fn(&RepeatNotice) + Send + Sync + 'static) {
        install(&self.handlers.setup_capture, f);
    }

    pub fn on_setup_detect(&self, f: impl Fn(&SetupDetect) + Send + Sync + 'static) {
        install(&self.handlers.setup_detect, f);
    }

    pub fn on_label_end(&self, f: impl Fn(&RepeatNotice) + Send + Sync + 'static) {
        install(&self.handlers.label_end, f);
    }

    pub fn on_session_state_change(
        &self,
        f: impl Fn(&SessionStateChange) + Send + Sync + 'static,
    ) {
        install(&self.handlers.session_state_change, f);
    }

    pub fn on_fault(&self, f: impl Fn(&StreamFault) + Send + Sync + 'static) {
        install(&self.handlers.fault, f);
    }

    /// Drop every registered handler.
    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect and spawn the read loop.
    ///
    /// `token` is sent as the `Authorization` header on the upgrade. A
    /// no-op if the stream is already open.
    pub async fn start(&self, token: Option<SecretString>) -> Result<(), Error> {
        let mut task = self.task.lock().await;
        if self.state() != ConnectionState::Disconnected {
            debug!("event stream already running");
            return Ok(());
        }
        // A previous loop that ended on a fault has already exited.
        if let Some(old) = task.take() {
            let _ = old.handle.await;
        }

        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(url = %self.url, "connecting event stream");

        let socket = match connect(&self.url, token.as_ref()).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.state_tx.send_replace(ConnectionState::Open);
        info!("event stream open");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            socket,
            Arc::clone(&self.handlers),
            Arc::clone(&self.state_tx),
            self.config.clone(),
            cancel.clone(),
        ));
        *task = Some(ReadTask { cancel, handle });
        Ok(())
    }

    /// Close the connection and wait for the read loop to exit.
    ///
    /// Sends a close frame and waits up to `close_grace` for the peer's
    /// acknowledgement. Always ends in `Disconnected`. Handlers stay
    /// registered.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.cancel.cancel();
        let _ = task.handle.await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Stop the stream and unregister every handler.
    pub async fn close(&self) {
        self.stop().await;
        self.clear_handlers();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Connection + read loop ───────────────────────────────────────────

async fn connect(url: &Url, token: Option<&SecretString>) -> Result<Socket, Error> {
    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", token.expose_secret());
    }

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    Ok(socket)
}

/// Why the read loop stopped reading.
enum Exit {
    Requested,
    PeerClosed(StreamFault),
    Failed(StreamFault),
}

async fn read_loop(
    mut socket: Socket,
    handlers: Arc<Handlers>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    config: StreamConfig,
    cancel: CancellationToken,
) {
    let exit = loop {
        let next = async {
            match config.read_timeout {
                Some(limit) => tokio::time::timeout(limit, socket.next()).await.ok(),
                None => Some(socket.next().await),
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break Exit::Requested,
            frame = next => match frame {
                None => break Exit::Failed(StreamFault::new(
                    FaultKind::ReadError,
                    "event stream read timed out",
                )),
                Some(Some(Ok(tungstenite::Message::Text(text)))) => {
                    trace!(frame = text.as_str(), "event frame");
                    handle_text(&text, &handlers);
                }
                Some(Some(Ok(tungstenite::Message::Close(frame)))) => {
                    let (code, reason) = frame
                        .map(|cf| (u16::from(cf.code), cf.reason.as_str().to_owned()))
                        .unwrap_or((1005, String::new()));
                    info!(code, reason = %reason, "event stream closed by peer");
                    let err = Error::WebSocketClosed { code, reason };
                    break Exit::PeerClosed(StreamFault::new(FaultKind::Closed, err.to_string()));
                }
                Some(Some(Err(e))) => {
                    break Exit::Failed(StreamFault::new(FaultKind::ReadError, e.to_string()));
                }
                Some(None) => break Exit::Failed(StreamFault::new(
                    FaultKind::Closed,
                    "event stream ended without a close frame",
                )),
                // Ping is answered by tungstenite; binary and pong carry nothing.
                Some(Some(Ok(_))) => {}
            },
        }
    };

    match exit {
        Exit::Requested => {
            state_tx.send_replace(ConnectionState::Closing);
            close_gracefully(&mut socket, config.close_grace).await;
            state_tx.send_replace(ConnectionState::Disconnected);
            debug!("event stream stopped");
        }
        Exit::PeerClosed(fault) => {
            state_tx.send_replace(ConnectionState::Closing);
            // Reading on flushes tungstenite's queued close reply.
            drain(&mut socket, config.close_grace).await;
            state_tx.send_replace(ConnectionState::Disconnected);
            fire(&handlers.fault, &fault);
        }
        Exit::Failed(fault) => {
            warn!(error = %fault, "event stream fault");
            state_tx.send_replace(ConnectionState::Disconnected);
            fire(&handlers.fault, &fault);
        }
    }
}

fn handle_text(text: &str, handlers: &Handlers) {
    match decode_frame(text) {
        Ok(Some(envelope)) => handlers.dispatch(&envelope),
        Ok(None) => trace!("ignoring unknown event"),
        Err(e) => {
            warn!(error = %e, "dropping malformed event frame");
            fire(
                &handlers.fault,
                &StreamFault::new(FaultKind::MalformedFrame, e.to_string()),
            );
        }
    }
}

async fn close_gracefully(socket: &mut Socket, grace: Duration) {
    let handshake = async {
        if let Err(e) = socket.close(None).await {
            debug!(error = %e, "close frame not sent");
            return;
        }
        while let Some(Ok(msg)) = socket.next().await {
            if msg.is_close() {
                break;
            }
        }
    };
    if tokio::time::timeout(grace, handshake).await.is_err() {
        debug!("peer did not acknowledge close, dropping socket");
    }
}

async fn drain(socket: &mut Socket, grace: Duration) {
    let _ = tokio::time::timeout(grace, async {
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn registering_twice_replaces_the_handler() {
        let handlers = Handlers::default();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&first);
        install(&handlers.label_end, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&second);
        install(&handlers.label_end, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handle_text(r#"{"name":"labelEnd","data":{"repeat":4}}"#, &handlers);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_frame_raises_fault_without_disconnect() {
        let handlers = Handlers::default();
        let faults = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&faults);
        install(&handlers.fault, move |f: &StreamFault| {
            sink.lock().unwrap().push(f.clone());
        });

        handle_text("{not json", &handlers);

        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::MalformedFrame);
        assert!(!faults[0].is_disconnect());
    }

    #[test]
    fn cleared_handlers_are_not_called() {
        let handlers = Handlers::default();
        let hits = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&hits);
        install(&handlers.heartbeat, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handlers.clear();

        handle_text(r#"{"name":"heartbeat","data":{"state":"idle"}}"#, &handlers);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.close_grace, Duration::from_secs(2));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(30)));
    }
}
