use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_console_error::ConsoleError;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::connection::{Connector, StreamConnection};
use crate::events::{RunCommand, RunEvent, StreamEvent, StreamEventKind};
use crate::session::SessionId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

struct WsConnectionInner {
    session_id: SessionId,
    run_id: String,
    state: AtomicU8,
    shutdown: Notify,
    outbound: mpsc::UnboundedSender<Message>,
}

impl WsConnectionInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// WebSocket run stream. Socket I/O runs in a spawned task; decoded events
/// are relayed to the connector's event channel.
#[derive(Clone)]
pub struct WsConnection {
    inner: Arc<WsConnectionInner>,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("session_id", &self.inner.session_id)
            .field("run_id", &self.inner.run_id)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl WsConnection {
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Queues `command`. Commands sent while connecting go out once the
    /// handshake completes.
    pub fn send(&self, command: &RunCommand) -> Result<(), ConsoleError> {
        if !self.is_open() {
            return Err(ConsoleError::stream(format!(
                "connection for run {} is closed",
                self.inner.run_id
            )));
        }
        let text = command.encode()?;
        self.inner
            .outbound
            .send(Message::Text(text))
            .map_err(|_| ConsoleError::stream("connection task has stopped"))
    }
}

impl StreamConnection for WsConnection {
    fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Connecting counts as open so a pending handshake is reused rather
    /// than raced by a second connection.
    fn is_open(&self) -> bool {
        matches!(
            self.inner.state(),
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    fn close(&self) -> Result<(), ConsoleError> {
        let closing = [ConnectionState::Connecting, ConnectionState::Open]
            .into_iter()
            .any(|from| self.inner.transition(from, ConnectionState::Closing));
        if closing {
            self.inner.shutdown.notify_one();
        }
        Ok(())
    }
}

/// Opens [`WsConnection`]s on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl WsConnector {
    pub fn new(events: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { events }
    }

    /// Connector plus the receiving end of its event channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    fn open(
        &self,
        url: &str,
        session_id: SessionId,
        run_id: &str,
    ) -> Result<WsConnection, ConsoleError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ConsoleError::stream(format!("no async runtime: {err}")))?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(WsConnectionInner {
            session_id,
            run_id: run_id.to_string(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            shutdown: Notify::new(),
            outbound,
        });
        runtime.spawn(run_socket(
            inner.clone(),
            url.to_string(),
            outbound_rx,
            self.events.clone(),
        ));
        Ok(WsConnection { inner })
    }
}

async fn run_socket(
    inner: Arc<WsConnectionInner>,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    let emit = |kind: StreamEventKind| {
        let _ = events.send(StreamEvent::new(
            inner.session_id,
            inner.run_id.clone(),
            kind,
        ));
    };

    let connected = tokio::select! {
        _ = inner.shutdown.notified() => None,
        result = time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url.as_str())) => {
            match result {
                Ok(Ok((stream, _))) => Some(stream),
                Ok(Err(err)) => {
                    warn!(session_id = %inner.session_id, url = %url, error = %err, "stream connect failed");
                    emit(StreamEventKind::Failed(format!("connect failed: {err}")));
                    None
                }
                Err(_) => {
                    warn!(session_id = %inner.session_id, url = %url, "stream connect timed out");
                    emit(StreamEventKind::Failed("connect timed out".to_string()));
                    None
                }
            }
        }
    };

    if let Some(stream) = connected {
        let (mut write, mut read) = stream.split();
        if inner.transition(ConnectionState::Connecting, ConnectionState::Open) {
            info!(session_id = %inner.session_id, run_id = %inner.run_id, "stream connected");
            emit(StreamEventKind::Opened);
            loop {
                tokio::select! {
                    _ = inner.shutdown.notified() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(message) = outbound.recv() => {
                        if let Err(err) = write.send(message).await {
                            emit(StreamEventKind::Failed(format!("send failed: {err}")));
                            break;
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => match RunEvent::decode(&text) {
                                Ok(event) => emit(StreamEventKind::Run(event)),
                                Err(err) => {
                                    debug!(session_id = %inner.session_id, error = %err, "undecodable run message");
                                    emit(StreamEventKind::Failed(err.to_string()));
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(session_id = %inner.session_id, error = %err, "stream read failed");
                                emit(StreamEventKind::Failed(format!("read failed: {err}")));
                                break;
                            }
                        }
                    }
                }
            }
        } else {
            let _ = write.send(Message::Close(None)).await;
        }
    }

    inner.set_state(ConnectionState::Closed);
    debug!(session_id = %inner.session_id, run_id = %inner.run_id, "stream closed");
    emit(StreamEventKind::Closed);
}
