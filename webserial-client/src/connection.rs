//! Background WebSocket session driving the device link.
//!
//! The UI thread owns a [`ConnectionManager`]; the socket itself lives on a
//! tokio runtime. Everything the session learns flows back as
//! [`SessionEvent`]s over a `std::sync::mpsc` channel that the UI drains once
//! per frame. Outbound text goes the other way through the [`Link`] handed out
//! in [`ConnectionEvent::Opened`].

use std::{sync::mpsc as std_mpsc, time::Duration};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    runtime::Runtime,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use webserial_core::{ABNORMAL_CLOSE_CODE, ReconnectPolicy};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const NORMAL_CLOSE_CODE: u16 = 1000;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub type SessionId = u64;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub policy: ReconnectPolicy,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connecting,
    Opened(Link),
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
    RetryScheduled(Duration),
}

#[derive(Debug)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: ConnectionEvent,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("tokio runtime init failed: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Sending half of one open socket.
#[derive(Debug, Clone)]
pub struct Link {
    tx: mpsc::UnboundedSender<String>,
}

impl Link {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Queues `text` as one outbound text frame. Never blocks.
    pub fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.tx
            .send(text.to_owned())
            .map_err(|_| ConnectionError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

struct Session {
    id: SessionId,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    runtime: Option<Runtime>,
    config: ConnectionConfig,
    events_tx: std_mpsc::Sender<SessionEvent>,
    session: Option<Session>,
    next_session: SessionId,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        events_tx: std_mpsc::Sender<SessionEvent>,
    ) -> Result<Self, ConnectionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("webserial-net")
            .enable_all()
            .build()
            .map_err(ConnectionError::Runtime)?;

        Ok(Self {
            runtime: Some(runtime),
            config,
            events_tx,
            session: None,
            next_session: 1,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Starts a fresh session, closing the current one first.
    pub fn connect(&mut self) {
        if self.close_session().is_some() {
            debug!("previous session superseded");
        }

        let Some(runtime) = self.runtime.as_ref() else {
            warn!("connect requested after shutdown");
            return;
        };

        let id = self.next_session;
        self.next_session += 1;

        let (close_tx, close_rx) = oneshot::channel();
        let emitter = Emitter {
            session: id,
            tx: self.events_tx.clone(),
        };
        let task = runtime.spawn(run_session(self.config.clone(), emitter, close_rx));

        self.session = Some(Session {
            id,
            close_tx: Some(close_tx),
            task,
        });
    }

    /// Whether events from `session` still describe the live connection.
    pub fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    /// Closes the socket (if open) and stops the runtime.
    ///
    /// Waits briefly for the close frame to go out; in-flight work is not joined.
    /// Called from within a tokio runtime it returns without waiting.
    pub fn shutdown(&mut self) {
        let task = self.close_session();
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        // Blocking inside another runtime panics, so an async caller only signals the close.
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
            info!("connection manager stopped without waiting");
            return;
        }

        if let Some(task) = task {
            runtime.block_on(async {
                if timeout(SHUTDOWN_GRACE, task).await.is_err() {
                    debug!("session did not finish within shutdown grace period");
                }
            });
        }
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        info!("connection manager stopped");
    }

    fn close_session(&mut self) -> Option<JoinHandle<()>> {
        let mut session = self.session.take()?;
        if let Some(close_tx) = session.close_tx.take() {
            let _ = close_tx.send(());
        }
        Some(session.task)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
struct Emitter {
    session: SessionId,
    tx: std_mpsc::Sender<SessionEvent>,
}

impl Emitter {
    /// Returns `false` once nobody is listening anymore.
    fn emit(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

enum SessionEnd {
    Remote { code: Option<u16>, reason: String },
    Local,
}

async fn run_session(
    config: ConnectionConfig,
    emitter: Emitter,
    mut close_rx: oneshot::Receiver<()>,
) {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        info!(
            session = emitter.session,
            attempt,
            url = %config.url,
            "connecting"
        );
        if !emitter.emit(ConnectionEvent::Connecting) {
            return;
        }

        let connected = tokio::select! {
            result = timeout(CONNECT_TIMEOUT, connect_async(config.url.as_str())) => result,
            _ = &mut close_rx => {
                debug!(session = emitter.session, "connect attempt cancelled");
                return;
            }
        };

        match connected {
            Ok(Ok((ws_stream, _))) => {
                info!(session = emitter.session, "connected");
                let (link_tx, link_rx) = mpsc::unbounded_channel();
                emitter.emit(ConnectionEvent::Opened(Link::new(link_tx)));

                match pump(ws_stream, link_rx, &emitter, &mut close_rx).await {
                    SessionEnd::Remote { code, reason } => {
                        info!(session = emitter.session, ?code, %reason, "connection closed");
                        emitter.emit(ConnectionEvent::Closed { code, reason });
                    }
                    SessionEnd::Local => {
                        info!(session = emitter.session, "connection closed by client");
                        emitter.emit(ConnectionEvent::Closed {
                            code: Some(NORMAL_CLOSE_CODE),
                            reason: "closed by client".to_owned(),
                        });
                        return;
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(session = emitter.session, attempt, "connect failed: {err}");
                emitter.emit(ConnectionEvent::Error(err.to_string()));
            }
            Err(_) => {
                let msg = format!("connect timed out after {CONNECT_TIMEOUT:?}");
                warn!(session = emitter.session, attempt, "{msg}");
                emitter.emit(ConnectionEvent::Error(msg));
            }
        }

        let Some(delay) = config.policy.retry_delay() else {
            return;
        };
        if !emitter.emit(ConnectionEvent::RetryScheduled(delay)) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut close_rx => return,
        }
    }
}

async fn pump(
    ws_stream: WsStream,
    mut link_rx: mpsc::UnboundedReceiver<String>,
    emitter: &Emitter,
    close_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut link_open = true;

    loop {
        tokio::select! {
            next = ws_read.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if !emitter.emit(ConnectionEvent::Message(text.to_string())) {
                            let _ = ws_write.close().await;
                            return SessionEnd::Local;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = ws_write.close().await;
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        return SessionEnd::Remote { code, reason };
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return SessionEnd::Remote {
                            code: Some(ABNORMAL_CLOSE_CODE),
                            reason: err.to_string(),
                        };
                    }
                    None => {
                        return SessionEnd::Remote {
                            code: Some(ABNORMAL_CLOSE_CODE),
                            reason: "connection dropped".to_owned(),
                        };
                    }
                }
            }
            outbound = link_rx.recv(), if link_open => {
                match outbound {
                    Some(text) => {
                        if let Err(err) = ws_write.send(Message::Text(text.into())).await {
                            return SessionEnd::Remote {
                                code: Some(ABNORMAL_CLOSE_CODE),
                                reason: err.to_string(),
                            };
                        }
                    }
                    None => link_open = false,
                }
            }
            _ = &mut *close_rx => {
                let _ = ws_write.close().await;
                return SessionEnd::Local;
            }
        }
    }
}
