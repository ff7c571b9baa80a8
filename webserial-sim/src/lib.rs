use std::{sync::Arc, time::Duration, time::Instant};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, info, warn};
use webserial_core::{ERROR_PREFIX, SERIAL_PREFIX, WARNING_PREFIX};

pub const MAX_COMMAND_BYTES: usize = 4 * 1024;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LedOn,
    LedOff,
    Ping,
    Fail,
    Unknown(String),
}

/// Parses one text frame from the client. Blank input yields `None`.
pub fn parse_command(raw: &str) -> Option<Command> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let command = match trimmed.to_ascii_uppercase().as_str() {
        "LED_ON" => Command::LedOn,
        "LED_OFF" => Command::LedOff,
        "PING" => Command::Ping,
        "FAIL" => Command::Fail,
        _ => Command::Unknown(trimmed.to_owned()),
    };
    Some(command)
}

pub fn ready_banner() -> String {
    format!("{SERIAL_PREFIX} ESP32 simulator ready")
}

pub fn uptime_line(elapsed: Duration) -> String {
    format!("{SERIAL_PREFIX} uptime {}s", elapsed.as_secs())
}

#[derive(Debug, Default)]
struct DeviceState {
    led_on: bool,
    clients: usize,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<DeviceState>>,
    heartbeat_interval: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DeviceState::default())),
            heartbeat_interval,
        }
    }

    /// Applies a command to the simulated device and returns the reply frame.
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::LedOn => {
                self.inner.write().await.led_on = true;
                format!("{SERIAL_PREFIX} LED is ON")
            }
            Command::LedOff => {
                self.inner.write().await.led_on = false;
                format!("{SERIAL_PREFIX} LED is OFF")
            }
            Command::Ping => format!("{SERIAL_PREFIX} PONG"),
            Command::Fail => format!("{ERROR_PREFIX} simulated fault"),
            Command::Unknown(raw) => format!("{WARNING_PREFIX} unknown command: {raw}"),
        }
    }

    pub async fn led_on(&self) -> bool {
        self.inner.read().await.led_on
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "simulator listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

/// Like [`serve`], but stops accepting and drains once `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), String>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let device = state.inner.read().await;
    Json(serde_json::json!({
        "ok": true,
        "clients": device.clients,
        "led_on": device.led_on,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_socket(state, socket).await {
            warn!("socket session ended with error: {}", err);
        }
    })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    state.inner.write().await.clients += 1;
    info!("client connected");

    let heartbeat_interval = state.heartbeat_interval;
    let send_task = tokio::spawn(async move {
        let started = Instant::now();
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately

        if ws_sender.send(Message::Text(ready_banner().into())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                line = outbound_rx.recv() => {
                    match line {
                        Some(line) => {
                            if ws_sender.send(Message::Text(line.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let line = uptime_line(started.elapsed());
                    if ws_sender.send(Message::Text(line.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let result = receive_loop(&state, &mut ws_receiver, &outbound_tx).await;

    send_task.abort();
    let mut device = state.inner.write().await;
    device.clients = device.clients.saturating_sub(1);
    drop(device);
    info!("client disconnected");
    result
}

async fn receive_loop(
    state: &AppState,
    ws_receiver: &mut futures::stream::SplitStream<axum::extract::ws::WebSocket>,
    outbound_tx: &mpsc::UnboundedSender<String>,
) -> Result<(), String> {
    while let Some(next_message) = ws_receiver.next().await {
        let message = next_message.map_err(|err| format!("websocket receive error: {err}"))?;

        match message {
            Message::Text(text) => {
                if text.len() > MAX_COMMAND_BYTES {
                    warn!(len = text.len(), "dropping oversized command");
                    continue;
                }

                let Some(command) = parse_command(text.as_str()) else {
                    continue;
                };
                debug!(?command, "command received");
                let reply = state.execute(command).await;
                if outbound_tx.send(reply).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    Ok(())
}
