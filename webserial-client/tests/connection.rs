use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    time::{Duration, Instant},
};

use futures::StreamExt;
use tokio::{net::TcpListener, runtime::Runtime, sync::oneshot, time::timeout};
use webserial_client::{
    connection::{
        ConnectionConfig, ConnectionEvent, ConnectionManager, NORMAL_CLOSE_CODE, SessionEvent,
    },
    shell::{SendOutcome, Shell},
};
use webserial_core::{ABNORMAL_CLOSE_CODE, ConnectionState, ReconnectPolicy, Tag};
use webserial_sim::{AppState, serve_with_shutdown};

const QUIET_HEARTBEAT: Duration = Duration::from_secs(3600);

struct SimServer {
    _runtime: Runtime,
    url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Drop for SimServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn start_sim() -> SimServer {
    let runtime = Runtime::new().expect("sim runtime");
    let listener = runtime
        .block_on(TcpListener::bind("127.0.0.1:0"))
        .expect("bind ephemeral simulator socket");
    let address = listener.local_addr().expect("simulator local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    runtime.spawn(serve_with_shutdown(
        listener,
        AppState::new(QUIET_HEARTBEAT),
        async {
            let _ = shutdown_rx.await;
        },
    ));

    SimServer {
        _runtime: runtime,
        url: format!("ws://{address}/"),
        shutdown_tx: Some(shutdown_tx),
    }
}

/// A port that refuses connections: bind, remember, release.
fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe socket");
    let address = listener.local_addr().expect("probe local addr");
    drop(listener);
    format!("ws://{address}/")
}

fn manager(url: String, policy: ReconnectPolicy) -> (ConnectionManager, Receiver<SessionEvent>) {
    let (events_tx, events_rx) = std::sync::mpsc::channel();
    let manager =
        ConnectionManager::new(ConnectionConfig { url, policy }, events_tx).expect("build manager");
    (manager, events_rx)
}

fn next_event(
    manager: &ConnectionManager,
    events_rx: &Receiver<SessionEvent>,
    wait: Duration,
) -> Option<ConnectionEvent> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match events_rx.recv_timeout(remaining) {
            Ok(SessionEvent { session, event }) if manager.is_current(session) => {
                return Some(event);
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Feeds events into `shell` until `done` holds or `wait` runs out.
fn pump_until(
    shell: &mut Shell,
    manager: &ConnectionManager,
    events_rx: &Receiver<SessionEvent>,
    wait: Duration,
    done: impl Fn(&Shell) -> bool,
) -> bool {
    let deadline = Instant::now() + wait;
    while !done(shell) {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        match next_event(manager, events_rx, remaining) {
            Some(event) => shell.apply(event),
            None => return false,
        }
    }
    true
}

#[test]
fn round_trip_with_simulated_device() {
    let sim = start_sim();
    let (mut manager, events_rx) = manager(sim.url.clone(), ReconnectPolicy::Manual);
    let mut shell = Shell::new(ReconnectPolicy::Manual);

    manager.connect();
    assert!(
        pump_until(&mut shell, &manager, &events_rx, Duration::from_secs(5), |s| {
            s.log().received() >= 1
        }),
        "never received the ready banner"
    );
    assert_eq!(shell.state(), ConnectionState::Connected);
    assert!(shell.is_connected());
    let banner = shell.log().last().expect("banner entry");
    assert_eq!(banner.tag, Tag::Serial);
    assert_eq!(banner.text, "[Serial] ESP32 simulator ready");

    *shell.input_mut() = "LED_ON".to_owned();
    assert_eq!(shell.submit(), SendOutcome::Sent);
    assert_eq!(shell.log().sent(), 1);

    assert!(
        pump_until(&mut shell, &manager, &events_rx, Duration::from_secs(5), |s| {
            s.log().received() >= 2
        }),
        "never received the LED reply"
    );
    let reply = shell.log().last().expect("reply entry");
    assert_eq!(reply.text, "[Serial] LED is ON");
    assert_eq!(reply.tag, Tag::Serial);

    *shell.input_mut() = "FAIL".to_owned();
    assert_eq!(shell.submit(), SendOutcome::Sent);
    assert!(pump_until(
        &mut shell,
        &manager,
        &events_rx,
        Duration::from_secs(5),
        |s| s.log().received() >= 3
    ));
    assert_eq!(shell.log().last().map(|e| e.tag), Some(Tag::Error));
    assert_eq!(shell.state(), ConnectionState::Connected);
}

#[test]
fn refused_connection_reports_single_error_without_retry() {
    let (mut manager, events_rx) = manager(refused_url(), ReconnectPolicy::Manual);

    manager.connect();
    assert!(matches!(
        next_event(&manager, &events_rx, Duration::from_secs(5)),
        Some(ConnectionEvent::Connecting)
    ));
    assert!(matches!(
        next_event(&manager, &events_rx, Duration::from_secs(5)),
        Some(ConnectionEvent::Error(_))
    ));
    let extra = next_event(&manager, &events_rx, Duration::from_millis(300));
    assert!(extra.is_none(), "unexpected event after error: {extra:?}");
}

#[test]
fn fixed_policy_retries_after_failure() {
    let delay = Duration::from_millis(50);
    let (mut manager, events_rx) = manager(refused_url(), ReconnectPolicy::Fixed(delay));

    manager.connect();
    let mut seen = Vec::new();
    for _ in 0..5 {
        match next_event(&manager, &events_rx, Duration::from_secs(5)) {
            Some(event) => seen.push(event),
            None => break,
        }
    }

    assert!(matches!(seen.first(), Some(ConnectionEvent::Connecting)));
    assert!(matches!(seen.get(1), Some(ConnectionEvent::Error(_))));
    assert!(matches!(seen.get(2), Some(ConnectionEvent::RetryScheduled(d)) if *d == delay));
    assert!(matches!(seen.get(3), Some(ConnectionEvent::Connecting)));
    assert!(matches!(seen.get(4), Some(ConnectionEvent::Error(_))));

    manager.shutdown();
}

#[test]
fn dropped_socket_is_reported_as_abnormal_close() {
    let runtime = Runtime::new().expect("server runtime");
    let listener = runtime
        .block_on(TcpListener::bind("127.0.0.1:0"))
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    runtime.spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let ws = tokio_tungstenite::accept_async(stream).await;
            drop(ws);
        }
    });

    let (mut manager, events_rx) = manager(format!("ws://{address}/"), ReconnectPolicy::Manual);
    let mut shell = Shell::new(ReconnectPolicy::Manual);
    manager.connect();

    assert!(pump_until(
        &mut shell,
        &manager,
        &events_rx,
        Duration::from_secs(5),
        |s| s.log().iter().any(|e| e.text.contains("Connection closed"))
    ));
    assert_eq!(shell.state(), ConnectionState::Disconnected);
    assert!(shell.reconnect_visible());
    let notice = shell.log().last().expect("close entry");
    assert_eq!(notice.tag, Tag::System);
    assert!(
        notice
            .text
            .contains(&format!("Code: {ABNORMAL_CLOSE_CODE}")),
        "{}",
        notice.text
    );
}

#[test]
fn manual_reconnect_opens_a_new_session() {
    let sim = start_sim();
    let (mut manager, events_rx) = manager(sim.url.clone(), ReconnectPolicy::Manual);
    let mut shell = Shell::new(ReconnectPolicy::Manual);

    manager.connect();
    assert!(pump_until(
        &mut shell,
        &manager,
        &events_rx,
        Duration::from_secs(5),
        Shell::is_connected
    ));

    manager.connect();
    assert!(pump_until(
        &mut shell,
        &manager,
        &events_rx,
        Duration::from_secs(5),
        |s| s.log().received() >= 2
    ));
    assert!(shell.is_connected());
}

#[test]
fn shutdown_closes_socket_normally() {
    let sim = start_sim();
    let (mut manager, events_rx) = manager(sim.url.clone(), ReconnectPolicy::Manual);

    manager.connect();
    let mut opened = false;
    while let Some(event) = next_event(&manager, &events_rx, Duration::from_secs(5)) {
        if matches!(event, ConnectionEvent::Opened(_)) {
            opened = true;
            break;
        }
    }
    assert!(opened, "session never opened");

    manager.shutdown();

    let closed = events_rx
        .try_iter()
        .map(|envelope| envelope.event)
        .find(|event| matches!(event, ConnectionEvent::Closed { .. }));
    assert!(
        matches!(
            closed,
            Some(ConnectionEvent::Closed { code: Some(c), .. }) if c == NORMAL_CLOSE_CODE
        ),
        "expected a normal close, got {closed:?}"
    );
}

#[test]
fn fixed_policy_reconnects_after_dropped_socket() {
    let runtime = Runtime::new().expect("server runtime");
    let listener = runtime
        .block_on(TcpListener::bind("127.0.0.1:0"))
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    runtime.spawn(async move {
        // First session is dropped without a close handshake, the second stays up.
        if let Ok((stream, _)) = listener.accept().await {
            drop(tokio_tungstenite::accept_async(stream).await);
        }
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                while let Some(Ok(_)) = ws.next().await {}
            }
        }
    });

    let delay = Duration::from_millis(50);
    let (mut manager, events_rx) =
        manager(format!("ws://{address}/"), ReconnectPolicy::Fixed(delay));
    manager.connect();

    let mut seen = Vec::new();
    for _ in 0..6 {
        match next_event(&manager, &events_rx, Duration::from_secs(5)) {
            Some(event) => seen.push(event),
            None => break,
        }
    }

    assert!(matches!(seen.first(), Some(ConnectionEvent::Connecting)), "{seen:?}");
    assert!(matches!(seen.get(1), Some(ConnectionEvent::Opened(_))), "{seen:?}");
    assert!(
        matches!(
            seen.get(2),
            Some(ConnectionEvent::Closed { code: Some(c), .. }) if *c == ABNORMAL_CLOSE_CODE
        ),
        "{seen:?}"
    );
    assert!(
        matches!(seen.get(3), Some(ConnectionEvent::RetryScheduled(d)) if *d == delay),
        "{seen:?}"
    );
    assert!(matches!(seen.get(4), Some(ConnectionEvent::Connecting)), "{seen:?}");
    assert!(matches!(seen.get(5), Some(ConnectionEvent::Opened(_))), "{seen:?}");

    manager.shutdown();
}

#[tokio::test]
async fn dropping_manager_inside_tokio_runtime_is_safe() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept client");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (mut manager, events_rx) = manager(format!("ws://{address}/"), ReconnectPolicy::Manual);
    manager.connect();

    let opened = timeout(Duration::from_secs(5), async {
        loop {
            match events_rx.try_recv() {
                Ok(SessionEvent {
                    event: ConnectionEvent::Opened(_),
                    ..
                }) => return true,
                Ok(_) => {}
                Err(TryRecvError::Empty) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    })
    .await;
    assert_eq!(opened, Ok(true), "session never opened");

    drop(manager);

    timeout(Duration::from_secs(5), server)
        .await
        .expect("server saw the client go away")
        .expect("server task");
}
