use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use webserial_sim::{AppState, serve};

#[derive(Parser, Debug)]
#[command(name = "webserial-sim", about = "Simulated ESP32 WebSerial endpoint")]
struct SimArgs {
    #[arg(long, default_value = "0.0.0.0:81")]
    bind_address: String,

    /// Period of the `[Serial] uptime` heartbeat.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(10..))]
    interval_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = SimArgs::parse();
    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!(
        interval_ms = args.interval_ms,
        "simulator starting on {}", args.bind_address
    );
    let state = AppState::new(Duration::from_millis(args.interval_ms));
    if let Err(err) = serve(listener, state).await {
        warn!("simulator exited: {}", err);
    }
}
