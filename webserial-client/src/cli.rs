//! Command-line surface of the gateway binary.

use std::path::PathBuf;

use clap::Parser;
use webserial_core::{DEFAULT_RETRY_SECS, DEFAULT_WS_URL, parse_endpoint, reconnect_policy};

use crate::connection::ConnectionConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "webserial-gateway", about = "Desktop console for an ESP32 WebSerial bridge")]
pub struct ClientArgs {
    #[arg(long, default_value = DEFAULT_WS_URL)]
    pub url: String,

    /// Retry automatically after every disconnect instead of showing a Reconnect button.
    #[arg(long, default_value_t = false)]
    pub auto_reconnect: bool,

    /// Delay between automatic retries.
    #[arg(long, default_value_t = DEFAULT_RETRY_SECS, requires = "auto_reconnect")]
    pub retry_secs: u64,

    /// Write diagnostics to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub fn resolve_config(args: &ClientArgs) -> Result<ConnectionConfig, String> {
    let url = parse_endpoint(&args.url).map_err(|err| err.to_string())?;
    let policy =
        reconnect_policy(args.auto_reconnect, args.retry_secs).map_err(|err| err.to_string())?;
    Ok(ConnectionConfig {
        url: url.to_string(),
        policy,
    })
}
