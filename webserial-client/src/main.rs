#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use clap::Parser;
use eframe::egui;
use tracing::{error, info};
use webserial_client::{
    app::GatewayApp,
    cli::{ClientArgs, resolve_config},
    connection::ConnectionManager,
    logging::init_logging,
    ui_layout::{WINDOW_DEFAULT_H, WINDOW_DEFAULT_W, WINDOW_MIN_H, WINDOW_MIN_W, WINDOW_TITLE},
};

fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.as_deref());

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {}", err);
            eprintln!("webserial-gateway: {err}");
            std::process::exit(2);
        }
    };

    info!(url = %config.url, policy = ?config.policy, "starting gateway");

    let (events_tx, events_rx) = std::sync::mpsc::channel();
    let manager = match ConnectionManager::new(config, events_tx) {
        Ok(manager) => manager,
        Err(err) => {
            error!("failed to start connection manager: {}", err);
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size([WINDOW_DEFAULT_W, WINDOW_DEFAULT_H])
            .with_min_inner_size([WINDOW_MIN_W, WINDOW_MIN_H]),
        ..Default::default()
    };

    let result = eframe::run_native(
        WINDOW_TITLE,
        options,
        Box::new(move |cc| Ok(Box::new(GatewayApp::new(cc, manager, events_rx)))),
    );

    if let Err(err) = result {
        error!("window loop failed: {}", err);
        std::process::exit(1);
    }
    info!("gateway closed");
}
