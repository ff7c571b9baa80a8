pub mod app;
pub mod cli;
pub mod connection;
pub mod logging;
pub mod shell;
pub mod ui_layout;
