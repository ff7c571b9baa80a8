use eframe::egui::{self, Color32};
use webserial_core::{ConnectionState, Tag};

pub const WINDOW_TITLE: &str = "ESP32 WebSerial Gateway";

/// Window sizing in logical points.
pub const WINDOW_DEFAULT_W: f32 = 800.0;
pub const WINDOW_DEFAULT_H: f32 = 600.0;
pub const WINDOW_MIN_W: f32 = 700.0;
pub const WINDOW_MIN_H: f32 = 500.0;

pub const STATUS_DOT_RADIUS: f32 = 5.0;
pub const BUTTON_MIN_W: f32 = 90.0;

pub const BG: Color32 = Color32::from_rgb(0x1e, 0x29, 0x3b);
pub const CARD: Color32 = Color32::from_rgb(0x33, 0x41, 0x55);
pub const LOG_BG: Color32 = Color32::from_rgb(0x47, 0x55, 0x69);
pub const TEXT: Color32 = Color32::from_rgb(0xf8, 0xfa, 0xfc);
pub const ACCENT: Color32 = Color32::from_rgb(0x3b, 0x82, 0xf6);
pub const SUCCESS: Color32 = Color32::from_rgb(0x10, 0xb9, 0x81);
pub const ERROR: Color32 = Color32::from_rgb(0xef, 0x44, 0x44);
pub const WARNING: Color32 = Color32::from_rgb(0xf5, 0x9e, 0x0b);

/// Foreground and background of a log line.
pub fn tag_colors(tag: Tag) -> (Color32, Color32) {
    match tag {
        Tag::Serial => (
            Color32::from_rgb(0x86, 0xef, 0xac),
            Color32::from_rgb(0x06, 0x4e, 0x3b),
        ),
        Tag::User => (
            Color32::from_rgb(0x93, 0xc5, 0xfd),
            Color32::from_rgb(0x1e, 0x40, 0xaf),
        ),
        Tag::System => (
            Color32::from_rgb(0xd1, 0xd5, 0xdb),
            Color32::from_rgb(0x4b, 0x55, 0x63),
        ),
        Tag::Error => (
            Color32::from_rgb(0xfc, 0xa5, 0xa5),
            Color32::from_rgb(0x7f, 0x1d, 0x1d),
        ),
        Tag::Warning => (
            Color32::from_rgb(0xfd, 0xe6, 0x8a),
            Color32::from_rgb(0x92, 0x40, 0x0e),
        ),
    }
}

pub fn status_color(state: ConnectionState) -> Color32 {
    match state {
        ConnectionState::Disconnected => ERROR,
        ConnectionState::Connecting => WARNING,
        ConnectionState::Connected => SUCCESS,
    }
}

pub fn apply_theme(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = CARD;
    visuals.window_fill = CARD;
    visuals.extreme_bg_color = LOG_BG;
    visuals.override_text_color = Some(TEXT);
    visuals.selection.bg_fill = ACCENT;
    ctx.set_visuals(visuals);
}
