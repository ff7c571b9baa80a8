use std::{sync::mpsc::Receiver, time::Duration};

use eframe::egui::{self, RichText};
use tracing::{debug, info};

use crate::{
    connection::{ConnectionManager, SessionEvent},
    shell::{SendOutcome, Shell},
    ui_layout::{self, BUTTON_MIN_W, STATUS_DOT_RADIUS, WINDOW_TITLE},
};

/// How often the window wakes up to drain connection events while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct GatewayApp {
    shell: Shell,
    manager: ConnectionManager,
    events_rx: Receiver<SessionEvent>,
    focus_input: bool,
}

impl GatewayApp {
    /// Takes ownership of the manager and kicks off the first connection attempt.
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        mut manager: ConnectionManager,
        events_rx: Receiver<SessionEvent>,
    ) -> Self {
        ui_layout::apply_theme(&cc.egui_ctx);
        let shell = Shell::new(manager.config().policy);
        manager.connect();
        Self {
            shell,
            manager,
            events_rx,
            focus_input: true,
        }
    }

    fn poll_connection_events(&mut self) {
        while let Ok(SessionEvent { session, event }) = self.events_rx.try_recv() {
            if !self.manager.is_current(session) {
                debug!(session, "dropping event from superseded session");
                continue;
            }
            self.shell.apply(event);
        }
    }

    fn show_header(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading(RichText::new(WINDOW_TITLE).strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let size = egui::vec2(STATUS_DOT_RADIUS * 2.0 + 4.0, STATUS_DOT_RADIUS * 2.0 + 4.0);
                let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
                ui.painter().circle_filled(
                    rect.center(),
                    STATUS_DOT_RADIUS,
                    ui_layout::status_color(self.shell.state()),
                );
                ui.label(self.shell.state().label());
            });
        });
    }

    fn show_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let log = self.shell.log();
            ui.label(format!("Sent: {}", log.sent()));
            ui.add_space(10.0);
            ui.label(format!("Received: {}", log.received()));

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui
                    .add(egui::Button::new("Clear").min_size(egui::vec2(BUTTON_MIN_W, 0.0)))
                    .clicked()
                {
                    self.shell.clear();
                }

                if self.shell.reconnect_visible()
                    && ui
                        .add(egui::Button::new("Reconnect").min_size(egui::vec2(BUTTON_MIN_W, 0.0)))
                        .clicked()
                {
                    info!("manual reconnect requested");
                    self.manager.connect();
                }
            });
        });
    }

    fn show_input(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let send_clicked = ui
                    .add(
                        egui::Button::new(RichText::new("Send").strong())
                            .fill(ui_layout::ACCENT)
                            .min_size(egui::vec2(BUTTON_MIN_W, 0.0)),
                    )
                    .clicked();

                let response = ui.add(
                    egui::TextEdit::singleline(self.shell.input_mut())
                        .font(egui::TextStyle::Monospace)
                        .hint_text("Type a command and press Enter")
                        .desired_width(ui.available_width()),
                );
                if self.focus_input {
                    response.request_focus();
                    self.focus_input = false;
                }

                let enter_pressed =
                    response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if send_clicked || enter_pressed {
                    let outcome = self.shell.submit();
                    if outcome != SendOutcome::Empty {
                        debug!(?outcome, "send requested");
                    }
                    self.focus_input = true;
                }
            });
        });
    }

    fn show_log(&self, ui: &mut egui::Ui) {
        egui::Frame::default()
            .fill(ui_layout::LOG_BG)
            .inner_margin(egui::Margin::same(12))
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for entry in self.shell.log().iter() {
                            let (fg, bg) = ui_layout::tag_colors(entry.tag);
                            ui.label(
                                RichText::new(&entry.text)
                                    .monospace()
                                    .color(fg)
                                    .background_color(bg),
                            );
                        }
                    });
            });
    }
}

impl eframe::App for GatewayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_connection_events();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(8.0);
            self.show_header(ui);
            ui.add_space(6.0);
            self.show_controls(ui);
            ui.add_space(8.0);
        });

        egui::TopBottomPanel::bottom("input").show(ctx, |ui| {
            ui.add_space(10.0);
            self.show_input(ui);
            ui.add_space(10.0);
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::central_panel(&ctx.style()).fill(ui_layout::BG))
            .show(ctx, |ui| {
                self.show_log(ui);
            });

        ctx.request_repaint_after(POLL_INTERVAL);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("window closing");
        self.manager.shutdown();
    }
}
