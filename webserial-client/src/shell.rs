//! Headless state behind the gateway window.
//!
//! [`Shell`] holds everything the window shows and every user action the
//! window can trigger, so the egui layer only renders it and forwards clicks.

use std::time::Duration;

use tracing::{debug, warn};
use webserial_core::{ConnectionState, MessageLog, ReconnectPolicy, Tag, classify};

use crate::connection::{ConnectionEvent, Link};

pub const NOT_CONNECTED_NOTICE: &str = "[System] Not connected - message not sent";
pub const CONNECTING_NOTICE: &str = "[System] Attempting to connect...";
pub const OPENED_NOTICE: &str = "[System] WebSocket connection established";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input was blank; nothing happened.
    Empty,
    Sent,
    NotConnected,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct Shell {
    state: ConnectionState,
    log: MessageLog,
    link: Option<Link>,
    policy: ReconnectPolicy,
    input: String,
}

impl Shell {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    /// True only while the socket is open and its writer is still alive.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected() && self.link.as_ref().is_some_and(Link::is_open)
    }

    pub fn reconnect_visible(&self) -> bool {
        self.policy.is_manual() && self.state == ConnectionState::Disconnected
    }

    pub fn apply(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting => {
                self.state = ConnectionState::Connecting;
                self.link = None;
                self.log.push(CONNECTING_NOTICE, Tag::System);
            }
            ConnectionEvent::Opened(link) => {
                self.state = ConnectionState::Connected;
                self.link = Some(link);
                self.log.push(OPENED_NOTICE, Tag::System);
            }
            ConnectionEvent::Message(text) => {
                self.log.record_received();
                match classify(&text) {
                    Some(tag) => self.log.push(text, tag),
                    None => debug!(len = text.len(), "untagged frame not shown"),
                }
            }
            ConnectionEvent::Closed { code, reason } => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                self.log.push(close_notice(code, &reason), Tag::System);
            }
            ConnectionEvent::Error(err) => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                self.log
                    .push(format!("[System] WebSocket error: {err}"), Tag::Error);
            }
            ConnectionEvent::RetryScheduled(delay) => {
                self.log.push(retry_notice(delay), Tag::System);
            }
        }
    }

    /// Sends the current input to the device.
    pub fn submit(&mut self) -> SendOutcome {
        let text = self.input.trim().to_owned();
        if text.is_empty() {
            return SendOutcome::Empty;
        }

        let link = match self.link.as_ref() {
            Some(link) if self.state.is_connected() && link.is_open() => link,
            _ => {
                self.log.push(NOT_CONNECTED_NOTICE, Tag::Warning);
                return SendOutcome::NotConnected;
            }
        };

        match link.send(&text) {
            Ok(()) => {
                self.log.record_sent();
                self.log.push(format!("[You] {text}"), Tag::User);
                self.input.clear();
                SendOutcome::Sent
            }
            Err(err) => {
                warn!("send failed: {err}");
                self.log
                    .push(format!("[System] Failed to send message: {err}"), Tag::Error);
                SendOutcome::Failed(err.to_string())
            }
        }
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }
}

pub fn close_notice(code: Option<u16>, reason: &str) -> String {
    let code = code.map_or_else(|| "None".to_owned(), |c| c.to_string());
    format!("[System] Connection closed (Code: {code}, Message: {reason})")
}

fn retry_notice(delay: Duration) -> String {
    format!("[System] Retrying in {}s...", delay.as_secs_f32())
}
