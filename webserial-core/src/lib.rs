use std::{collections::VecDeque, fmt, time::Duration};

use thiserror::Error;
use url::Url;

pub const DEFAULT_WS_URL: &str = "ws://192.168.4.1:81/";
pub const DEFAULT_RETRY_SECS: u64 = 5;
pub const MIN_RETRY_SECS: u64 = 1;
pub const MAX_LOG_ENTRIES: usize = 10_000;
pub const SERIAL_PREFIX: &str = "[Serial]";
pub const ERROR_PREFIX: &str = "[Error]";
pub const WARNING_PREFIX: &str = "[Warning]";

/// Close code reported when the socket drops without a close handshake.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Display category of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Serial,
    User,
    System,
    Error,
    Warning,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Serial => "serial",
            Tag::User => "user",
            Tag::System => "system",
            Tag::Error => "error",
            Tag::Warning => "warning",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub text: String,
    pub tag: Tag,
}

/// Append-only tagged log plus the sent/received counters shown next to it.
///
/// Entries are never edited or removed one by one; the only ways out are
/// [`MessageLog::clear`] and the oldest-first trim past [`MAX_LOG_ENTRIES`].
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    sent: u64,
    received: u64,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>, tag: Tag) {
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            text: text.into(),
            tag,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn record_sent(&mut self) {
        self.sent = self.sent.saturating_add(1);
    }

    pub fn record_received(&mut self) {
        self.received = self.received.saturating_add(1);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sent = 0;
        self.received = 0;
    }
}

/// Picks the display tag for an inbound device frame.
///
/// Matching is a literal, case-sensitive prefix check. Frames without a known
/// prefix return `None` and are not shown.
pub fn classify(text: &str) -> Option<Tag> {
    if text.starts_with(SERIAL_PREFIX) {
        Some(Tag::Serial)
    } else if text.starts_with(ERROR_PREFIX) {
        Some(Tag::Error)
    } else if text.starts_with(WARNING_PREFIX) {
        Some(Tag::Warning)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Wait for the user to press Reconnect.
    #[default]
    Manual,
    /// Retry forever after every close or failed attempt.
    Fixed(Duration),
}

impl ReconnectPolicy {
    pub fn retry_delay(self) -> Option<Duration> {
        match self {
            ReconnectPolicy::Manual => None,
            ReconnectPolicy::Fixed(delay) => Some(delay),
        }
    }

    pub fn is_manual(self) -> bool {
        self == ReconnectPolicy::Manual
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("retry delay must be at least 1s, got {0}s")]
    RetryDelayTooShort(u64),
}

pub fn parse_endpoint(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(CoreError::UnsupportedScheme(other.to_owned())),
    }
}

pub fn reconnect_policy(
    auto_reconnect: bool,
    retry_secs: u64,
) -> Result<ReconnectPolicy, CoreError> {
    if !auto_reconnect {
        return Ok(ReconnectPolicy::Manual);
    }
    if retry_secs < MIN_RETRY_SECS {
        return Err(CoreError::RetryDelayTooShort(retry_secs));
    }
    Ok(ReconnectPolicy::Fixed(Duration::from_secs(retry_secs)))
}
