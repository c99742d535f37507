//! User-facing status notices
//!
//! The connection manager reports lifecycle changes as short notices, the way a UI would
//! show toasts. Where they end up is decided by the [`NoticeSink`] handed to the manager.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "success",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        f.write_str(label)
    }
}

/// A single user-facing notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Persistent notices stay until the user dismisses them
    pub persistent: bool,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self::dismissible(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::dismissible(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::dismissible(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::dismissible(NoticeLevel::Error, message)
    }

    /// Mark the notice as persistent
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    fn dismissible(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            persistent: false,
        }
    }
}

/// Destination for notices
pub trait NoticeSink: Send + Sync + 'static {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => info!("[{}] {}", notice.level, notice.message),
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
    }
}

/// Forwards notices to a channel, typically drained by a UI layer
#[derive(Debug, Clone)]
pub struct ChannelNoticeSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNoticeSink {
    /// Create a sink and the receiver that gets every notice
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NoticeSink for ChannelNoticeSink {
    fn notify(&self, notice: Notice) {
        // Nobody listening any more is not an error
        let _ = self.tx.send(notice);
    }
}
