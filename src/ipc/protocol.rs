//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::Trigger;
use crate::hotkey::{Hotkey, StoredHotkey};

/// Largest message body either side will accept
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI (or recording controller) to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Request the active hotkey
    GetHotkey,

    /// Replace the active hotkey and persist it
    SetHotkey { hotkey: StoredHotkey },

    /// Go back to the default (fn/globe) hotkey
    ResetHotkey,

    /// Use the next key press as the new hotkey
    CaptureHotkey,

    /// Ask for accessibility permission (may prompt) and start listening
    RequestPermission,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to trigger notifications
    Subscribe,
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// The active hotkey
    Hotkey { hotkey: StoredHotkey, label: String },

    /// Capture ended with Escape; the hotkey is unchanged
    CaptureCancelled,

    /// Permission state after a request
    Permission { authorized: bool, listening: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn hotkey(hotkey: &Hotkey) -> Self {
        Response::Hotkey {
            hotkey: hotkey.to_stored(),
            label: hotkey.to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The hotkey fired
    Trigger { trigger: Trigger },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Active hotkey record
    pub hotkey: StoredHotkey,

    /// Human-readable hotkey
    pub hotkey_label: String,

    /// Whether the event tap is installed
    pub listening: bool,

    /// Whether accessibility permission is granted
    pub authorized: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(hotkey: &Hotkey, listening: bool, authorized: bool, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hotkey: hotkey.to_stored(),
            hotkey_label: hotkey.to_string(),
            listening,
            authorized,
            uptime_secs,
        }
    }
}
