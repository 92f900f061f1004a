//! Hotkey module for global keyboard event listening
//!
//! Holds the hotkey definition and its storage, the key vocabulary, the
//! accessibility permission check, and the macOS CGEventTap event source.

mod definition;
mod keys;
mod listener;
mod permission;

pub use definition::{CaptureOutcome, CapturedKey, Hotkey, KeyCombo, StoredHotkey};
pub use keys::{codes, BareKey, ModifierFlags, ModifierKey};
pub use listener::{platform_source, EventSource, TapError, UnsupportedSource};
pub use permission::{AccessibilityPermission, PermissionGate};
