//! Hotkey classification
//!
//! Platform-independent state machine that decides whether raw keyboard
//! events amount to a hotkey trigger:
//! - Combo hotkeys toggle on an exact key + modifier match
//! - Bare modifier hotkeys press after a short confirm delay and release
//!   on key up, unless the modifier was used with another key

mod machine;
mod timer;

pub use machine::{HotkeyClassifier, CONFIRM_DELAY};
