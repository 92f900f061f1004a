//! Events flowing into and out of the hotkey engine
//!
//! `InputEvent` is the platform-neutral view of what the event tap observed.
//! `Trigger` is what the classifier hands to the recording controller.

use serde::{Deserialize, Serialize};

use crate::hotkey::ModifierFlags;

/// Disambiguated output of the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Bare modifier held on its own (start hold-to-record)
    Pressed,
    /// Bare modifier released after a press (stop hold-to-record)
    Released,
    /// Combo hotkey hit (start or stop press-to-toggle recording)
    Toggle,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Pressed => write!(f, "PRESSED"),
            Trigger::Released => write!(f, "RELEASED"),
            Trigger::Toggle => write!(f, "TOGGLE"),
        }
    }
}

/// Raw keyboard observation forwarded by an event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Modifier flag set changed. `key_code` is the modifier key that caused it.
    FlagsChanged {
        flags: ModifierFlags,
        key_code: u16,
    },
    /// A non-modifier key went down
    KeyDown {
        key_code: u16,
        flags: ModifierFlags,
        is_repeat: bool,
    },
}

#[cfg(test)]
impl InputEvent {
    /// Shorthand for a flags change with no particular originating key
    pub fn flags(flags: ModifierFlags) -> Self {
        InputEvent::FlagsChanged { flags, key_code: 0 }
    }

    /// Shorthand for a non-repeat key press
    pub fn key_down(key_code: u16, flags: ModifierFlags) -> Self {
        InputEvent::KeyDown {
            key_code,
            flags,
            is_repeat: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_serialization() {
        let json = serde_json::to_string(&Trigger::Pressed).unwrap();
        assert_eq!(json, r#""pressed""#);

        let trigger: Trigger = serde_json::from_str(r#""toggle""#).unwrap();
        assert_eq!(trigger, Trigger::Toggle);
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::Released.to_string(), "RELEASED");
    }

    #[test]
    fn test_key_down_shorthand() {
        let event = InputEvent::key_down(8, ModifierFlags::default());
        assert!(matches!(
            event,
            InputEvent::KeyDown { key_code: 8, is_repeat: false, .. }
        ));
    }
}
