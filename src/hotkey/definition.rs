//! Hotkey definition, its persisted record, and capture from a live key press

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::keys::{ansi_character, codes, named_key_label, BareKey, ModifierFlags, ModifierSet};
use crate::settings::{SettingsError, SettingsStore};

/// Settings key the hotkey record is stored under
pub const STORAGE_KEY: &str = "recordHotkey";

/// A specific key plus an exact modifier set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub key_code: u16,
    pub modifiers: ModifierSet,
    /// Human-readable key label, never empty
    pub label: String,
}

impl KeyCombo {
    /// Key codes must be equal and the modifier set exactly equal
    pub fn matches(&self, key_code: u16, flags: &ModifierFlags) -> bool {
        self.key_code == key_code && self.modifiers == flags.modifiers()
    }
}

/// The user's recording hotkey
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Hotkey {
    /// A modifier (or the fn/globe key) pressed and released on its own
    Bare(BareKey),
    /// A key combination, fired on key-down
    Combo(KeyCombo),
}

impl Default for Hotkey {
    fn default() -> Self {
        Hotkey::Bare(BareKey::Function)
    }
}

impl std::fmt::Display for Hotkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hotkey::Bare(key) => write!(f, "{}", key.display_name()),
            Hotkey::Combo(combo) => {
                write!(f, "{}{}", combo.modifiers.display_string(), combo.label)
            }
        }
    }
}

/// On-disk (and on-wire) form of a hotkey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHotkey {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_label: Option<String>,
}

impl StoredHotkey {
    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            key_code: None,
            modifiers: None,
            key_label: None,
        }
    }
}

impl Hotkey {
    /// Load the stored hotkey, falling back to the default on any problem
    pub fn load(store: &SettingsStore) -> Self {
        let value = match store.get(STORAGE_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("no stored hotkey, using default");
                return Self::default();
            }
            Err(e) => {
                warn!(?e, "failed to read settings, using default hotkey");
                return Self::default();
            }
        };

        match serde_json::from_value::<StoredHotkey>(value) {
            Ok(stored) => Self::from_stored(stored),
            Err(e) => {
                warn!(?e, "stored hotkey is malformed, using default");
                Self::default()
            }
        }
    }

    /// Persist the hotkey. Failures are logged and otherwise ignored.
    pub fn save(&self, store: &SettingsStore) {
        let result = serde_json::to_value(self.to_stored())
            .map_err(SettingsError::from)
            .and_then(|value| store.set(STORAGE_KEY, value));

        if let Err(e) = result {
            warn!(?e, path = %store.path().display(), hotkey = %self, "failed to save hotkey");
        }
    }

    /// Build a combo hotkey from a key press observed in capture mode
    pub fn capture_from(key: &CapturedKey) -> Self {
        Hotkey::Combo(KeyCombo {
            key_code: key.key_code,
            modifiers: key.flags.modifiers(),
            label: key.label(),
        })
    }

    pub fn to_stored(&self) -> StoredHotkey {
        match self {
            Hotkey::Bare(BareKey::Function) => StoredHotkey::bare("globe"),
            Hotkey::Bare(BareKey::Command) => StoredHotkey::bare("command"),
            Hotkey::Bare(BareKey::Option) => StoredHotkey::bare("option"),
            Hotkey::Bare(BareKey::Shift) => StoredHotkey::bare("shift"),
            Hotkey::Bare(BareKey::Control) => StoredHotkey::bare("control"),
            Hotkey::Combo(combo) => StoredHotkey {
                kind: "custom".to_owned(),
                key_code: Some(i64::from(combo.key_code)),
                modifiers: Some(i64::from(combo.modifiers.bits())),
                key_label: Some(combo.label.clone()),
            },
        }
    }

    /// Degrade any invalid record to the default
    pub fn from_stored(stored: StoredHotkey) -> Self {
        Self::try_from_stored(stored).unwrap_or_default()
    }

    /// Validate a record; `None` when any field is missing or out of range
    pub fn try_from_stored(stored: StoredHotkey) -> Option<Self> {
        let hotkey = match stored.kind.as_str() {
            "globe" => Hotkey::Bare(BareKey::Function),
            "command" => Hotkey::Bare(BareKey::Command),
            "option" => Hotkey::Bare(BareKey::Option),
            "shift" => Hotkey::Bare(BareKey::Shift),
            "control" => Hotkey::Bare(BareKey::Control),
            "custom" => {
                let key_code = u16::try_from(stored.key_code?).ok()?;
                let modifiers = ModifierSet::from_bits(stored.modifiers?)?;
                let label = stored.key_label.filter(|l| !l.is_empty())?;
                Hotkey::Combo(KeyCombo {
                    key_code,
                    modifiers,
                    label,
                })
            }
            _ => return None,
        };
        Some(hotkey)
    }
}

/// One key-down observed while capturing a new hotkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedKey {
    pub key_code: u16,
    pub flags: ModifierFlags,
    /// Characters the key produces ignoring modifiers, if known
    pub characters: Option<String>,
}

impl CapturedKey {
    /// Named key first, then the printable character, then the raw code
    fn label(&self) -> String {
        if let Some(label) = named_key_label(self.key_code) {
            return label.to_owned();
        }

        let printable = self
            .characters
            .as_deref()
            .or_else(|| ansi_character(self.key_code))
            .filter(|s| !s.trim().is_empty() && !s.chars().any(char::is_control));

        match printable {
            Some(chars) => chars.to_uppercase(),
            None => format!("Key {}", self.key_code),
        }
    }
}

/// Result of a capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(Hotkey),
    /// Escape with no modifiers backs out of capture
    Cancelled,
}

impl CaptureOutcome {
    pub fn evaluate(key: &CapturedKey) -> Self {
        if key.key_code == codes::ESCAPE && key.flags.modifiers().is_empty() {
            CaptureOutcome::Cancelled
        } else {
            CaptureOutcome::Captured(Hotkey::capture_from(key))
        }
    }
}
