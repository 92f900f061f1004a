//! Key vocabulary: modifier keys, flag snapshots and virtual key codes
//!
//! Provides the macOS virtual key codes the engine cares about, the
//! persisted modifier bitmask, and a struct for tracking which modifier
//! flags are currently set.

/// macOS virtual key codes (Carbon `kVK_*` values)
pub mod codes {
    pub const RETURN: u16 = 0x24;
    pub const TAB: u16 = 0x30;
    pub const SPACE: u16 = 0x31;
    pub const DELETE: u16 = 0x33;
    pub const ESCAPE: u16 = 0x35;
    pub const RIGHT_COMMAND: u16 = 0x36;
    pub const COMMAND: u16 = 0x37;
    pub const SHIFT: u16 = 0x38;
    pub const OPTION: u16 = 0x3A;
    pub const CONTROL: u16 = 0x3B;
    pub const RIGHT_SHIFT: u16 = 0x3C;
    pub const RIGHT_OPTION: u16 = 0x3D;
    pub const RIGHT_CONTROL: u16 = 0x3E;
    pub const FUNCTION: u16 = 0x3F;
    pub const F17: u16 = 0x40;
    pub const F18: u16 = 0x4F;
    pub const F19: u16 = 0x50;
    pub const F20: u16 = 0x5A;
    pub const F5: u16 = 0x60;
    pub const F6: u16 = 0x61;
    pub const F7: u16 = 0x62;
    pub const F3: u16 = 0x63;
    pub const F8: u16 = 0x64;
    pub const F9: u16 = 0x65;
    pub const F11: u16 = 0x67;
    pub const F13: u16 = 0x69;
    pub const F16: u16 = 0x6A;
    pub const F14: u16 = 0x6B;
    pub const F10: u16 = 0x6D;
    pub const F12: u16 = 0x6F;
    pub const F15: u16 = 0x71;
    pub const HELP: u16 = 0x72;
    pub const HOME: u16 = 0x73;
    pub const PAGE_UP: u16 = 0x74;
    pub const FORWARD_DELETE: u16 = 0x75;
    pub const F4: u16 = 0x76;
    pub const END: u16 = 0x77;
    pub const F2: u16 = 0x78;
    pub const PAGE_DOWN: u16 = 0x79;
    pub const F1: u16 = 0x7A;
    pub const LEFT_ARROW: u16 = 0x7B;
    pub const RIGHT_ARROW: u16 = 0x7C;
    pub const DOWN_ARROW: u16 = 0x7D;
    pub const UP_ARROW: u16 = 0x7E;
}

/// The four combinable modifier keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierKey {
    Command,
    Option,
    Shift,
    Control,
}

impl ModifierKey {
    pub const ALL: [ModifierKey; 4] = [
        ModifierKey::Command,
        ModifierKey::Option,
        ModifierKey::Shift,
        ModifierKey::Control,
    ];

    /// Bit used for this key in the persisted modifier mask
    pub fn bit(self) -> u8 {
        match self {
            ModifierKey::Command => 1 << 0,
            ModifierKey::Option => 1 << 1,
            ModifierKey::Shift => 1 << 2,
            ModifierKey::Control => 1 << 3,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            ModifierKey::Command => "⌘",
            ModifierKey::Option => "⌥",
            ModifierKey::Shift => "⇧",
            ModifierKey::Control => "⌃",
        }
    }
}

/// Set of combinable modifiers, stored as the `{command=1, option=2, shift=4, control=8}` mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierSet(u8);

impl ModifierSet {
    const KNOWN_BITS: u8 = 0b1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Rebuild a set from a persisted mask. Unknown bits make the mask invalid.
    pub fn from_bits(bits: i64) -> Option<Self> {
        u8::try_from(bits)
            .ok()
            .filter(|b| b & !Self::KNOWN_BITS == 0)
            .map(Self)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn with(self, key: ModifierKey) -> Self {
        Self(self.0 | key.bit())
    }

    pub fn contains(self, key: ModifierKey) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Glyphs in the conventional macOS order: ⌃⌥⇧⌘
    pub fn display_string(self) -> String {
        [
            ModifierKey::Control,
            ModifierKey::Option,
            ModifierKey::Shift,
            ModifierKey::Command,
        ]
        .into_iter()
        .filter(|key| self.contains(*key))
        .map(ModifierKey::glyph)
        .collect()
    }
}

impl FromIterator<ModifierKey> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = ModifierKey>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// A key that can act as a hotkey on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BareKey {
    /// The fn/globe key. Not combinable, so it sits outside `ModifierKey`.
    #[default]
    Function,
    Command,
    Option,
    Shift,
    Control,
}

impl BareKey {
    /// The combinable modifier this key corresponds to, if any
    pub fn modifier(self) -> Option<ModifierKey> {
        match self {
            BareKey::Function => None,
            BareKey::Command => Some(ModifierKey::Command),
            BareKey::Option => Some(ModifierKey::Option),
            BareKey::Shift => Some(ModifierKey::Shift),
            BareKey::Control => Some(ModifierKey::Control),
        }
    }

    /// Virtual key codes of the physical keys that drive this flag
    pub fn key_codes(self) -> &'static [u16] {
        match self {
            BareKey::Function => &[codes::FUNCTION],
            BareKey::Command => &[codes::COMMAND, codes::RIGHT_COMMAND],
            BareKey::Option => &[codes::OPTION, codes::RIGHT_OPTION],
            BareKey::Shift => &[codes::SHIFT, codes::RIGHT_SHIFT],
            BareKey::Control => &[codes::CONTROL, codes::RIGHT_CONTROL],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BareKey::Function => "Fn key",
            BareKey::Command => "⌘ Command",
            BareKey::Option => "⌥ Option",
            BareKey::Shift => "⇧ Shift",
            BareKey::Control => "⌃ Control",
        }
    }
}

/// Snapshot of the modifier flags carried by a keyboard event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierFlags {
    pub control: bool,
    pub option: bool,
    pub shift: bool,
    pub command: bool,
    /// Secondary-function (fn/globe) flag
    pub function: bool,
}

impl ModifierFlags {
    /// Create a ModifierFlags snapshot from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_cg_flags(flags: core_graphics::event::CGEventFlags) -> Self {
        use core_graphics::event::CGEventFlags;

        Self {
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
            function: flags.contains(CGEventFlags::CGEventFlagSecondaryFn),
        }
    }

    /// Builder used when composing snapshots by hand
    #[cfg(test)]
    pub fn with(mut self, key: BareKey) -> Self {
        self.set(key, true);
        self
    }

    pub fn is_set(&self, key: BareKey) -> bool {
        match key {
            BareKey::Function => self.function,
            BareKey::Command => self.command,
            BareKey::Option => self.option,
            BareKey::Shift => self.shift,
            BareKey::Control => self.control,
        }
    }

    #[cfg(test)]
    fn set(&mut self, key: BareKey, value: bool) {
        match key {
            BareKey::Function => self.function = value,
            BareKey::Command => self.command = value,
            BareKey::Option => self.option = value,
            BareKey::Shift => self.shift = value,
            BareKey::Control => self.control = value,
        }
    }

    /// Combinable modifiers only; the function flag is not part of a combo
    pub fn modifiers(&self) -> ModifierSet {
        ModifierKey::ALL
            .into_iter()
            .filter(|key| match key {
                ModifierKey::Command => self.command,
                ModifierKey::Option => self.option,
                ModifierKey::Shift => self.shift,
                ModifierKey::Control => self.control,
            })
            .collect()
    }

    /// True if a flag other than `target` is set now but was not in `previous`
    pub fn other_became_active(&self, previous: &ModifierFlags, target: BareKey) -> bool {
        [
            BareKey::Function,
            BareKey::Command,
            BareKey::Option,
            BareKey::Shift,
            BareKey::Control,
        ]
        .into_iter()
        .filter(|key| *key != target)
        .any(|key| self.is_set(key) && !previous.is_set(key))
    }
}

/// Fixed label for keys that have no useful printable character
pub fn named_key_label(key_code: u16) -> Option<&'static str> {
    let label = match key_code {
        codes::RETURN => "Return",
        codes::TAB => "Tab",
        codes::SPACE => "Space",
        codes::DELETE => "Delete",
        codes::ESCAPE => "Esc",
        codes::FORWARD_DELETE => "Forward Delete",
        codes::HELP => "Help",
        codes::HOME => "Home",
        codes::END => "End",
        codes::PAGE_UP => "Page Up",
        codes::PAGE_DOWN => "Page Down",
        codes::LEFT_ARROW => "Left",
        codes::RIGHT_ARROW => "Right",
        codes::DOWN_ARROW => "Down",
        codes::UP_ARROW => "Up",
        codes::F1 => "F1",
        codes::F2 => "F2",
        codes::F3 => "F3",
        codes::F4 => "F4",
        codes::F5 => "F5",
        codes::F6 => "F6",
        codes::F7 => "F7",
        codes::F8 => "F8",
        codes::F9 => "F9",
        codes::F10 => "F10",
        codes::F11 => "F11",
        codes::F12 => "F12",
        codes::F13 => "F13",
        codes::F14 => "F14",
        codes::F15 => "F15",
        codes::F16 => "F16",
        codes::F17 => "F17",
        codes::F18 => "F18",
        codes::F19 => "F19",
        codes::F20 => "F20",
        _ => return None,
    };
    Some(label)
}

/// Unmodified character for a key on the ANSI US layout
///
/// The event tap has no access to the active keyboard layout, so this is
/// a best-effort stand-in for "characters ignoring modifiers".
pub fn ansi_character(key_code: u16) -> Option<&'static str> {
    let ch = match key_code {
        0x00 => "a",
        0x01 => "s",
        0x02 => "d",
        0x03 => "f",
        0x04 => "h",
        0x05 => "g",
        0x06 => "z",
        0x07 => "x",
        0x08 => "c",
        0x09 => "v",
        0x0B => "b",
        0x0C => "q",
        0x0D => "w",
        0x0E => "e",
        0x0F => "r",
        0x10 => "y",
        0x11 => "t",
        0x12 => "1",
        0x13 => "2",
        0x14 => "3",
        0x15 => "4",
        0x16 => "6",
        0x17 => "5",
        0x18 => "=",
        0x19 => "9",
        0x1A => "7",
        0x1B => "-",
        0x1C => "8",
        0x1D => "0",
        0x1E => "]",
        0x1F => "o",
        0x20 => "u",
        0x21 => "[",
        0x22 => "i",
        0x23 => "p",
        0x25 => "l",
        0x26 => "j",
        0x27 => "'",
        0x28 => "k",
        0x29 => ";",
        0x2A => "\\",
        0x2B => ",",
        0x2C => "/",
        0x2D => "n",
        0x2E => "m",
        0x2F => ".",
        0x32 => "`",
        _ => return None,
    };
    Some(ch)
}
