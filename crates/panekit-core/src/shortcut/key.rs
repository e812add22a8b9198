use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("empty key combination")]
    Empty,
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    #[error("unknown key '{0}'")]
    UnknownKey(String),
}

/// Modifier set, stored as bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Modifiers {
    bits: u8,
}

impl Modifiers {
    pub const NONE: Self = Self { bits: 0 };
    pub const CTRL: Self = Self { bits: 1 << 0 };
    pub const ALT: Self = Self { bits: 1 << 1 };
    pub const SHIFT: Self = Self { bits: 1 << 2 };
    pub const META: Self = Self { bits: 1 << 3 };

    pub fn with(mut self, other: Modifiers) -> Self {
        self.bits |= other.bits;
        self
    }

    pub fn contains(&self, other: Modifiers) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ctrl" | "control" => Some(Self::CTRL),
            "alt" | "option" => Some(Self::ALT),
            "shift" => Some(Self::SHIFT),
            "meta" | "super" | "cmd" | "win" => Some(Self::META),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Printable character, stored lowercase
    Char(char),
    Tab,
    Enter,
    Escape,
    Space,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    F(u8),
}

impl Key {
    fn from_name(name: &str) -> Option<Self> {
        let key = match name {
            "tab" => Key::Tab,
            "enter" | "return" => Key::Enter,
            "esc" | "escape" => Key::Escape,
            "space" => Key::Space,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            _ => {
                if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=24).contains(&n) {
                        return Some(Key::F(n));
                    }
                }
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c.to_ascii_lowercase()),
                    _ => return None,
                }
            }
        };
        Some(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{c}"),
            Key::Tab => f.write_str("tab"),
            Key::Enter => f.write_str("enter"),
            Key::Escape => f.write_str("esc"),
            Key::Space => f.write_str("space"),
            Key::Backspace => f.write_str("backspace"),
            Key::Delete => f.write_str("delete"),
            Key::Up => f.write_str("up"),
            Key::Down => f.write_str("down"),
            Key::Left => f.write_str("left"),
            Key::Right => f.write_str("right"),
            Key::Home => f.write_str("home"),
            Key::End => f.write_str("end"),
            Key::PageUp => f.write_str("pageup"),
            Key::PageDown => f.write_str("pagedown"),
            Key::F(n) => write!(f, "f{n}"),
        }
    }
}

/// A key plus modifiers, written as `ctrl+shift+t` in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub fn plain(key: Key) -> Self {
        Self::new(key, Modifiers::NONE)
    }
}

impl FromStr for KeyCombo {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(KeyParseError::Empty);
        }
        // "ctrl++" binds the plus key itself.
        let (mods, key) = match normalized.strip_suffix("++") {
            Some(head) => (head, "+"),
            None => match normalized.rsplit_once('+') {
                Some((head, key)) => (head, key),
                None => ("", normalized.as_str()),
            },
        };

        let mut modifiers = Modifiers::NONE;
        for part in mods.split('+').filter(|p| !p.is_empty()) {
            let m = Modifiers::from_name(part.trim())
                .ok_or_else(|| KeyParseError::UnknownModifier(part.to_string()))?;
            modifiers = modifiers.with(m);
        }
        let key = Key::from_name(key.trim()).ok_or_else(|| KeyParseError::UnknownKey(key.to_string()))?;
        Ok(Self { key, modifiers })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CTRL, "ctrl"),
            (Modifiers::ALT, "alt"),
            (Modifiers::SHIFT, "shift"),
            (Modifiers::META, "meta"),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{}", self.key)
    }
}

/// A key press as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub combo: KeyCombo,
    /// Set for auto-repeat events generated while the key is held
    pub repeat: bool,
}

impl KeyEvent {
    pub fn press(combo: KeyCombo) -> Self {
        Self {
            combo,
            repeat: false,
        }
    }

    pub fn repeat(combo: KeyCombo) -> Self {
        Self { combo, repeat: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_in_any_order() {
        let a: KeyCombo = "ctrl+shift+t".parse().unwrap();
        let b: KeyCombo = "Shift+Ctrl+T".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key, Key::Char('t'));
        assert!(a.modifiers.contains(Modifiers::CTRL | Modifiers::SHIFT));
        assert_eq!(a.to_string(), "ctrl+shift+t");
    }

    #[test]
    fn parses_named_keys() {
        assert_eq!("tab".parse::<KeyCombo>().unwrap(), KeyCombo::plain(Key::Tab));
        assert_eq!(
            "shift+tab".parse::<KeyCombo>().unwrap(),
            KeyCombo::new(Key::Tab, Modifiers::SHIFT)
        );
        assert_eq!("f12".parse::<KeyCombo>().unwrap().key, Key::F(12));
        assert_eq!("ctrl++".parse::<KeyCombo>().unwrap().key, Key::Char('+'));
    }

    #[test]
    fn rejects_unknown_parts() {
        assert_eq!(
            "hyper+x".parse::<KeyCombo>(),
            Err(KeyParseError::UnknownModifier("hyper".into()))
        );
        assert_eq!(
            "ctrl+banana".parse::<KeyCombo>(),
            Err(KeyParseError::UnknownKey("banana".into()))
        );
        assert_eq!("  ".parse::<KeyCombo>(), Err(KeyParseError::Empty));
    }
}
