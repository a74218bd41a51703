use crate::config::BindingConfig;
use anyhow::{bail, Result};

/// Modifier bit set. Left and right variants are not distinguished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const CTRL: Self = Self(1);
    pub const ALT: Self = Self(1 << 1);
    pub const SHIFT: Self = Self(1 << 2);
    pub const SUPER: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// evdev codes of the left-hand key for each set modifier.
    pub fn keycodes(self) -> Vec<u16> {
        [
            (Self::CTRL, KEY_LEFTCTRL),
            (Self::ALT, KEY_LEFTALT),
            (Self::SHIFT, KEY_LEFTSHIFT),
            (Self::SUPER, KEY_LEFTMETA),
        ]
        .into_iter()
        .filter(|(m, _)| self.contains(*m))
        .map(|(_, code)| code)
        .collect()
    }
}

/// A key plus the exact set of modifiers that must be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub code: u16,
    pub modifiers: Modifiers,
}

const KEY_LEFTCTRL: u16 = 29;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_LEFTALT: u16 = 56;
const KEY_LEFTMETA: u16 = 125;

/// Map a modifier keycode to its modifier bit.
pub fn keycode_to_modifier(code: u16) -> Option<Modifiers> {
    match code {
        29 | 97 => Some(Modifiers::CTRL),   // KEY_LEFTCTRL, KEY_RIGHTCTRL
        56 | 100 => Some(Modifiers::ALT),   // KEY_LEFTALT, KEY_RIGHTALT
        42 | 54 => Some(Modifiers::SHIFT),  // KEY_LEFTSHIFT, KEY_RIGHTSHIFT
        125 | 126 => Some(Modifiers::SUPER), // KEY_LEFTMETA, KEY_RIGHTMETA
        _ => None,
    }
}

pub fn modifier_from_name(name: &str) -> Option<Modifiers> {
    match name.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => Some(Modifiers::CTRL),
        "alt" | "option" | "opt" => Some(Modifiers::ALT),
        "shift" => Some(Modifiers::SHIFT),
        "super" | "meta" | "cmd" | "command" | "win" => Some(Modifiers::SUPER),
        _ => None,
    }
}

/// Map a key name to an evdev keycode (Linux input-event-codes.h).
pub fn keycode_from_name(name: &str) -> Option<u16> {
    let name = name.to_ascii_lowercase();
    let code = match name.as_str() {
        "esc" | "escape" => 1,
        "1" => 2,
        "2" => 3,
        "3" => 4,
        "4" => 5,
        "5" => 6,
        "6" => 7,
        "7" => 8,
        "8" => 9,
        "9" => 10,
        "0" => 11,
        "tab" => 15,
        "q" => 16,
        "w" => 17,
        "e" => 18,
        "r" => 19,
        "t" => 20,
        "y" => 21,
        "u" => 22,
        "i" => 23,
        "o" => 24,
        "p" => 25,
        "enter" | "return" => 28,
        "a" => 30,
        "s" => 31,
        "d" => 32,
        "f" => 33,
        "g" => 34,
        "h" => 35,
        "j" => 36,
        "k" => 37,
        "l" => 38,
        "grave" | "`" => 41,
        "z" => 44,
        "x" => 45,
        "c" => 46,
        "v" => 47,
        "b" => 48,
        "n" => 49,
        "m" => 50,
        "space" => 57,
        "capslock" => 58,
        "f1" => 59,
        "f2" => 60,
        "f3" => 61,
        "f4" => 62,
        "f5" => 63,
        "f6" => 64,
        "f7" => 65,
        "f8" => 66,
        "f9" => 67,
        "f10" => 68,
        "f11" => 87,
        "f12" => 88,
        "henkan" => 92,
        "katakanahiragana" | "kana" => 93,
        "muhenkan" | "eisu" => 94,
        "hangeul" | "hangul" => 122,
        "hanja" => 123,
        "f13" => 183,
        "f14" => 184,
        "f15" => 185,
        "f16" => 186,
        "f17" => 187,
        "f18" => 188,
        "f19" => 189,
        "f20" => 190,
        _ => return name.strip_prefix("code:").and_then(|n| n.parse().ok()),
    };
    Some(code)
}

/// Resolve a configured binding into a chord.
pub fn parse_chord(binding: &BindingConfig) -> Result<Chord> {
    let Some(code) = keycode_from_name(&binding.key) else {
        bail!("unknown key name '{}'", binding.key);
    };
    let mut modifiers = Modifiers::NONE;
    for name in &binding.modifiers {
        match modifier_from_name(name) {
            Some(m) => modifiers.insert(m),
            None => bail!("unknown modifier '{}'", name),
        }
    }
    Ok(Chord { code, modifiers })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(key: &str, modifiers: &[&str]) -> BindingConfig {
        BindingConfig {
            key: key.into(),
            modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn parse_ctrl_space() {
        let chord = parse_chord(&binding("space", &["ctrl"])).unwrap();
        assert_eq!(chord.code, 57);
        assert_eq!(chord.modifiers, Modifiers::CTRL);
    }

    #[test]
    fn modifier_aliases_and_case() {
        let chord = parse_chord(&binding("D", &["Control", "option", "SHIFT"])).unwrap();
        assert_eq!(chord.code, 32);
        assert!(chord.modifiers.contains(Modifiers::CTRL));
        assert!(chord.modifiers.contains(Modifiers::ALT));
        assert!(chord.modifiers.contains(Modifiers::SHIFT));
        assert!(!chord.modifiers.contains(Modifiers::SUPER));
    }

    #[test]
    fn raw_code_names() {
        assert_eq!(keycode_from_name("code:183"), Some(183));
        assert_eq!(keycode_from_name("code:x"), None);
    }

    #[test]
    fn unknown_key_is_an_error() {
        assert!(parse_chord(&binding("nosuchkey", &[])).is_err());
        assert!(parse_chord(&binding("a", &["hyper"])).is_err());
    }

    #[test]
    fn left_and_right_modifiers_map_to_same_bit() {
        assert_eq!(keycode_to_modifier(29), keycode_to_modifier(97));
        assert_eq!(keycode_to_modifier(125), Some(Modifiers::SUPER));
        assert_eq!(keycode_to_modifier(30), None);
    }

    #[test]
    fn modifier_keycodes_follow_bit_order() {
        let mut m = Modifiers::SUPER;
        m.insert(Modifiers::CTRL);
        assert_eq!(m.keycodes(), vec![KEY_LEFTCTRL, KEY_LEFTMETA]);
        m.remove(Modifiers::CTRL);
        assert_eq!(m.keycodes(), vec![KEY_LEFTMETA]);
    }
}
