//! Keyboard event types for input handling
//!
//! These types are independent of any terminal or window backend; the host
//! converts whatever it receives into a [`KeyboardEvent`] before injecting it
//! into the scheduler.

use serde::{Deserialize, Serialize};

/// A discrete key transition delivered to scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    /// The key that changed state
    pub key: KeyCode,
    /// Modifier keys that were held during the event
    pub modifiers: KeyModifiers,
    /// Whether the key went down or up
    pub kind: KeyEventKind,
}

/// Represents a key on the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    /// A character key (a-z, 0-9, symbols, etc.)
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    /// Function keys F1-F24
    F(u8),
    /// Null/Unknown key
    Null,
}

/// Modifier keys that can be held during a keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

/// The kind of keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyEventKind {
    /// Key went down (auto-repeat also arrives as `Down`)
    Down,
    /// Key was released
    Up,
}

impl KeyboardEvent {
    /// Create a new keyboard event
    pub fn new(key: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> Self {
        Self {
            key,
            modifiers,
            kind,
        }
    }

    /// Key-down event with no modifiers
    pub fn key_down(key: KeyCode) -> Self {
        Self::new(key, KeyModifiers::default(), KeyEventKind::Down)
    }

    /// Key-up event with no modifiers
    pub fn key_up(key: KeyCode) -> Self {
        Self::new(key, KeyModifiers::default(), KeyEventKind::Up)
    }

    /// Key-down event for a character key with no modifiers
    pub fn char_down(c: char) -> Self {
        Self::key_down(KeyCode::Char(c))
    }

    pub fn is_down(&self) -> bool {
        self.kind == KeyEventKind::Down
    }
}

impl KeyModifiers {
    /// Create a new set of modifiers with all modifiers set to false
    pub fn new() -> Self {
        Self::default()
    }

    /// Create modifiers with ctrl set
    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Default::default()
        }
    }

    /// Create modifiers with alt set
    pub fn alt() -> Self {
        Self {
            alt: true,
            ..Default::default()
        }
    }

    /// Create modifiers with shift set
    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Default::default()
        }
    }

    /// Check if no modifiers are active
    pub fn is_empty(&self) -> bool {
        !self.ctrl && !self.alt && !self.shift
    }
}
