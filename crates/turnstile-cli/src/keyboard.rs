//! Keyboard event conversion and forwarding
//!
//! Converts crossterm keyboard events to the scheduler's KeyboardEvent type
//! and feeds them to scripts while the terminal is in raw mode.

use crossterm::event::{
    self, Event, KeyCode as CrosstermKeyCode, KeyEvent as CrosstermKeyEvent,
    KeyEventKind as CrosstermKeyEventKind, KeyModifiers as CrosstermKeyModifiers,
};
use crossterm::terminal;
use std::collections::HashSet;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use turnstile_events::{InputSender, KeyCode, KeyEventKind, KeyModifiers, KeyboardEvent};

/// How long a key counts as held when the terminal reports no release
const HOLD_TIMEOUT: Duration = Duration::from_millis(100);

/// Convert a crossterm KeyEvent to our KeyboardEvent type
pub fn crossterm_to_keyboard_event(event: &CrosstermKeyEvent) -> KeyboardEvent {
    KeyboardEvent {
        key: convert_key_code(&event.code),
        modifiers: convert_modifiers(&event.modifiers),
        kind: convert_kind(&event.kind),
    }
}

fn convert_key_code(code: &CrosstermKeyCode) -> KeyCode {
    match code {
        CrosstermKeyCode::Char(c) => KeyCode::Char(*c),
        CrosstermKeyCode::Enter => KeyCode::Enter,
        CrosstermKeyCode::Tab | CrosstermKeyCode::BackTab => KeyCode::Tab,
        CrosstermKeyCode::Backspace => KeyCode::Backspace,
        CrosstermKeyCode::Esc => KeyCode::Escape,
        CrosstermKeyCode::Delete => KeyCode::Delete,
        CrosstermKeyCode::Insert => KeyCode::Insert,
        CrosstermKeyCode::Home => KeyCode::Home,
        CrosstermKeyCode::End => KeyCode::End,
        CrosstermKeyCode::PageUp => KeyCode::PageUp,
        CrosstermKeyCode::PageDown => KeyCode::PageDown,
        CrosstermKeyCode::Up => KeyCode::Up,
        CrosstermKeyCode::Down => KeyCode::Down,
        CrosstermKeyCode::Left => KeyCode::Left,
        CrosstermKeyCode::Right => KeyCode::Right,
        CrosstermKeyCode::F(n) => KeyCode::F(*n),
        _ => KeyCode::Null,
    }
}

fn convert_modifiers(modifiers: &CrosstermKeyModifiers) -> KeyModifiers {
    KeyModifiers {
        ctrl: modifiers.contains(CrosstermKeyModifiers::CONTROL),
        alt: modifiers.contains(CrosstermKeyModifiers::ALT),
        shift: modifiers.contains(CrosstermKeyModifiers::SHIFT),
    }
}

fn convert_kind(kind: &CrosstermKeyEventKind) -> KeyEventKind {
    match kind {
        CrosstermKeyEventKind::Press | CrosstermKeyEventKind::Repeat => KeyEventKind::Down,
        CrosstermKeyEventKind::Release => KeyEventKind::Up,
    }
}

/// Ctrl+C, which raw mode no longer turns into a signal
fn is_quit(event: &CrosstermKeyEvent) -> bool {
    event.code == CrosstermKeyCode::Char('c')
        && event.modifiers.contains(CrosstermKeyModifiers::CONTROL)
}

/// Put the terminal in raw mode and forward key presses to `input` until
/// Ctrl+C is pressed or `shutdown` flips to true.
///
/// Most terminals never report key releases, so keys not seen again within
/// a short window are released on the script's behalf.
pub fn spawn_forwarder(
    input: InputSender,
    shutdown: watch::Sender<bool>,
) -> io::Result<JoinHandle<()>> {
    terminal::enable_raw_mode()?;

    let spawned = thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            if let Err(e) = forward_keys(&input, &shutdown) {
                error!("Keyboard forwarding stopped: {}", e);
            }
            if let Err(e) = terminal::disable_raw_mode() {
                error!("Failed to restore terminal: {}", e);
            }
        });

    if spawned.is_err() {
        terminal::disable_raw_mode()?;
    }
    spawned
}

fn forward_keys(input: &InputSender, shutdown: &watch::Sender<bool>) -> io::Result<()> {
    let mut held: HashSet<KeyCode> = HashSet::new();

    while !*shutdown.borrow() && !input.is_closed() {
        if !event::poll(HOLD_TIMEOUT)? {
            for key in held.drain() {
                input.send(KeyboardEvent::key_up(key));
            }
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if is_quit(&key) {
            info!("Ctrl+C pressed, shutting down");
            let _ = shutdown.send(true);
            break;
        }

        let converted = crossterm_to_keyboard_event(&key);
        if converted.is_down() {
            held.insert(converted.key);
        } else {
            held.remove(&converted.key);
        }
        input.send(converted);
    }
    Ok(())
}
