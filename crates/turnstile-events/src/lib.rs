/// Event types shared between the turnstile host, runner and scripts
///
/// This crate has no scheduling logic; it only defines what flows into the
/// scheduler (keyboard input) and what flows out of it (script lifecycle
/// notifications and their severity).
pub mod input;
pub mod keyboard_events;
pub mod script_events;

pub use input::{InputReceiver, InputSender, input_channel};
pub use keyboard_events::{KeyCode, KeyEventKind, KeyModifiers, KeyboardEvent};
pub use script_events::{DiagnosticLevel, FaultPhase, ScriptEvent};
