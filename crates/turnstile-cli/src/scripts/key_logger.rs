use tracing::info;
use turnstile_host::{KeyCode, KeyboardEvent, Script, ScriptContext};

/// Logs every key event and reports held arrow keys
#[derive(Default)]
pub struct KeyLogger;

impl Script for KeyLogger {
    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        let held: Vec<_> = [KeyCode::Up, KeyCode::Down, KeyCode::Left, KeyCode::Right]
            .into_iter()
            .filter(|key| ctx.is_key_pressed(*key))
            .collect();
        if !held.is_empty() {
            info!(target: "scripts", "Holding {:?}", held);
        }
        Ok(())
    }

    fn on_key(&mut self, event: &KeyboardEvent, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
        if event.is_down() {
            info!(target: "scripts", "Key down: {:?} {:?}", event.key, event.modifiers);
        }
        Ok(())
    }
}
