use std::thread;
use std::time::Duration;
use tracing::warn;
use turnstile_host::{Script, ScriptContext};

/// Never yields from its first tick. Shows the watchdog at work.
#[derive(Default)]
pub struct Runaway;

impl Script for Runaway {
    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        warn!(target: "scripts", "{} is about to block the scheduler", ctx.name());
        // Spins until the watchdog aborts it, then lets the thread finish
        while !ctx.unit().is_aborted() {
            thread::sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    fn on_abort(&mut self) {
        warn!(target: "scripts", "Runaway was stopped");
    }
}
