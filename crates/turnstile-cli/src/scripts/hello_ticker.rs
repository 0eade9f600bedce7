use tracing::info;
use turnstile_host::{Script, ScriptContext};

/// Logs a greeting on start and a heartbeat on every tick
#[derive(Default)]
pub struct HelloTicker {
    ticks: u64,
}

impl Script for HelloTicker {
    fn on_start(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        info!(target: "scripts", "Hello from {} (ticking every {:?})", ctx.name(), ctx.interval());
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        self.ticks += 1;
        info!(target: "scripts", "{} heartbeat #{}", ctx.name(), self.ticks);
        Ok(())
    }

    fn on_abort(&mut self) {
        info!(target: "scripts", "HelloTicker stopping after {} heartbeat(s)", self.ticks);
    }
}
