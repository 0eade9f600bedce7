use anyhow::Context;
use std::time::Duration;
use tracing::info;
use turnstile_host::{Script, ScriptContext};
use turnstile_runner::frame_number;

const REPORT_EVERY: u64 = 120;

/// Reads the host's frame number through the privileged bridge
#[derive(Default)]
pub struct NativeCounter {
    last_report: u64,
}

impl Script for NativeCounter {
    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        let frame = ctx
            .call_native(frame_number)?
            .context("frame number unavailable")?;

        if frame >= self.last_report + REPORT_EVERY {
            self.last_report = frame;
            let scripts = ctx.run_on_scheduler({
                let domain = ctx.domain()?;
                move || domain.scripts().len()
            })?;
            let label = ctx.pin_str(&format!("frame {}", frame))?;
            info!(
                target: "scripts",
                "Host is at {} ({} byte label pinned), {} script(s) loaded",
                frame,
                label.len(),
                scripts
            );
        }

        ctx.wait(Duration::from_millis(100));
        Ok(())
    }
}
