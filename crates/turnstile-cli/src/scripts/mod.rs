//! Demo scripts bundled with the CLI

mod hello_ticker;
mod key_logger;
mod native_counter;
mod runaway;

pub use hello_ticker::HelloTicker;
pub use key_logger::KeyLogger;
pub use native_counter::NativeCounter;
pub use runaway::Runaway;

use std::time::Duration;
use turnstile_host::{ScriptCatalog, ScriptDescriptor, ScriptOptions};

/// Pseudo-file the demo scripts are declared in
pub const DEMO_FILE: &str = "demo";

/// Every demo script type
pub fn catalog() -> ScriptCatalog {
    let mut catalog = ScriptCatalog::new();
    catalog.register(
        ScriptDescriptor::of::<HelloTicker>()
            .with_file(DEMO_FILE)
            .with_options(ScriptOptions::default().interval(Duration::from_secs(1))),
    );
    catalog.register(ScriptDescriptor::of::<KeyLogger>().with_file(DEMO_FILE));
    catalog.register(
        ScriptDescriptor::of::<NativeCounter>()
            .with_file(DEMO_FILE)
            .with_options(ScriptOptions::default().reset_timeout_on_native_call(true)),
    );
    catalog.register(
        ScriptDescriptor::of::<Runaway>()
            .with_file(DEMO_FILE)
            .with_options(
                ScriptOptions::default()
                    .dedicated_thread(true)
                    .no_default_instance(),
            ),
    );
    catalog
}
