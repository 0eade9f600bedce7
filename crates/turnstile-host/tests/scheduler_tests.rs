// Integration tests for the scheduler, driving real worker threads

use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use turnstile_events::{DiagnosticLevel, FaultPhase, ScriptEvent};
use turnstile_host::native::current_thread_id;
use turnstile_host::{
    ContextHandle, DiagnosticSink, Domain, HostBindings, KeyCode, KeyboardEvent, SchedulerConfig,
    Script, ScriptCatalog, ScriptContext, ScriptDescriptor, ScriptIdentity, ScriptOptions,
    debugger,
};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, ScriptEvent)>>,
}

impl RecordingSink {
    fn events_for(&self, name: &str) -> Vec<ScriptEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(script, _)| script == name)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn timed_out(&self, name: &str) -> bool {
        self.events_for(name)
            .iter()
            .any(|event| matches!(event, ScriptEvent::TimedOut { .. }))
    }
}

impl DiagnosticSink for RecordingSink {
    fn log(&self, _level: DiagnosticLevel, _message: &str) {}

    fn script_event(&self, script: &ScriptIdentity, event: &ScriptEvent) {
        self.events.lock().push((script.name.clone(), event.clone()));
    }
}

fn test_domain(timeout_ms: u64) -> (Domain, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let config = SchedulerConfig {
        script_timeout_ms: timeout_ms,
        watchdog_poll_ms: 5,
        ..SchedulerConfig::default()
    };
    let domain = Domain::builder(config)
        .with_sink(sink.clone())
        .with_debugger_probe(debugger::never_attached)
        .build();
    (domain, sink)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Calls `f` on every tick
struct FnScript<F> {
    name: &'static str,
    on_tick: F,
}

impl<F> Script for FnScript<F>
where
    F: FnMut(&mut ScriptContext) -> anyhow::Result<()> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        (self.on_tick)(ctx)
    }
}

fn script<F>(name: &'static str, on_tick: F) -> Box<dyn Script>
where
    F: FnMut(&mut ScriptContext) -> anyhow::Result<()> + Send + 'static,
{
    Box::new(FnScript { name, on_tick })
}

#[test]
fn test_at_most_one_unit_executes_at_a_time() {
    let (domain, _sink) = test_domain(5000);
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let turns = Arc::new(AtomicUsize::new(0));

    for name in ["One", "Two", "Three", "Four"] {
        let active = active.clone();
        let max_seen = max_seen.clone();
        let turns = turns.clone();
        let unit = domain.register_script(
            script(name, move |ctx| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                assert!(ctx.unit().is_executing());
                thread::sleep(Duration::from_millis(1));
                active.fetch_sub(1, Ordering::SeqCst);
                turns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
            ScriptOptions::default(),
        );
        domain.start(&unit).unwrap();
    }

    for _ in 0..10 {
        domain.tick();
        assert!(domain.executing_script().is_none());
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(turns.load(Ordering::SeqCst), 40);
}

#[test]
fn test_runaway_worker_is_aborted_and_tick_moves_on() {
    let (domain, sink) = test_domain(100);
    let release = Arc::new(AtomicBool::new(false));
    let after = Arc::new(AtomicUsize::new(0));

    let spin = release.clone();
    let runaway = domain.register_script(
        script("Runaway", move |_ctx| {
            while !spin.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    let counter = after.clone();
    let sibling = domain.register_script(
        script("Sibling", move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    assert_eq!(domain.start_all(), 2);

    let start = Instant::now();
    domain.tick();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "tick took {:?}", elapsed);
    assert!(!runaway.is_running());
    assert!(sink.timed_out("Runaway"));
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert!(sibling.is_running());
    assert!(domain.lookup("Runaway").is_none());

    // Let the stuck worker return so its thread can exit
    release.store(true, Ordering::SeqCst);
}

#[test]
fn test_blocking_inline_tick_is_aborted_after_the_turn() {
    let (domain, sink) = test_domain(100);
    let unit = domain.register_script(
        script("Sleeper", |_ctx| {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        }),
        None,
        ScriptOptions::default().dedicated_thread(false),
    );
    domain.start(&unit).unwrap();

    domain.tick();

    assert!(!unit.is_running());
    assert!(sink.timed_out("Sleeper"));
    let timed_out = sink
        .events_for("Sleeper")
        .into_iter()
        .find(|event| matches!(event, ScriptEvent::TimedOut { .. }));
    let message = timed_out.map(|event| event.to_string()).unwrap_or_default();
    assert!(message.contains("blocked too long"), "{}", message);
}

#[test]
fn test_blocking_worker_tick_is_aborted_before_tick_returns() {
    let (domain, sink) = test_domain(100);
    let unit = domain.register_script(
        script("Sleeper", |_ctx| {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    domain.tick();

    assert!(!unit.is_running());
    assert!(sink.timed_out("Sleeper"));
}

#[test]
fn test_timeout_of_zero_disables_the_watchdog() {
    let (domain, sink) = test_domain(0);
    let unit = domain.register_script(
        script("Slow", |_ctx| {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    domain.tick();
    assert!(unit.is_running());
    assert!(!sink.timed_out("Slow"));
}

thread_local! {
    static CONTEXT: Cell<usize> = const { Cell::new(0) };
}

fn get_context() -> ContextHandle {
    ContextHandle::from_raw(CONTEXT.with(Cell::get))
}

fn set_context(handle: ContextHandle) {
    CONTEXT.with(|context| context.set(handle.as_raw()));
}

fn explode() {
    panic!("native code exploded");
}

const PRIVILEGED: ContextHandle = ContextHandle::from_raw(0xC0FFEE);

fn privileged_domain(timeout_ms: u64) -> (Domain, Arc<RecordingSink>) {
    let (domain, sink) = test_domain(timeout_ms);
    domain.install_host_bindings(HostBindings::new(
        current_thread_id(),
        PRIVILEGED,
        get_context,
        set_context,
    ));
    (domain, sink)
}

#[test]
fn test_privileged_call_swaps_and_restores_context() {
    let (domain, _sink) = privileged_domain(5000);
    let observed = Arc::new(Mutex::new(Vec::new()));

    let record = observed.clone();
    let unit = domain.register_script(
        script("Native", move |ctx| {
            set_context(ContextHandle::from_raw(7));

            let inside = ctx.call_native(get_context)?;
            record.lock().push(("inside", inside, get_context()));

            let unwound = catch_unwind(AssertUnwindSafe(|| ctx.call_native(explode)));
            assert!(unwound.is_err());
            record.lock().push(("after panic", get_context(), get_context()));

            ctx.abort();
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();
    domain.tick();

    let observed = observed.lock();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0], ("inside", PRIVILEGED, ContextHandle::from_raw(7)));
    assert_eq!(observed[1].1, ContextHandle::from_raw(7));
}

#[test]
fn test_privileged_thread_runs_directly() {
    let (domain, _sink) = privileged_domain(5000);
    set_context(ContextHandle::from_raw(3));
    let seen = domain
        .execute_with_privileged_context(get_context, false)
        .unwrap();
    assert_eq!(seen, ContextHandle::from_raw(3));
}

#[test]
fn test_blocking_native_call_pauses_timeout() {
    let (domain, sink) = privileged_domain(100);
    let unit = domain.register_script(
        script("Blocking", |ctx| {
            ctx.call_native_blocking(|| thread::sleep(Duration::from_millis(300)))?;
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    domain.tick();
    assert!(unit.is_running());
    assert!(!sink.timed_out("Blocking"));
}

#[test]
fn test_one_input_event_is_delivered_exactly_once() {
    #[derive(Default)]
    struct KeyRecorder {
        seen: Arc<Mutex<Vec<KeyboardEvent>>>,
    }

    impl Script for KeyRecorder {
        fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn on_key(&mut self, event: &KeyboardEvent, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    let (domain, _sink) = test_domain(5000);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let unit = domain.register_script(
        Box::new(KeyRecorder { seen: seen.clone() }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    let input = domain.input_sender();
    assert!(input.send(KeyboardEvent::char_down('x')));

    // A paused unit keeps its queued input for when it runs again
    unit.pause();
    domain.tick();
    assert!(seen.lock().is_empty());
    assert_eq!(unit.pending_input(), 1);

    unit.resume();
    domain.tick();
    domain.tick();

    assert_eq!(*seen.lock(), vec![KeyboardEvent::char_down('x')]);
    assert_eq!(unit.pending_input(), 0);
    assert!(domain.is_key_pressed(KeyCode::Char('x')));
}

#[test]
fn test_key_event_fault_is_tolerated() {
    #[derive(Default)]
    struct Grumpy {
        ticks: Arc<AtomicUsize>,
    }

    impl Script for Grumpy {
        fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_key(&mut self, _event: &KeyboardEvent, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            anyhow::bail!("unexpected key")
        }
    }

    let (domain, sink) = test_domain(5000);
    let ticks = Arc::new(AtomicUsize::new(0));
    let unit = domain.register_script(
        Box::new(Grumpy {
            ticks: ticks.clone(),
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    domain.send_input(KeyboardEvent::key_down(KeyCode::Enter));
    domain.tick();

    assert!(unit.is_running());
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert!(sink.events_for("Grumpy").iter().any(|event| matches!(
        event,
        ScriptEvent::Fault {
            during: FaultPhase::KeyEvent,
            ..
        }
    )));
}

#[test]
fn test_tasks_run_in_order_before_next_unit() {
    let (domain, _sink) = test_domain(5000);
    let log: Arc<Mutex<Vec<(String, ThreadId)>>> = Arc::new(Mutex::new(Vec::new()));
    let scheduler = thread::current().id();

    let tasks_log = log.clone();
    let first = domain.register_script(
        script("First", move |ctx| {
            for i in 1..=3 {
                let log = tasks_log.clone();
                ctx.run_on_scheduler(move || {
                    log.lock().push((format!("task {}", i), thread::current().id()));
                })?;
            }
            ctx.abort();
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    let second_log = log.clone();
    let second = domain.register_script(
        script("Second", move |ctx| {
            second_log
                .lock()
                .push(("second".to_string(), thread::current().id()));
            ctx.abort();
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&first).unwrap();
    domain.start(&second).unwrap();

    domain.tick();

    let log = log.lock();
    let order: Vec<&str> = log.iter().map(|(entry, _)| entry.as_str()).collect();
    assert_eq!(order, vec!["task 1", "task 2", "task 3", "second"]);
    assert!(log[..3].iter().all(|(_, thread)| *thread == scheduler));
    assert_ne!(log[3].1, scheduler);
}

#[test]
fn test_task_results_are_handed_back() {
    let (domain, _sink) = test_domain(5000);
    let answers = Arc::new(Mutex::new(Vec::new()));

    let record = answers.clone();
    let unit = domain.register_script(
        script("Asker", move |ctx| {
            let tick = ctx.run_on_scheduler({
                let domain = ctx.domain()?;
                move || domain.tick_count()
            })?;
            record.lock().push(tick);
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&unit).unwrap();

    domain.tick();
    domain.tick();
    assert_eq!(*answers.lock(), vec![1, 2]);
}

#[test]
fn test_panicking_task_aborts_only_its_unit() {
    let (domain, sink) = test_domain(5000);
    let after = Arc::new(AtomicUsize::new(0));

    let faulty = domain.register_script(
        script("Faulty", |ctx| {
            ctx.run_on_scheduler(explode)?;
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    let counter = after.clone();
    let healthy = domain.register_script(
        script("Healthy", move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start_all();

    domain.tick();

    assert!(!faulty.is_running());
    assert!(healthy.is_running());
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert!(sink.events_for("Faulty").iter().any(|event| matches!(
        event,
        ScriptEvent::Fault {
            during: FaultPhase::Task,
            ..
        }
    )));
}

#[derive(Default)]
struct Spawned;

static SPAWNED_TICKS: AtomicUsize = AtomicUsize::new(0);

impl Script for Spawned {
    fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
        SPAWNED_TICKS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_script_started_mid_tick_runs_in_same_tick() {
    let mut catalog = ScriptCatalog::new();
    catalog.register(ScriptDescriptor::of::<Spawned>());

    let sink = Arc::new(RecordingSink::default());
    let domain = Domain::builder(SchedulerConfig::default())
        .with_sink(sink.clone())
        .with_catalog(catalog)
        .build();

    let spawner = domain.register_script(
        script("Spawner", |ctx| {
            ctx.start_script("Spawned")?;
            ctx.abort();
            Ok(())
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&spawner).unwrap();

    domain.tick();

    assert_eq!(SPAWNED_TICKS.load(Ordering::SeqCst), 1);
    let names: Vec<String> = domain.scripts().into_iter().map(|info| info.name).collect();
    assert_eq!(names, vec!["Spawned"]);
}

#[derive(Default)]
struct Watcher {
    aborted: Arc<AtomicUsize>,
}

impl Script for Watcher {
    fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_abort(&mut self) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_abort_by_name_stops_parked_worker() {
    let (domain, sink) = test_domain(5000);
    let aborted = Arc::new(AtomicUsize::new(0));
    let unit = domain.register_script(
        Box::new(Watcher {
            aborted: aborted.clone(),
        }),
        None,
        ScriptOptions::default().interval(Duration::from_millis(50)),
    );
    domain.start(&unit).unwrap();
    domain.tick();

    assert_eq!(domain.abort_script("Watcher"), 1);
    assert_eq!(domain.abort_script("Watcher"), 0);
    assert!(wait_until(|| aborted.load(Ordering::SeqCst) == 1));
    assert!(domain.scripts().is_empty());

    let aborts = sink
        .events_for("Watcher")
        .into_iter()
        .filter(|event| *event == ScriptEvent::Aborted)
        .count();
    assert_eq!(aborts, 1);
}

/// Sleeps inside its tick, so its worker is parked mid-tick between turns
struct Napper {
    aborted: Arc<AtomicUsize>,
    gone: Arc<AtomicBool>,
}

impl Script for Napper {
    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        ctx.wait(Duration::from_millis(50));
        if ctx.domain().is_err() {
            self.gone.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn on_abort(&mut self) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_dropping_domain_aborts_workers() {
    let (domain, _sink) = test_domain(5000);
    let aborted = Arc::new(AtomicUsize::new(0));
    let gone = Arc::new(AtomicBool::new(false));
    let watcher = domain.register_script(
        Box::new(Watcher {
            aborted: aborted.clone(),
        }),
        None,
        ScriptOptions::default(),
    );
    let napper = domain.register_script(
        Box::new(Napper {
            aborted: aborted.clone(),
            gone: gone.clone(),
        }),
        None,
        ScriptOptions::default(),
    );
    domain.start(&watcher).unwrap();
    domain.start(&napper).unwrap();
    domain.tick();

    drop(domain);
    assert!(wait_until(|| aborted.load(Ordering::SeqCst) == 2));
    assert!(!watcher.is_running());
    assert!(!napper.is_running());
    // The napper unwound out of its wait instead of resuming its tick
    assert!(!gone.load(Ordering::SeqCst));
}

#[test]
fn test_abort_from_another_thread_keeps_turn_exclusive() {
    let (domain, sink) = test_domain(5000);
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let other_ticks = Arc::new(AtomicUsize::new(0));

    let busy = {
        let (active, max_seen) = (active.clone(), max_seen.clone());
        domain.register_script(
            script("Busy", move |_ctx| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                let started = Instant::now();
                while started.elapsed() < Duration::from_millis(200) {
                    thread::sleep(Duration::from_millis(1));
                }
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
            ScriptOptions::default(),
        )
    };
    let other = {
        let (active, max_seen, other_ticks) =
            (active.clone(), max_seen.clone(), other_ticks.clone());
        domain.register_script(
            script("Other", move |_ctx| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
                other_ticks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
            ScriptOptions::default(),
        )
    };
    domain.start(&busy).unwrap();
    domain.start(&other).unwrap();

    let remote = domain.clone();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.abort_script("Busy")
    });

    domain.tick();
    assert_eq!(aborter.join().unwrap(), 1);

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(other_ticks.load(Ordering::SeqCst), 1);
    assert!(busy.is_aborted());
    assert!(!sink.timed_out("Busy"));
    assert!(domain.lookup("Busy").is_none());
    assert!(domain.lookup("Other").is_some());
}

#[test]
fn test_register_file_and_abort_by_file() {
    #[derive(Default)]
    struct Helper;

    impl Script for Helper {
        fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let file = Path::new("mods/pack.rs");
    let mut catalog = ScriptCatalog::new();
    catalog.register(ScriptDescriptor::of::<Watcher>().with_file(file));
    catalog.register(
        ScriptDescriptor::of::<Helper>()
            .with_file(file)
            .with_options(ScriptOptions::default().no_default_instance()),
    );

    let domain = Domain::builder(SchedulerConfig::default())
        .with_catalog(catalog)
        .build();

    let units = domain.register_file(file).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name(), "Watcher");
    assert_eq!(units[0].file(), Some(file));
    assert!(domain.register_file(Path::new("mods/missing.rs")).is_err());

    assert_eq!(domain.start_all(), 1);
    domain.tick();

    let id = domain.instantiate("Helper").unwrap();
    assert_eq!(domain.scripts().len(), 2);
    assert!(domain.scripts().iter().any(|info| info.id == id));

    assert_eq!(domain.abort_scripts_in_file(file), 2);
    assert!(domain.scripts().is_empty());
}
