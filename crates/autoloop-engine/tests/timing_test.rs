//! Timeout accuracy under mid-tick entry: a delay or wait_until entered
//! after a sibling already consumed time in the same tick must honor the
//! full requested duration from its own entry instant, never fire
//! immediately off a stale tick-start timestamp.

use autoloop_core::{ArgMap, ArgValue, Clock, ManualClock};
use autoloop_engine::{Action, DurationSpec, Engine, Outcome, RunStatus};
use autoloop_service_registry::ServiceRegistry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn new_engine() -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::new(clock.clone(), Arc::new(ServiceRegistry::new()));
    (engine, clock)
}

fn pump(engine: &mut Engine, clock: &ManualClock, ticks: usize) {
    for _ in 0..ticks {
        engine.tick();
        clock.advance(Duration::from_millis(10));
    }
}

#[test]
fn test_wait_until_timeout_measured_from_entry_not_tick_start() {
    let (mut engine, clock) = new_engine();
    let stamps: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));

    let work_clock = clock.clone();
    let entry_stamps = stamps.clone();
    let exit_clock = clock.clone();
    let exit_stamps = stamps.clone();

    let graph = Arc::new(Action::sequence(vec![
        // Simulate 100 ms of sibling work consumed earlier in the same tick
        Action::lambda(move |_| {
            work_clock.advance(Duration::from_millis(100));
            entry_stamps.lock().unwrap().push(work_clock.now());
        }),
        Action::wait_until_with_timeout(|_| false, Duration::from_millis(200)),
        Action::lambda(move |_| {
            exit_stamps.lock().unwrap().push(exit_clock.now());
        }),
    ]));

    let id = engine.fire(graph, ArgMap::new());
    pump(&mut engine, &clock, 40);

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 2);
    let elapsed = stamps[1] - stamps[0];

    // Must fall in the tolerance window around the nominal 200 ms; an
    // immediate (<50 ms) timeout is the stale-timestamp underflow bug.
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed <= Duration::from_millis(250),
        "wait_until completed after {:?}, expected ~200 ms",
        elapsed
    );
}

#[test]
fn test_delay_measured_from_entry_not_tick_start() {
    let (mut engine, clock) = new_engine();
    let stamps: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));

    let work_clock = clock.clone();
    let entry_stamps = stamps.clone();
    let exit_clock = clock.clone();
    let exit_stamps = stamps.clone();

    let graph = Arc::new(Action::sequence(vec![
        Action::lambda(move |_| {
            work_clock.advance(Duration::from_millis(100));
            entry_stamps.lock().unwrap().push(work_clock.now());
        }),
        Action::delay(Duration::from_millis(200)),
        Action::lambda(move |_| {
            exit_stamps.lock().unwrap().push(exit_clock.now());
        }),
    ]));

    let id = engine.fire(graph, ArgMap::new());
    pump(&mut engine, &clock, 40);

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    let stamps = stamps.lock().unwrap();
    let elapsed = stamps[1] - stamps[0];
    assert!(
        elapsed >= Duration::from_millis(200) && elapsed <= Duration::from_millis(250),
        "delay completed after {:?}, expected >= 200 ms",
        elapsed
    );
}

#[test]
fn test_wait_until_with_true_condition_does_not_suspend() {
    let (mut engine, _clock) = new_engine();

    let id = engine.fire(
        Arc::new(Action::sequence(vec![Action::wait_until(|_| true)])),
        ArgMap::new(),
    );
    engine.tick();

    assert_eq!(engine.status(id), Some(RunStatus::Finished(Outcome::Completed)));
}

#[test]
fn test_wait_until_resumes_when_condition_flips() {
    let (mut engine, clock) = new_engine();
    let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let wait_flag = flag.clone();
    let id = engine.fire(
        Arc::new(Action::sequence(vec![Action::wait_until(move |_| {
            wait_flag.load(std::sync::atomic::Ordering::SeqCst)
        })])),
        ArgMap::new(),
    );

    pump(&mut engine, &clock, 5);
    assert_eq!(engine.status(id), Some(RunStatus::Suspended));

    flag.store(true, std::sync::atomic::Ordering::SeqCst);
    engine.tick();
    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
}

#[test]
fn test_five_concurrent_timed_waits_all_complete() {
    let (mut engine, clock) = new_engine();
    let completed = Arc::new(Mutex::new(Vec::new()));

    let out = completed.clone();
    let graph = Arc::new(Action::sequence(vec![
        Action::wait_until_with_timeout(|_| false, Duration::from_millis(100)),
        Action::lambda(move |s| {
            out.lock().unwrap().push(s.int_arg("i").unwrap_or(-1));
        }),
    ]));

    let ids: Vec<_> = (0..5)
        .map(|i| {
            let mut args = ArgMap::new();
            args.insert("i".to_string(), ArgValue::Int(i));
            engine.fire(graph.clone(), args)
        })
        .collect();

    pump(&mut engine, &clock, 30);

    // Every rapid trigger times out independently and completes once
    assert_eq!(*completed.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    for id in ids {
        assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    }
}

#[test]
fn test_delay_duration_from_argument() {
    let (mut engine, clock) = new_engine();

    let mut args = ArgMap::new();
    args.insert("delay_ms".to_string(), ArgValue::Int(50));

    let id = engine.fire(
        Arc::new(Action::sequence(vec![Action::delay_spec(
            DurationSpec::FromArgMillis("delay_ms".to_string()),
        )])),
        args,
    );

    engine.tick();
    clock.advance(Duration::from_millis(49));
    engine.tick();
    assert_eq!(engine.status(id), Some(RunStatus::Suspended));

    clock.advance(Duration::from_millis(1));
    engine.tick();
    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
}
