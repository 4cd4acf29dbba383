//! Continuation semantics for if/while/repeat nodes: branch dispatch,
//! exact iteration counts across suspensions, nesting, and exactly-once
//! completion under rapid re-entry.

use autoloop_core::{ArgMap, ArgValue, ManualClock};
use autoloop_engine::{Action, CountSpec, Engine, Outcome, RunStatus, Scope};
use autoloop_service_registry::ServiceRegistry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn new_engine() -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::new(clock.clone(), Arc::new(ServiceRegistry::new()));
    (engine, clock)
}

fn args(pairs: &[(&str, ArgValue)]) -> ArgMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn pump(engine: &mut Engine, clock: &ManualClock, ticks: usize) {
    for _ in 0..ticks {
        engine.tick();
        clock.advance(Duration::from_millis(10));
    }
}

type Record = Arc<Mutex<Vec<String>>>;

fn recorder() -> Record {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(out: &Record, line: impl Into<String>) {
    out.lock().unwrap().push(line.into());
}

#[test]
fn test_if_routes_to_then_and_else() {
    let (mut engine, _clock) = new_engine();
    let out = recorder();

    let then_out = out.clone();
    let else_out = out.clone();
    let graph = Arc::new(Action::sequence(vec![Action::if_else(
        |s: &Scope| s.bool_arg("condition").unwrap_or(false),
        vec![Action::lambda(move |s| {
            record(&then_out, format!("then value={}", s.int_arg("value").unwrap_or(-1)));
        })],
        vec![Action::lambda(move |s| {
            record(&else_out, format!("else value={}", s.int_arg("value").unwrap_or(-1)));
        })],
    )]));

    let a = engine.fire(
        graph.clone(),
        args(&[("condition", ArgValue::Bool(true)), ("value", ArgValue::Int(42))]),
    );
    engine.tick();
    assert_eq!(engine.outcome(a), Some(Outcome::Completed));
    assert_eq!(*out.lock().unwrap(), vec!["then value=42"]);

    let b = engine.fire(
        graph,
        args(&[("condition", ArgValue::Bool(false)), ("value", ArgValue::Int(99))]),
    );
    engine.tick();
    assert_eq!(engine.outcome(b), Some(Outcome::Completed));
    assert_eq!(
        *out.lock().unwrap(),
        vec!["then value=42", "else value=99"]
    );
}

#[test]
fn test_nested_if_covers_all_branches() {
    let (mut engine, _clock) = new_engine();
    let out = recorder();

    let both = out.clone();
    let outer_only = out.clone();
    let neither = out.clone();
    let graph = Arc::new(Action::sequence(vec![Action::if_else(
        |s: &Scope| s.bool_arg("outer").unwrap_or(false),
        vec![Action::if_else(
            |s: &Scope| s.bool_arg("inner").unwrap_or(false),
            vec![Action::lambda(move |_| record(&both, "nested-both-true"))],
            vec![Action::lambda(move |_| {
                record(&outer_only, "nested-outer-true-inner-false")
            })],
        )],
        vec![Action::lambda(move |_| record(&neither, "nested-outer-false"))],
    )]));

    for (outer, inner) in [(true, true), (true, false), (false, true)] {
        let id = engine.fire(
            graph.clone(),
            args(&[("outer", ArgValue::Bool(outer)), ("inner", ArgValue::Bool(inner))]),
        );
        engine.tick();
        assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    }

    assert_eq!(
        *out.lock().unwrap(),
        vec![
            "nested-both-true",
            "nested-outer-true-inner-false",
            "nested-outer-false"
        ]
    );
}

#[test]
fn test_while_iterates_exactly_to_bound() {
    let (mut engine, clock) = new_engine();
    let out = recorder();

    let body_out = out.clone();
    // The body suspends each iteration, so the counter must survive
    // suspensions across loop ticks.
    let graph = Arc::new(Action::sequence(vec![Action::while_loop(
        |s: &Scope| {
            let max = s.int_arg("max_count").unwrap_or(0);
            s.repeat.map_or(false, |r| (r.index as i64) < max)
        },
        vec![
            Action::lambda(move |s| {
                record(
                    &body_out,
                    format!("while-iteration-{}", s.repeat.map_or(0, |r| r.index)),
                );
            }),
            Action::delay(Duration::from_millis(10)),
        ],
    )]));

    let id = engine.fire(graph, args(&[("max_count", ArgValue::Int(3))]));
    pump(&mut engine, &clock, 20);

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    assert_eq!(
        *out.lock().unwrap(),
        vec!["while-iteration-0", "while-iteration-1", "while-iteration-2"]
    );
}

#[test]
fn test_repeat_counts_forward_from_zero() {
    let (mut engine, clock) = new_engine();
    let out = recorder();

    let body_out = out.clone();
    let graph = Arc::new(Action::sequence(vec![Action::repeat(
        CountSpec::FromArg("count".to_string()),
        vec![
            Action::lambda(move |s| {
                record(
                    &body_out,
                    format!("repeat-iteration-{}", s.repeat.map_or(0, |r| r.index)),
                );
            }),
            Action::delay(Duration::from_millis(10)),
        ],
    )]));

    let id = engine.fire(graph, args(&[("count", ArgValue::Int(5))]));
    pump(&mut engine, &clock, 30);

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    let lines = out.lock().unwrap().clone();
    assert_eq!(
        lines,
        (0..5)
            .map(|i| format!("repeat-iteration-{i}"))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_repeat_zero_count_skips_body() {
    let (mut engine, _clock) = new_engine();
    let out = recorder();

    let body_out = out.clone();
    let graph = Arc::new(Action::sequence(vec![Action::repeat(
        CountSpec::Fixed(0),
        vec![Action::lambda(move |_| record(&body_out, "body"))],
    )]));

    let id = engine.fire(graph, ArgMap::new());
    engine.tick();

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    assert!(out.lock().unwrap().is_empty());
}

#[test]
fn test_combined_repeat_with_nested_while() {
    let (mut engine, clock) = new_engine();
    let out = recorder();

    // Outer repeat sets the inner while's bound to its own iteration index:
    // iteration 0 runs the while 0 times, iteration 1 runs it once.
    let inner_target = Arc::new(AtomicU32::new(0));
    let inner_count = Arc::new(AtomicU32::new(0));

    let set_target = inner_target.clone();
    let reset_count = inner_count.clone();
    let cond_target = inner_target.clone();
    let cond_count = inner_count.clone();
    let body_count = inner_count.clone();
    let body_out = out.clone();
    let done_out = out.clone();

    let graph = Arc::new(Action::sequence(vec![
        Action::repeat(
            CountSpec::Fixed(2),
            vec![
                Action::lambda(move |s| {
                    set_target.store(s.repeat.map_or(0, |r| r.index), Ordering::SeqCst);
                    reset_count.store(0, Ordering::SeqCst);
                }),
                Action::while_loop(
                    move |_| {
                        cond_count.load(Ordering::SeqCst) < cond_target.load(Ordering::SeqCst)
                    },
                    vec![
                        Action::lambda(move |_| {
                            let n = body_count.fetch_add(1, Ordering::SeqCst);
                            record(&body_out, format!("combined-while{n}"));
                        }),
                        Action::delay(Duration::from_millis(10)),
                    ],
                ),
            ],
        ),
        Action::lambda(move |_| record(&done_out, "combined completed")),
    ]));

    let id = engine.fire(graph, ArgMap::new());
    pump(&mut engine, &clock, 20);

    assert_eq!(engine.outcome(id), Some(Outcome::Completed));
    let lines = out.lock().unwrap().clone();
    assert_eq!(lines, vec!["combined-while0", "combined completed"]);
}

#[test]
fn test_rapid_if_triggers_complete_exactly_once_each() {
    let (mut engine, _clock) = new_engine();
    let out = recorder();

    let then_out = out.clone();
    let else_out = out.clone();
    let graph = Arc::new(Action::sequence(vec![Action::if_else(
        |s: &Scope| s.int_arg("value").unwrap_or(0) > 2,
        vec![Action::lambda(move |s| {
            record(&then_out, format!("rapid-then value={}", s.int_arg("value").unwrap_or(0)));
        })],
        vec![Action::lambda(move |s| {
            record(&else_out, format!("rapid-else value={}", s.int_arg("value").unwrap_or(0)));
        })],
    )]));

    // 5 back-to-back triggers of the same descriptor within one tick
    let ids: Vec<_> = (1..=5)
        .map(|value| engine.fire(graph.clone(), args(&[("value", ArgValue::Int(value))])))
        .collect();
    engine.tick();

    // Values 1, 2 hit else; 3, 4, 5 hit then; each run completes exactly once
    let lines = out.lock().unwrap().clone();
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("rapid-else")).count(),
        2
    );
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("rapid-then")).count(),
        3
    );
    for id in ids {
        assert_eq!(engine.status(id), Some(RunStatus::Finished(Outcome::Completed)));
    }
}
