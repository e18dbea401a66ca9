//! Engine invariants over random command schedules.

use keyfetch_core::{CacheClear, Command, FetchPolicy, FetchRequest, LifecycleEvent};
use keyfetch_runtime::{EngineConfig, FetchEngine, OperationRegistry};
use keyfetch_sim::{EchoOperation, EventRecorder, THROW_ARGUMENT};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const OPERATION: &str = "LOAD";
const ARGUMENTS: [&str; 3] = ["a", "b", THROW_ARGUMENT];

#[derive(Debug, Clone)]
enum Step {
    PreferCache(usize),
    Refetch(usize),
    Clear(usize),
}

impl Step {
    fn command(&self) -> Command {
        let args = |i: &usize| vec![json!(ARGUMENTS[*i])];
        match self {
            Self::PreferCache(i) => FetchRequest::new(OPERATION, args(i))
                .with_policy(FetchPolicy::PreferCache)
                .into(),
            Self::Refetch(i) => FetchRequest::new(OPERATION, args(i))
                .with_policy(FetchPolicy::Refetch)
                .into(),
            Self::Clear(i) => CacheClear::new(OPERATION, args(i)).into(),
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    let arg = 0..ARGUMENTS.len();
    prop_oneof![
        arg.clone().prop_map(Step::PreferCache),
        arg.clone().prop_map(Step::Refetch),
        arg.prop_map(Step::Clear),
    ]
}

fn schedule() -> impl Strategy<Value = Vec<(u64, Step)>> {
    proptest::collection::vec((0u64..30, step()), 1..24)
}

struct Run {
    events: Vec<LifecycleEvent>,
    started: u64,
    calls: u64,
    teardowns: u64,
    cancelled: u64,
    max_per_key: u64,
}

fn run(schedule: &[(u64, Step)]) -> Run {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let echo = EchoOperation::new().with_scope(OPERATION);
        let probe = echo.probe();
        let recorder = EventRecorder::new();
        let engine = FetchEngine::spawn(
            EngineConfig::default(),
            OperationRegistry::with_default(Arc::new(echo)),
            recorder.clone(),
        )
        .unwrap();

        for (gap_ms, step) in schedule {
            if *gap_ms > 0 {
                tokio::time::sleep(Duration::from_millis(*gap_ms)).await;
            }
            engine.dispatch_wait(step.command()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let metrics = engine.metrics();
        let stats = probe.stats();
        Run {
            events: recorder.events(),
            started: metrics.started,
            calls: stats.calls,
            teardowns: stats.teardowns,
            cancelled: metrics.cancelled,
            max_per_key: stats.max_per_key,
        }
    })
}

fn arguments_of(event: &LifecycleEvent) -> Option<String> {
    match event {
        LifecycleEvent::LoadingStart { arguments, .. }
        | LifecycleEvent::LoadingEnd { arguments, .. }
        | LifecycleEvent::LoadingCancel { arguments, .. } => {
            Some(Value::Array(arguments.clone()).to_string())
        }
        LifecycleEvent::Completed { .. } | LifecycleEvent::Failed { .. } => None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_at_most_one_in_flight_per_key(schedule in schedule()) {
        let run = run(&schedule);
        let mut open: HashMap<String, bool> = HashMap::new();
        for event in &run.events {
            let Some(key) = arguments_of(event) else { continue };
            let slot = open.entry(key).or_default();
            if matches!(event, LifecycleEvent::LoadingStart { .. }) {
                prop_assert!(!*slot, "second start while a task is open");
                *slot = true;
            } else {
                prop_assert!(*slot, "terminal without an open task");
                *slot = false;
            }
        }
        prop_assert!(run.max_per_key <= 1);
    }

    #[test]
    fn prop_every_start_ends_exactly_once(schedule in schedule()) {
        let run = run(&schedule);
        let starts = run.events.iter().filter(|e| e.kind() == keyfetch_core::EventKind::LoadingStart).count();
        let terminals = run.events.iter().filter(|e| e.is_terminal()).count();
        prop_assert_eq!(starts, terminals);
        prop_assert_eq!(starts as u64, run.started);
    }

    #[test]
    fn prop_one_call_per_start(schedule in schedule()) {
        let run = run(&schedule);
        prop_assert!(run.calls <= run.started);
        prop_assert!(run.teardowns <= run.cancelled);
    }
}
