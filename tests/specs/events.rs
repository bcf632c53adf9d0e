// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream-wide invariants: ordering, pairing, observers, client close.

use crate::prelude::*;
use async_trait::async_trait;
use rill_core::{Directive, Event, EventKind, FailureKind, PipelineEndData, RunStatus, StepError};
use rill_kernel::{Observer, Pipeline, RunMeta, RunOptions, StateCell, StepArgs, StepOptions};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

fn wide_pipeline() -> Pipeline<TestState, ()> {
    let mut flow = Pipeline::new("wide");
    flow.register_step(
        "start",
        StepOptions::new().targets(["a", "b", "c"]),
        |_args: StepArgs<TestState, ()>| async { Ok(Directive::Done) },
    )
    .unwrap();
    for (name, delay_ms) in [("a", 5u64), ("b", 15), ("c", 10)] {
        flow.register_step(name, StepOptions::new(), move |_args: StepArgs<TestState, ()>| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Directive::Done)
        })
        .unwrap();
    }
    flow.finalize().unwrap();
    flow
}

#[tokio::test]
async fn seq_is_gapless_under_concurrency() {
    let flow = wide_pipeline();
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert_seq_gapless(&events);
    assert!(end.metrics.peak_live_invocations >= 2);
}

#[tokio::test]
async fn every_invocation_pairs_start_with_exactly_one_end() {
    let flow = wide_pipeline();
    let (events, _) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    let mut open: HashMap<String, u32> = HashMap::new();
    for event in &events {
        let Some(inv) = &event.invocation_id else {
            continue;
        };
        match event.kind {
            EventKind::StepStart => *open.entry(inv.to_string()).or_insert(0) += 1,
            EventKind::StepEnd | EventKind::StepError => {
                let count = open.get_mut(inv.as_str()).expect("end before start");
                *count -= 1;
            }
            _ => {}
        }
    }
    assert!(open.values().all(|v| *v == 0), "unpaired invocations: {open:?}");
}

#[derive(Default)]
struct Recorder {
    events: StdMutex<Vec<EventKind>>,
    end: StdMutex<Option<PipelineEndData>>,
}

#[async_trait]
impl Observer<TestState, ()> for Recorder {
    async fn on_event(
        &self,
        _state: &StateCell<TestState>,
        _context: &StateCell<()>,
        _meta: &RunMeta,
        event: &Event,
    ) -> Result<(), StepError> {
        self.events.lock().map_err(|_| StepError::msg("poisoned"))?.push(event.kind);
        Ok(())
    }

    async fn on_pipeline_end(
        &self,
        _state: &StateCell<TestState>,
        _context: &StateCell<()>,
        _meta: &RunMeta,
        end: &PipelineEndData,
    ) -> Result<(), StepError> {
        *self.end.lock().map_err(|_| StepError::msg("poisoned"))? = Some(end.clone());
        Ok(())
    }
}

#[tokio::test]
async fn observers_see_every_event_in_stream_order() {
    let recorder = Arc::new(Recorder::default());
    let mut flow = Pipeline::new("observed");
    flow.register_step("only", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.add_observer(recorder.clone()).unwrap();
    flow.finalize().unwrap();

    let (events, _) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    let seen = recorder.events.lock().unwrap().clone();
    assert_eq!(seen, kinds(&events));
}

#[tokio::test]
async fn event_hooks_transform_before_observers_and_stream() {
    let mut flow = Pipeline::new("hooked");
    flow.register_step("only", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.add_event_hook(|event| event.with_meta("stamped", json!(true)))
        .unwrap();
    flow.finalize().unwrap();

    let (events, _) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert!(events
        .iter()
        .all(|e| e.meta.as_ref().and_then(|m| m.get("stamped")) == Some(&json!(true))));
}

#[tokio::test]
async fn dropping_the_stream_records_client_closed() {
    let recorder = Arc::new(Recorder::default());
    let mut flow = Pipeline::new("abandoned");
    flow.register_step(
        "slow",
        StepOptions::new().bind(["token"]),
        |_args: StepArgs<TestState, ()>| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Directive::Done)
        },
    )
    .unwrap();
    flow.add_observer(recorder.clone()).unwrap();
    flow.finalize().unwrap();

    let mut stream = flow
        .run(TestState::default(), (), RunOptions::new())
        .unwrap();
    // Read one event, then walk away.
    let first = stream.next().await.unwrap();
    assert_eq!(first.kind, EventKind::Start);
    drop(stream);

    // The kernel still winds the run down and reports internally.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let end = loop {
        if let Some(end) = recorder.end.lock().unwrap().clone() {
            break end;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run never reached its terminal state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(end.status, RunStatus::ClientClosed);

    // Observers saw the FINISH the closed stream never received.
    assert!(recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|k| *k == EventKind::Finish));
}

#[tokio::test]
async fn observer_failures_surface_as_infra_records() {
    struct Exploding;

    #[async_trait]
    impl Observer<TestState, ()> for Exploding {
        async fn on_event(
            &self,
            _state: &StateCell<TestState>,
            _context: &StateCell<()>,
            _meta: &RunMeta,
            _event: &Event,
        ) -> Result<(), StepError> {
            Err(StepError::msg("observer exploded"))
        }
    }

    let mut flow = Pipeline::new("infra");
    flow.register_step("only", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.add_observer(Arc::new(Exploding)).unwrap();
    flow.finalize().unwrap();

    let (_, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    // Observer trouble never changes the run outcome.
    assert_eq!(end.status, RunStatus::Success);
    assert!(end
        .errors
        .iter()
        .any(|r| r.kind == FailureKind::Infra && r.reason.as_deref() == Some("observer_error")));
}
