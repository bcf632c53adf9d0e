// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linear execution, stop semantics, and run phases.

use crate::prelude::*;
use rill_core::{Directive, EventKind, FailureKind, RunStatus, StepKind};
use rill_kernel::{Pipeline, RunOptions, StepArgs, StepOptions};
use serde_json::json;

fn linear_chain() -> Pipeline<TestState, ()> {
    let mut flow = Pipeline::new("linear");
    flow.register_step(
        "greet",
        StepOptions::new().targets(["respond"]).bind(["state"]),
        |args: StepArgs<TestState, ()>| async move {
            let state = args.required_state()?;
            state.lock().msg = "Hello".to_string();
            Ok(Directive::Done)
        },
    )
    .unwrap();
    flow.register_streaming(
        "respond",
        StepOptions::new().bind(["state"]),
        |args: StepArgs<TestState, ()>| {
            async_stream::stream! {
                let msg = match args.required_state() {
                    Ok(state) => {
                        let guard = state.lock();
                        format!("{}, World!", guard.msg)
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                yield Ok(json!(msg));
            }
        },
    )
    .unwrap();
    flow.finalize().unwrap();
    flow
}

#[tokio::test]
async fn linear_chain_emits_the_expected_sequence() {
    let flow = linear_chain();
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    let sequence: Vec<EventKind> = kinds(&events)
        .into_iter()
        .filter(|k| *k != EventKind::StateChange)
        .collect();
    assert_eq!(
        sequence,
        vec![
            EventKind::Start,
            EventKind::StepStart,
            EventKind::StepEnd,
            EventKind::StepStart,
            EventKind::Token,
            EventKind::StepEnd,
            EventKind::Finish,
        ]
    );

    let token = &of_kind(&events, EventKind::Token)[0];
    assert_eq!(token.stage, "respond");
    assert_eq!(token.payload, json!("Hello, World!"));

    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(end.failure_kind, FailureKind::None);
    assert!(end.errors.is_empty());
    assert_eq!(end.metrics.tokens, 1);
}

#[tokio::test]
async fn start_is_first_and_finish_is_last() {
    let flow = linear_chain();
    let (events, _) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(events.first().map(|e| e.kind), Some(EventKind::Start));
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Finish));
    assert_seq_gapless(&events);
}

#[tokio::test]
async fn phases_are_announced_in_order() {
    let flow = linear_chain();
    let (events, _) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    let transitions: Vec<String> = of_kind(&events, EventKind::StateChange)
        .iter()
        .map(|e| e.payload["to"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(transitions, vec!["executing", "shutdown", "terminal"]);
}

#[tokio::test]
async fn stop_before_successors_terminates_with_success() {
    let mut flow = Pipeline::new("stopper");
    flow.register_step(
        "first",
        StepOptions::new().targets(["never"]),
        |_args: StepArgs<TestState, ()>| async { Ok(Directive::Stop) },
    )
    .unwrap();
    flow.register_step("never", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Value(json!("unreachable")))
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert!(of_stage(&events, EventKind::StepStart, "never").is_empty());
}

#[tokio::test]
async fn start_override_enqueues_only_that_step() {
    let flow = linear_chain();
    let (events, end) =
        run_to_end(&flow, TestState::default(), RunOptions::new().start("respond")).await;
    assert_eq!(end.status, RunStatus::Success);
    assert!(of_stage(&events, EventKind::StepStart, "greet").is_empty());
    assert_eq!(of_stage(&events, EventKind::StepStart, "respond").len(), 1);
}

#[tokio::test]
async fn unknown_start_override_is_a_validation_failure() {
    let flow = linear_chain();
    let (events, end) =
        run_to_end(&flow, TestState::default(), RunOptions::new().start("ghost")).await;
    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.failure_kind, FailureKind::Validation);
    assert!(of_kind(&events, EventKind::StepStart).is_empty());
}

#[tokio::test]
async fn pseudo_anchor_fans_out_to_real_roots() {
    let mut flow = Pipeline::new("anchored");
    flow.register_pseudo(
        "entry",
        StepKind::PseudoStart,
        StepOptions::new().targets(["left", "right"]),
    )
    .unwrap();
    flow.register_step("left", StepOptions::new().bind(["state"]), |args: StepArgs<TestState, ()>| async move {
        args.required_state()?.lock().a = 1;
        Ok(Directive::Done)
    })
    .unwrap();
    flow.register_step("right", StepOptions::new().bind(["state"]), |args: StepArgs<TestState, ()>| async move {
        args.required_state()?.lock().b = 2;
        Ok(Directive::Done)
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(of_stage(&events, EventKind::StepStart, "left").len(), 1);
    assert_eq!(of_stage(&events, EventKind::StepStart, "right").len(), 1);
}
