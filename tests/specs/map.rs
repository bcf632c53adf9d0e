// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Map fan-out, worker throttling, and the empty-iterable boundary.

use crate::prelude::*;
use rill_core::{Directive, EventKind, RunStatus};
use rill_kernel::{Pipeline, RunOptions, StepArgs, StepOptions};
use serde_json::json;
use std::time::Duration;

fn map_pipeline(cap: Option<usize>, items: Vec<i64>) -> Pipeline<TestState, ()> {
    let mut flow = Pipeline::new("mapper");
    let mut opts = StepOptions::new().targets(["after"]);
    if let Some(cap) = cap {
        opts = opts.max_concurrency(cap);
    }
    flow.register_map(
        "produce",
        "worker",
        opts,
        move |_args: StepArgs<TestState, ()>| {
            let items = items.clone();
            async move { Ok(Directive::Items(items.into_iter().map(|i| json!(i)).collect())) }
        },
    )
    .unwrap();
    flow.register_step(
        "worker",
        StepOptions::new().bind(["state", "item"]),
        |args: StepArgs<TestState, ()>| async move {
            let item = args.required_payload_item()?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let state = args.required_state()?;
            state.lock().sum += item.as_i64().unwrap_or(0);
            Ok(Directive::Done)
        },
    )
    .unwrap();
    flow.register_step("after", StepOptions::new().bind(["state"]), |args: StepArgs<TestState, ()>| async move {
        args.required_state()?.lock().log.push("after".to_string());
        Ok(Directive::Done)
    })
    .unwrap();
    flow.finalize().unwrap();
    flow
}

#[tokio::test]
async fn map_produces_one_worker_per_item() {
    let flow = map_pipeline(None, vec![1, 2, 3, 4, 5]);
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(of_kind(&events, EventKind::MapStart).len(), 1);
    assert_eq!(of_kind(&events, EventKind::MapWorker).len(), 5);
    assert_eq!(of_kind(&events, EventKind::MapComplete).len(), 1);
    assert_eq!(of_stage(&events, EventKind::StepStart, "worker").len(), 5);
    assert_eq!(end.metrics.map_fanout_total, 5);

    // Each payload item went to exactly one worker.
    assert_eq!(end.metrics.steps["worker"].invocations, 5);

    // The map's successors run only after MAP_COMPLETE.
    let complete = position(&events, EventKind::MapComplete, "produce").unwrap();
    let after_start = position(&events, EventKind::StepStart, "after").unwrap();
    assert!(complete < after_start);
}

#[tokio::test]
async fn max_concurrency_caps_running_workers() {
    let flow = map_pipeline(Some(2), vec![1, 2, 3, 4, 5]);
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(of_kind(&events, EventKind::MapWorker).len(), 5);

    // Scan the serialized event order: at no point are more than two
    // worker invocations between STEP_START and STEP_END.
    let mut running: i64 = 0;
    let mut peak: i64 = 0;
    for event in &events {
        if event.stage != "worker" {
            continue;
        }
        match event.kind {
            EventKind::StepStart => {
                running += 1;
                peak = peak.max(running);
            }
            EventKind::StepEnd | EventKind::StepError => running -= 1,
            _ => {}
        }
    }
    assert!(peak <= 2, "worker concurrency peaked at {peak}");
}

#[tokio::test]
async fn empty_map_satisfies_the_node_immediately() {
    let flow = map_pipeline(None, vec![]);
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(of_kind(&events, EventKind::MapStart).len(), 1);
    assert_eq!(of_kind(&events, EventKind::MapComplete).len(), 1);
    assert!(of_kind(&events, EventKind::MapWorker).is_empty());
    assert!(of_stage(&events, EventKind::StepStart, "worker").is_empty());

    // Successors are still scheduled.
    assert_eq!(of_stage(&events, EventKind::StepStart, "after").len(), 1);
}
