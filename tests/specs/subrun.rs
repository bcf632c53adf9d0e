// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sub-runs: nested kernels forwarded into the parent stream.

use crate::prelude::*;
use rill_core::{Directive, EventKind, RunStatus, StepError};
use rill_kernel::{Pipeline, RunOptions, StepArgs, StepOptions};
use serde_json::json;
use std::sync::Arc;

fn child_pipeline(failing: bool) -> Arc<Pipeline<TestState, ()>> {
    let mut child = Pipeline::new("child");
    child
        .register_step("inner", StepOptions::new().bind(["state"]), move |args: StepArgs<TestState, ()>| async move {
            if failing {
                return Err(StepError::msg("inner exploded"));
            }
            args.required_state()?.lock().log.push("inner ran".to_string());
            Ok(Directive::Value(json!("inner-done")))
        })
        .unwrap();
    child.finalize().unwrap();
    Arc::new(child)
}

fn parent_pipeline(child: Arc<Pipeline<TestState, ()>>) -> Pipeline<TestState, ()> {
    let mut parent = Pipeline::new("parent");
    parent
        .register_sub(
            "nested",
            StepOptions::new().targets(["after"]),
            move |_args: StepArgs<TestState, ()>| {
                let child = Arc::clone(&child);
                async move {
                    child.run(TestState::default(), (), RunOptions::new())
                        .map_err(|e| StepError::new("rill::subrun", e.to_string()))
                }
            },
        )
        .unwrap();
    parent
        .register_step("after", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
            Ok(Directive::Done)
        })
        .unwrap();
    parent.finalize().unwrap();
    parent
}

#[tokio::test]
async fn child_events_are_forwarded_with_rewritten_lineage() {
    let parent = parent_pipeline(child_pipeline(false));
    let stream = parent
        .run(TestState::default(), (), RunOptions::new())
        .unwrap();
    let parent_run = stream.run_id().clone();
    let (events, end) = collect(stream).await;

    assert_eq!(end.status, RunStatus::Success);

    // Forwarded events: same run_id as the parent, parent_run_id names the
    // child run, origin preserved from the nested event.
    let forwarded: Vec<_> = events
        .iter()
        .filter(|e| e.origin_run_id != parent_run)
        .collect();
    assert!(!forwarded.is_empty(), "no child events were forwarded");
    let child_run = forwarded[0].parent_run_id.clone().unwrap();
    for event in &forwarded {
        assert_eq!(event.run_id, parent_run);
        assert_eq!(event.parent_run_id.as_ref(), Some(&child_run));
        assert_eq!(event.origin_run_id, child_run);
    }

    // The child's step ran inside the forwarded trace.
    assert!(forwarded
        .iter()
        .any(|e| e.kind == EventKind::StepStart && e.stage == "inner"));

    // The child FINISH is absorbed: exactly one FINISH total, the parent's.
    let finishes = of_kind(&events, EventKind::Finish);
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].run_id, parent_run);
    assert_eq!(finishes[0].origin_run_id, parent_run);

    // seq is re-stamped on entry into the parent publisher.
    assert_seq_gapless(&events);

    // The sub step completed normally and scheduled its successors.
    assert_eq!(of_stage(&events, EventKind::StepStart, "after").len(), 1);
}

#[tokio::test]
async fn child_failure_surfaces_as_a_sub_step_failure() {
    let parent = parent_pipeline(child_pipeline(true));
    let (events, end) = run_to_end(&parent, TestState::default(), RunOptions::new()).await;

    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.failed_step.as_deref(), Some("nested"));
    assert_eq!(of_stage(&events, EventKind::StepError, "nested").len(), 1);
    assert_eq!(end.errors[0].error_type, "rill::subrun");

    // The nested terminal payload rides the journal record's message and
    // the sub step's successors never ran.
    assert!(of_stage(&events, EventKind::StepStart, "after").is_empty());
}
