// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the kernel behavioral specs.

use rill_core::{Event, EventKind, PipelineEndData};
use rill_kernel::{Pipeline, RunOptions, RunStream};

/// Mutable scratch state the spec pipelines work against.
#[derive(Debug, Default)]
pub struct TestState {
    pub msg: String,
    pub a: i64,
    pub b: i64,
    pub sum: i64,
    pub counter: i64,
    pub log: Vec<String>,
}

/// Run a finalized pipeline to completion and hand back the full event
/// trace plus the parsed terminal payload.
pub async fn run_to_end(
    flow: &Pipeline<TestState, ()>,
    state: TestState,
    opts: RunOptions,
) -> (Vec<Event>, PipelineEndData) {
    let stream = flow.run(state, (), opts).expect("run should launch");
    collect(stream).await
}

/// Drain any run stream, returning the trace and terminal payload.
pub async fn collect(stream: RunStream) -> (Vec<Event>, PipelineEndData) {
    let events = stream.collect().await;
    let end = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Finish)
        .map(|e| serde_json::from_value(e.payload.clone()).expect("FINISH payload parses"))
        .expect("stream ends with FINISH");
    (events, end)
}

/// The event kinds in stream order.
pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Events of one kind, in stream order.
pub fn of_kind<'a>(events: &'a [Event], kind: EventKind) -> Vec<&'a Event> {
    events.iter().filter(|e| e.kind == kind).collect()
}

/// Events of one kind scoped to one stage, in stream order.
pub fn of_stage<'a>(events: &'a [Event], kind: EventKind, stage: &str) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| e.kind == kind && e.stage == stage)
        .collect()
}

/// Position of the first event matching kind + stage.
pub fn position(events: &[Event], kind: EventKind, stage: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| e.kind == kind && e.stage == stage)
}

/// Every seq value 0..N-1 appears before N, with no gaps.
pub fn assert_seq_gapless(events: &[Event]) {
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(
            event.seq, expected as u64,
            "seq gap at position {expected}: {:?}",
            event.kind
        );
    }
}
