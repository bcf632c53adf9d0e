// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types emitted by the kernel

use crate::id::{InvocationId, RunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Wire schema version for events and terminal payloads.
///
/// New event fields must be additive; breaking shape changes bump the major
/// version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Stage name used for events not scoped to a single step.
pub const SYSTEM_STAGE: &str = "system";

/// Kind of event flowing through a run's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Finish,
    Suspend,
    Timeout,
    Cancelled,
    StepStart,
    StepEnd,
    StepError,
    Token,
    BarrierWait,
    BarrierRelease,
    MapStart,
    MapWorker,
    MapComplete,
    StateChange,
}

impl EventKind {
    /// Stable wire name (the serde snake_case rendering).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Finish => "finish",
            EventKind::Suspend => "suspend",
            EventKind::Timeout => "timeout",
            EventKind::Cancelled => "cancelled",
            EventKind::StepStart => "step_start",
            EventKind::StepEnd => "step_end",
            EventKind::StepError => "step_error",
            EventKind::Token => "token",
            EventKind::BarrierWait => "barrier_wait",
            EventKind::BarrierRelease => "barrier_release",
            EventKind::MapStart => "map_start",
            EventKind::MapWorker => "map_worker",
            EventKind::MapComplete => "map_complete",
            EventKind::StateChange => "state_change",
        }
    }
}

/// Kind of node an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    System,
    Step,
    Map,
    Switch,
    Sub,
    Barrier,
    Pseudo,
}

/// A single event in a run's stream.
///
/// Serializes with `{"type": "step_start", ...}` shape. `seq` is stamped
/// monotonically per run by the publisher; consumers may rely on `seq` but
/// not on wall-clock ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Step name, or `"system"` for run-scoped events.
    pub stage: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub timestamp_ms: u64,
    pub seq: u64,
    pub run_id: RunId,
    /// Run that actually produced the event; differs from `run_id` for
    /// events forwarded out of a sub-run.
    pub origin_run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, Value>>,
}

impl Event {
    /// Build an unstamped event; the publisher fills seq, lineage, and
    /// timestamp.
    pub fn new(kind: EventKind, stage: impl Into<String>) -> Self {
        Self {
            kind,
            stage: stage.into(),
            payload: Value::Null,
            timestamp_ms: 0,
            seq: 0,
            run_id: RunId::new(""),
            origin_run_id: RunId::new(""),
            parent_run_id: None,
            node_kind: None,
            invocation_id: None,
            meta: None,
        }
    }

    /// Build an unstamped run-scoped (`stage = "system"`) event.
    pub fn system(kind: EventKind) -> Self {
        Self::new(kind, SYSTEM_STAGE).with_node_kind(NodeKind::System)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_node_kind(mut self, node_kind: NodeKind) -> Self {
        self.node_kind = Some(node_kind);
        self
    }

    pub fn with_invocation(mut self, invocation_id: InvocationId) -> Self {
        self.invocation_id = Some(invocation_id);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// True for events scoped to one step invocation.
    pub fn is_step_scoped(&self) -> bool {
        self.invocation_id.is_some()
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
