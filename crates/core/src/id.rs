// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run and invocation identifiers, and the generators that mint them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix of an id for log lines and span fields; full ids stay on events.
fn prefix(id: &str, n: usize) -> &str {
    id.get(..n).unwrap_or(id)
}

/// Identifier for a single pipeline run.
///
/// Stable for the run's lifetime. Sub-runs mint their own `RunId` and are
/// correlated with the parent through the event lineage fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for tracing output.
    pub fn short(&self, n: usize) -> &str {
        prefix(&self.0, n)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one attempt at executing a single step.
///
/// A retried step gets a fresh `InvocationId` per attempt; event pairing
/// (STEP_START to STEP_END/STEP_ERROR, token attribution, latency
/// tracking) keys on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for tracing output.
    pub fn short(&self, n: usize) -> &str {
        prefix(&self.0, n)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints the identifiers a run consumes.
pub trait IdGen: Send + Sync {
    fn run_id(&self) -> RunId;
    fn invocation_id(&self) -> InvocationId;
}

/// Random UUID-backed generator for production use.
#[derive(Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn run_id(&self) -> RunId {
        RunId::new(uuid::Uuid::new_v4().to_string())
    }

    fn invocation_id(&self) -> InvocationId {
        InvocationId::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Deterministic generator for tests: `run-1`, `run-2`, ... and `inv-1`,
/// `inv-2`, ... on independent counters, so a trace's ids are predictable
/// regardless of how runs and invocations interleave.
#[derive(Default)]
pub struct SequentialIdGen {
    runs: AtomicU64,
    invocations: AtomicU64,
}

impl SequentialIdGen {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGen for SequentialIdGen {
    fn run_id(&self) -> RunId {
        RunId::new(format!("run-{}", self.runs.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn invocation_id(&self) -> InvocationId {
        InvocationId::new(format!(
            "inv-{}",
            self.invocations.fetch_add(1, Ordering::SeqCst) + 1
        ))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
