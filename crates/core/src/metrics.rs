// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime metrics collected at the event publisher

use crate::event::EventKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Latency and invocation statistics for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub invocations: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl StepStats {
    pub fn record(&mut self, elapsed_ms: u64) {
        if self.invocations == 0 || elapsed_ms < self.min_ms {
            self.min_ms = elapsed_ms;
        }
        if elapsed_ms > self.max_ms {
            self.max_ms = elapsed_ms;
        }
        self.invocations += 1;
        self.total_ms += elapsed_ms;
    }

    pub fn avg_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.invocations as f64
        }
    }
}

/// Counters accumulated over one run.
///
/// Mutated only on the coordinator; the terminal payload carries a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// Event counts keyed by wire name.
    pub events: IndexMap<String, u64>,
    /// Per-step invocation counts and durations.
    pub steps: IndexMap<String, StepStats>,
    pub peak_channel_depth: usize,
    pub peak_live_invocations: usize,
    pub map_fanout_total: u64,
    pub barrier_waits: u64,
    pub barrier_timeouts: u64,
    pub tokens: u64,
    pub suspends: u64,
}

impl RuntimeMetrics {
    pub fn record_event(&mut self, kind: EventKind) {
        *self.events.entry(kind.as_str().to_string()).or_insert(0) += 1;
        match kind {
            EventKind::Token => self.tokens += 1,
            EventKind::Suspend => self.suspends += 1,
            EventKind::BarrierWait => self.barrier_waits += 1,
            EventKind::MapWorker => self.map_fanout_total += 1,
            _ => {}
        }
    }

    pub fn record_step_duration(&mut self, step: &str, elapsed_ms: u64) {
        self.steps.entry(step.to_string()).or_default().record(elapsed_ms);
    }

    pub fn note_channel_depth(&mut self, depth: usize) {
        if depth > self.peak_channel_depth {
            self.peak_channel_depth = depth;
        }
    }

    pub fn note_live_invocations(&mut self, live: usize) {
        if live > self.peak_live_invocations {
            self.peak_live_invocations = live;
        }
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.events.get(kind.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
