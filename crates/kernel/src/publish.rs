// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event publisher: the single chokepoint every emitted event passes
//! through
//!
//! Stamps sequence and lineage, applies event hooks, notifies observers
//! (serialized, failures journaled as infra), collects metrics, and
//! forwards to the output stream. Lives on the coordinator task, so none
//! of its state needs locking.

use crate::args::RunMeta;
use crate::observer::{EventHook, Observer};
use parking_lot::Mutex;
use rill_core::{
    Clock, Event, EventKind, FailureKind, FailureRecord, FailureSource, InvocationId,
    PipelineEndData, RunId, RuntimeMetrics,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub(crate) struct Publisher<S, C> {
    clock: Arc<dyn Clock>,
    run_id: RunId,
    parent_run_id: Option<RunId>,
    seq: u64,
    hooks: Vec<EventHook>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    pub(crate) metrics: RuntimeMetrics,
    open_steps: HashMap<InvocationId, Instant>,
    out: mpsc::Sender<Event>,
    client_closed: bool,
    state: Arc<Mutex<S>>,
    context: Arc<Mutex<C>>,
    meta: RunMeta,
    infra: Vec<FailureRecord>,
}

impl<S, C> Publisher<S, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        meta: RunMeta,
        hooks: Vec<EventHook>,
        observers: Vec<Arc<dyn Observer<S, C>>>,
        out: mpsc::Sender<Event>,
        state: Arc<Mutex<S>>,
        context: Arc<Mutex<C>>,
    ) -> Self {
        Self {
            clock,
            run_id: meta.run_id.clone(),
            parent_run_id: meta.parent_run_id.clone(),
            seq: 0,
            hooks,
            observers,
            metrics: RuntimeMetrics::default(),
            open_steps: HashMap::new(),
            out,
            client_closed: false,
            state,
            context,
            meta,
            infra: Vec::new(),
        }
    }

    pub(crate) fn client_closed(&self) -> bool {
        self.client_closed
    }

    /// Drain infra failures (observer/classifier trouble) into the journal.
    pub(crate) fn take_infra(&mut self) -> Vec<FailureRecord> {
        std::mem::take(&mut self.infra)
    }

    /// Publish a locally-produced event.
    pub(crate) async fn publish(&mut self, mut event: Event) {
        event.run_id = self.run_id.clone();
        event.origin_run_id = self.run_id.clone();
        event.parent_run_id = self.parent_run_id.clone();
        self.dispatch(event).await;
    }

    /// Publish an event forwarded out of a sub-run: the parent takes over
    /// `run_id`, the child run becomes `parent_run_id`, and the origin is
    /// preserved from the nested event.
    pub(crate) async fn forward_child(&mut self, mut event: Event) {
        event.parent_run_id = Some(std::mem::replace(&mut event.run_id, self.run_id.clone()));
        self.dispatch(event).await;
    }

    async fn dispatch(&mut self, mut event: Event) {
        event.seq = self.seq;
        self.seq += 1;
        event.timestamp_ms = self.clock.epoch_ms();

        for hook in &self.hooks {
            event = hook(event);
        }

        self.collect_metrics(&event);

        for observer in &self.observers {
            if let Err(err) = observer
                .on_event(&self.state, &self.context, &self.meta, &event)
                .await
            {
                tracing::warn!(error = %err, seq = event.seq, "observer failed");
                self.infra.push(
                    FailureRecord::new(FailureKind::Infra, FailureSource::Framework, err.message)
                        .with_error_type(err.error_type)
                        .with_reason("observer_error"),
                );
            }
        }

        if !self.client_closed && self.out.send(event).await.is_err() {
            self.client_closed = true;
            tracing::debug!(run = %self.run_id.short(8), "event stream consumer closed");
        }
    }

    fn collect_metrics(&mut self, event: &Event) {
        self.metrics.record_event(event.kind);
        // Latency pairing applies only to locally-produced step events;
        // forwarded child invocations keep their stats in the child run.
        if event.origin_run_id != self.run_id {
            return;
        }
        let Some(invocation_id) = &event.invocation_id else {
            return;
        };
        match event.kind {
            EventKind::StepStart => {
                self.open_steps
                    .insert(invocation_id.clone(), self.clock.now());
            }
            EventKind::StepEnd | EventKind::StepError => {
                if let Some(started) = self.open_steps.remove(invocation_id) {
                    let elapsed_ms = (self.clock.now() - started).as_millis() as u64;
                    self.metrics.record_step_duration(&event.stage, elapsed_ms);
                }
            }
            _ => {}
        }
    }

    pub(crate) async fn pipeline_start(&mut self) {
        for observer in &self.observers {
            if let Err(err) = observer
                .on_pipeline_start(&self.state, &self.context, &self.meta)
                .await
            {
                self.infra.push(
                    FailureRecord::new(FailureKind::Infra, FailureSource::Framework, err.message)
                        .with_error_type(err.error_type)
                        .with_reason("observer_error"),
                );
            }
        }
    }

    pub(crate) async fn pipeline_end(&mut self, end: &PipelineEndData) {
        for observer in &self.observers {
            if let Err(err) = observer
                .on_pipeline_end(&self.state, &self.context, &self.meta, end)
                .await
            {
                tracing::warn!(error = %err, "observer failed in on_pipeline_end");
            }
        }
    }

    pub(crate) async fn pipeline_error(&mut self, record: &FailureRecord) {
        for observer in &self.observers {
            if let Err(err) = observer
                .on_pipeline_error(&self.state, &self.context, &self.meta, record)
                .await
            {
                self.infra.push(
                    FailureRecord::new(FailureKind::Infra, FailureSource::Framework, err.message)
                        .with_error_type(err.error_type)
                        .with_reason("observer_error"),
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
