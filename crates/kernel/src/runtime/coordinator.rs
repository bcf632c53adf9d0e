// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator: run lifecycle, event loop, and terminal composition

use super::{Envelope, RunCore};
use crate::args::HookArgs;
use rill_core::{
    Event, EventKind, FailureKind, FailureSource, PipelineEndData, RunPhase, RunStatus, StepError,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drive one run from INIT to TERMINAL.
pub(crate) async fn run<S, C>(mut core: RunCore<S, C>, mut rx: mpsc::Receiver<Envelope>)
where
    S: Send + 'static,
    C: Send + 'static,
{
    core.phase = RunPhase::Startup;
    core.publisher
        .publish(Event::system(EventKind::Start).with_payload(json!({
            "pipeline": core.meta.pipeline,
            "schema_version": rill_core::SCHEMA_VERSION,
        })))
        .await;
    core.publisher.pipeline_start().await;

    if core.run_startup_hooks().await && core.status.is_none() {
        core.transition(RunPhase::Executing).await;
        if core.enqueue_entry().await {
            core.event_loop(&mut rx).await;
        }
    }

    // Cancel whatever is still in flight, then drain completions so their
    // outcomes are recorded. No new scheduling happens past this point.
    core.work_cancel.cancel();
    core.draining = true;
    core.drain(&mut rx).await;

    core.transition(RunPhase::Shutdown).await;
    core.run_shutdown_hooks().await;
    core.finish().await;
}

impl<S, C> RunCore<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    /// Advance the phase machine, announcing the transition.
    pub(crate) async fn transition(&mut self, to: RunPhase) {
        let from = self.phase;
        if to <= from {
            return;
        }
        self.phase = to;
        self.publisher
            .publish(Event::system(EventKind::StateChange).with_payload(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            })))
            .await;
    }

    /// Run startup hooks in registration order. Returns false if the run
    /// must skip straight to shutdown.
    async fn run_startup_hooks(&mut self) -> bool {
        let cancelled = self.external_cancel.clone();
        for hook in self.plan.startup_hooks.clone() {
            let args = HookArgs {
                state: Arc::clone(&self.state),
                context: Arc::clone(&self.context),
                meta: self.meta.clone(),
            };
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    self.publisher.publish(Event::system(EventKind::Cancelled)).await;
                    self.status = Some(RunStatus::Cancelled);
                    return false;
                }
                result = hook.call(args) => {
                    if let Err(err) = result {
                        tracing::error!(error = %err, "startup hook failed");
                        self.record_failure(FailureKind::Startup, None, &err).await;
                        self.status = Some(RunStatus::Failed);
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Run shutdown hooks; failures are journaled but cannot change the
    /// primary terminal status.
    async fn run_shutdown_hooks(&mut self) {
        for hook in self.plan.shutdown_hooks.clone() {
            let args = HookArgs {
                state: Arc::clone(&self.state),
                context: Arc::clone(&self.context),
                meta: self.meta.clone(),
            };
            if let Err(err) = hook.call(args).await {
                tracing::error!(error = %err, "shutdown hook failed");
                self.record_failure(FailureKind::Shutdown, None, &err).await;
            }
        }
    }

    /// Classify and journal a failure, notifying error observers.
    pub(crate) async fn record_failure(
        &mut self,
        kind: FailureKind,
        step: Option<&str>,
        err: &StepError,
    ) {
        let (record, infra) = self.classifier.classify(kind, step, err);
        self.publisher.pipeline_error(&record).await;
        self.journal.push(record);
        if let Some(infra) = infra {
            self.journal.push(infra);
        }
    }

    /// Enqueue the roots, or the caller's start override. Returns false if
    /// the override does not resolve (journaled as a validation failure).
    async fn enqueue_entry(&mut self) -> bool {
        match self.start_override.take() {
            Some(name) => match self.plan.index_of(&name) {
                Some(node) => {
                    self.schedule_dynamic(node).await;
                    true
                }
                None => {
                    let err = StepError::new(
                        "rill::validation",
                        format!("start step '{name}' is not part of the plan"),
                    );
                    self.record_failure(FailureKind::Validation, None, &err).await;
                    self.status = Some(RunStatus::Failed);
                    false
                }
            },
            None => {
                for node in self.plan.roots().to_vec() {
                    self.schedule_dynamic(node).await;
                }
                true
            }
        }
    }

    /// Consume envelopes until the run is drained or an exit condition
    /// fires.
    async fn event_loop(&mut self, rx: &mut mpsc::Receiver<Envelope>) {
        // Built once outside the loop: select! re-evaluates its branches on
        // every iteration, and a fresh sleep would reset the deadline.
        let mut deadline: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            match self.run_timeout {
                Some(timeout) => Box::pin(tokio::time::sleep(timeout)),
                None => Box::pin(std::future::pending()),
            };
        let cancelled = self.external_cancel.clone();

        loop {
            if self.status.is_some()
                || self.stop_requested
                || self.publisher.client_closed()
                || self.drained()
            {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut deadline => {
                    let timeout_ms = self.run_timeout.map(|t| t.as_millis() as u64);
                    self.publisher
                        .publish(
                            Event::system(EventKind::Timeout)
                                .with_payload(json!({ "timeout_ms": timeout_ms })),
                        )
                        .await;
                    self.status = Some(RunStatus::Timeout);
                    break;
                }
                _ = cancelled.cancelled() => {
                    self.publisher.publish(Event::system(EventKind::Cancelled)).await;
                    self.status = Some(RunStatus::Cancelled);
                    break;
                }
                envelope = rx.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.publisher.metrics.note_channel_depth(rx.len() + 1);
                            self.dispatch(envelope).await;
                        }
                        None => break,
                    }
                }
            }
        }

        if self.status.is_none() && self.publisher.client_closed() {
            self.status = Some(RunStatus::ClientClosed);
        }
    }

    /// No live invocations, no unfinished maps, no barrier timer that could
    /// still fire.
    fn drained(&self) -> bool {
        self.live.is_empty()
            && self.maps.iter().all(|m| m.remaining == 0)
            && self.pending_barrier_timers.is_empty()
    }

    /// Record outcomes of in-flight work after the event loop has exited.
    async fn drain(&mut self, rx: &mut mpsc::Receiver<Envelope>) {
        while !self.live.is_empty() {
            match rx.recv().await {
                Some(envelope) => self.dispatch(envelope).await,
                None => break,
            }
        }
    }

    pub(crate) async fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Started {
                invocation_id,
                node,
                attempt,
            } => {
                let step = self.plan.step_at(node);
                self.publisher
                    .publish(
                        Event::new(EventKind::StepStart, step.def.name.clone())
                            .with_node_kind(step.def.kind.node_kind())
                            .with_invocation(invocation_id)
                            .with_payload(json!({ "attempt": attempt })),
                    )
                    .await;
            }
            Envelope::Token {
                invocation_id,
                node,
                value,
            } => {
                let step = self.plan.step_at(node);
                self.publisher
                    .publish(
                        Event::new(EventKind::Token, step.def.name.clone())
                            .with_node_kind(step.def.kind.node_kind())
                            .with_invocation(invocation_id)
                            .with_payload(value),
                    )
                    .await;
            }
            Envelope::Completion(completion) => {
                self.process_completion(completion).await;
            }
            Envelope::Forward(event) => {
                self.publisher.forward_child(event).await;
            }
            Envelope::BarrierTimeout { node } => {
                self.fire_barrier_timeout(node).await;
            }
        }
    }

    /// Compose the terminal payload and emit the single FINISH event.
    async fn finish(&mut self) {
        self.journal.extend(self.publisher.take_infra());

        let status = match self.status {
            Some(status) => status,
            None if self.publisher.client_closed() => RunStatus::ClientClosed,
            None => RunStatus::Success,
        };
        let (failure_kind, failure_source) = match status {
            RunStatus::Success => (FailureKind::None, FailureSource::None),
            _ => self
                .journal
                .first()
                .map(|r| (r.kind, r.source))
                .unwrap_or((FailureKind::None, FailureSource::None)),
        };

        let end = PipelineEndData {
            status,
            duration_s: (self.clock.now() - self.started_at).as_secs_f64(),
            failure_kind,
            failure_source,
            failed_step: self.failed_step.clone(),
            errors: self.journal.clone(),
            metrics: self.publisher.metrics.clone(),
        };

        self.transition(RunPhase::Terminal).await;
        let payload = serde_json::to_value(&end).unwrap_or(serde_json::Value::Null);
        self.publisher
            .publish(Event::system(EventKind::Finish).with_payload(payload))
            .await;
        self.publisher.pipeline_end(&end).await;

        tracing::info!(
            status = ?end.status,
            duration_ms = (end.duration_s * 1000.0) as u64,
            errors = end.errors.len(),
            "run finished"
        );
    }
}
