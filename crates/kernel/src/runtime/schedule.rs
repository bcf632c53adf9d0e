// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling: successor propagation, barriers, map fan-out, directives

use super::{CompletionOutcome, Envelope, LiveInvocation, MapRun, RunCore, StepCompletion};
use crate::graph::BarrierDecision;
use crate::invoker::{self, InvocationSpec};
use rill_core::{
    Directive, Event, EventKind, FailureKind, InvocationId, NodeKind, RunStatus, StepError,
    Targets,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;

impl<S, C> RunCore<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    /// Schedule a node outside barrier accounting: roots, dynamic targets,
    /// retries.
    pub(crate) async fn schedule_dynamic(&mut self, node: usize) {
        self.schedule_node(node, None, 1, None, None).await;
    }

    /// Spawn one invocation of `node` onto the task group.
    ///
    /// Returns the invocation id, or `None` when the run is winding down
    /// and no new work may start.
    pub(crate) async fn schedule_node(
        &mut self,
        node: usize,
        payload_item: Option<Value>,
        attempt: u32,
        map_run: Option<usize>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Option<InvocationId> {
        if self.draining || self.status.is_some() || self.stop_requested {
            return None;
        }
        self.graph.mark_satisfied(node);
        // A retry re-enters the current wave; re-arming downstream here
        // would wipe sibling parents' completions on a shared barrier.
        if attempt == 1 {
            self.announce_barriers(node).await;
        }

        let plan = Arc::clone(&self.plan);
        let step = plan.step_at(node);
        let invocation_id = self.id_gen.invocation_id();
        let cancel = self.work_cancel.child_token();
        self.live
            .insert(invocation_id.clone(), LiveInvocation { node, map_run });
        self.publisher.metrics.note_live_invocations(self.live.len());

        let spec = InvocationSpec {
            plan: Arc::clone(&self.plan),
            node,
            invocation_id: invocation_id.clone(),
            attempt,
            payload_item,
            is_map_worker: map_run.is_some(),
            state: Arc::clone(&self.state),
            context: Arc::clone(&self.context),
            cancel,
            ctrl: self.ctrl_tx.clone(),
            semaphore,
            clock: Arc::clone(&self.clock),
        };
        let span = tracing::info_span!(
            "invoke",
            step = %step.def.name,
            invocation = invocation_id.short(8)
        );
        self.tasks.spawn(invoker::run_invocation(spec).instrument(span));
        Some(invocation_id)
    }

    /// Re-arm downstream barriers and emit BARRIER_WAIT for multi-parent
    /// successors of a node being scheduled (once per node per run).
    async fn announce_barriers(&mut self, node: usize) {
        let plan = Arc::clone(&self.plan);
        for &m in plan.successors_of(node) {
            self.graph.rearm(m);
            let parent_count = plan.parents_of(m).len();
            if parent_count >= 2 && self.graph.needs_wait_event(m) {
                let name = plan.step_at(m).def.name.clone();
                self.publisher
                    .publish(
                        Event::new(EventKind::BarrierWait, name)
                            .with_node_kind(NodeKind::Barrier)
                            .with_payload(json!({ "parents": parent_count })),
                    )
                    .await;
            }
        }
    }

    /// Process one step completion announced over the control channel.
    pub(crate) async fn process_completion(&mut self, completion: StepCompletion) {
        let StepCompletion {
            invocation_id,
            attempt,
            payload_item,
            outcome,
            handled_error,
        } = completion;
        let Some(live) = self.live.remove(&invocation_id) else {
            return;
        };
        let plan = Arc::clone(&self.plan);
        let step_name = plan.step_at(live.node).def.name.clone();
        let node_kind = plan.step_at(live.node).def.kind.node_kind();
        let map_idx = live.map_run;

        if let Some(original) = &handled_error {
            self.step_error_event(&step_name, node_kind, &invocation_id, original)
                .await;
        }

        match outcome {
            CompletionOutcome::Cancelled => {
                tracing::debug!(step = %step_name, "invocation cancelled");
            }
            CompletionOutcome::Failed(err) => {
                self.step_error_event(&step_name, node_kind, &invocation_id, &err)
                    .await;
                if self.status.is_none() {
                    self.status = Some(RunStatus::Failed);
                    self.failed_step = Some(step_name.clone());
                }
                // Unhandled failure cancels in-flight peers; shutdown still
                // runs.
                self.work_cancel.cancel();
            }
            CompletionOutcome::Directive(directive) => {
                self.apply_directive(
                    &invocation_id,
                    attempt,
                    payload_item,
                    live.node,
                    &step_name,
                    node_kind,
                    directive,
                    map_idx,
                )
                .await;
            }
        }

        if let Some(idx) = map_idx {
            self.maps[idx].remaining = self.maps[idx].remaining.saturating_sub(1);
            if self.maps[idx].remaining == 0
                && !self.draining
                && self.status.is_none()
                && !self.stop_requested
            {
                let map_node = self.maps[idx].node;
                let map_name = plan.step_at(map_node).def.name.clone();
                self.publisher
                    .publish(
                        Event::new(EventKind::MapComplete, map_name).with_node_kind(NodeKind::Map),
                    )
                    .await;
                self.propagate(map_node).await;
            }
        }
    }

    /// Publish STEP_ERROR, journal the classified record, and notify error
    /// observers.
    async fn step_error_event(
        &mut self,
        step_name: &str,
        node_kind: NodeKind,
        invocation_id: &InvocationId,
        err: &StepError,
    ) {
        let (record, infra) = self.classifier.classify(FailureKind::Step, Some(step_name), err);
        let payload = serde_json::to_value(&record).unwrap_or(Value::Null);
        self.publisher
            .publish(
                Event::new(EventKind::StepError, step_name)
                    .with_node_kind(node_kind)
                    .with_invocation(invocation_id.clone())
                    .with_payload(payload),
            )
            .await;
        self.publisher.pipeline_error(&record).await;
        self.journal.push(record);
        if let Some(infra) = infra {
            self.journal.push(infra);
        }
    }

    async fn step_end(
        &mut self,
        step_name: &str,
        node_kind: NodeKind,
        invocation_id: &InvocationId,
        payload: Value,
        meta: &[(&str, Value)],
    ) {
        let mut event = Event::new(EventKind::StepEnd, step_name)
            .with_node_kind(node_kind)
            .with_invocation(invocation_id.clone())
            .with_payload(payload);
        for (key, value) in meta {
            event = event.with_meta(*key, value.clone());
        }
        self.publisher.publish(event).await;
    }

    /// Dispatch on the routing directive a completed step returned.
    #[allow(clippy::too_many_arguments)]
    async fn apply_directive(
        &mut self,
        invocation_id: &InvocationId,
        attempt: u32,
        payload_item: Option<Value>,
        node: usize,
        step_name: &str,
        node_kind: NodeKind,
        directive: Directive,
        map_idx: Option<usize>,
    ) {
        match directive {
            Directive::Done => {
                self.step_end(step_name, node_kind, invocation_id, Value::Null, &[])
                    .await;
                self.propagate(node).await;
            }
            Directive::Value(value) => {
                self.step_end(step_name, node_kind, invocation_id, value, &[])
                    .await;
                self.propagate(node).await;
            }
            Directive::Skip => {
                self.step_end(
                    step_name,
                    node_kind,
                    invocation_id,
                    Value::Null,
                    &[("skipped", json!(true))],
                )
                .await;
                self.propagate(node).await;
            }
            Directive::Stop => {
                self.step_end(step_name, node_kind, invocation_id, Value::Null, &[])
                    .await;
                self.stop_requested = true;
            }
            Directive::Suspend { reason } => {
                self.step_end(
                    step_name,
                    node_kind,
                    invocation_id,
                    Value::Null,
                    &[("suspended", json!(true))],
                )
                .await;
                self.publisher
                    .publish(
                        Event::new(EventKind::Suspend, step_name)
                            .with_node_kind(node_kind)
                            .with_payload(json!({ "reason": reason })),
                    )
                    .await;
            }
            Directive::Retry => {
                self.step_end(
                    step_name,
                    node_kind,
                    invocation_id,
                    Value::Null,
                    &[("retry", json!(true))],
                )
                .await;
                if let Some(idx) = map_idx {
                    self.maps[idx].remaining += 1;
                }
                let semaphore = map_idx.and_then(|idx| self.maps[idx].semaphore.clone());
                self.schedule_node(node, payload_item, attempt + 1, map_idx, semaphore)
                    .await;
            }
            Directive::Goto(target) => {
                self.step_end(step_name, node_kind, invocation_id, Value::Null, &[])
                    .await;
                self.schedule_named(&target).await;
            }
            Directive::FanOut(targets) => {
                self.step_end(step_name, node_kind, invocation_id, Value::Null, &[])
                    .await;
                for target in targets {
                    self.schedule_named(&target).await;
                }
            }
            Directive::Items(values) => {
                self.step_end(
                    step_name,
                    node_kind,
                    invocation_id,
                    json!({ "items": values.len() }),
                    &[],
                )
                .await;
                self.start_map(node, values).await;
            }
            Directive::Route(_) => {
                // The invoker resolves routes to Goto before completion.
                let err = StepError::framework(format!(
                    "unresolved route directive escaped step '{step_name}'"
                ));
                self.record_failure(FailureKind::Infra, Some(step_name), &err)
                    .await;
            }
        }
    }

    /// Schedule a dynamic target by name. The invoker validated the name;
    /// a miss here is kernel inconsistency.
    async fn schedule_named(&mut self, target: &str) {
        match self.plan.index_of(target) {
            Some(node) => {
                self.schedule_dynamic(node).await;
            }
            None => {
                let err = StepError::framework(format!(
                    "dynamic target '{target}' vanished from the plan"
                ));
                self.record_failure(FailureKind::Infra, None, &err).await;
            }
        }
    }

    /// Announce one parent completion to every successor of `node` and
    /// schedule the barriers that fire. For a map node the successors are
    /// its `then` targets, reached only via MAP_COMPLETE.
    async fn propagate(&mut self, node: usize) {
        let plan = Arc::clone(&self.plan);
        let successors: Vec<usize> = match &plan.step_at(node).def.targets {
            Targets::Map { then, .. } => {
                then.iter().filter_map(|n| plan.index_of(n)).collect()
            }
            _ => plan.successors_of(node).to_vec(),
        };
        for m in successors {
            self.parent_completed(m).await;
        }
    }

    async fn parent_completed(&mut self, node: usize) {
        let plan = Arc::clone(&self.plan);
        let parent_count = plan.parents_of(node).len();
        let step = plan.step_at(node);
        match self
            .graph
            .parent_completed(node, parent_count, step.def.barrier)
        {
            BarrierDecision::Fire => {
                self.pending_barrier_timers.remove(&node);
                if parent_count >= 2 {
                    self.publisher
                        .publish(
                            Event::new(EventKind::BarrierRelease, step.def.name.clone())
                                .with_node_kind(NodeKind::Barrier),
                        )
                        .await;
                }
                self.schedule_node(node, None, 1, None, None).await;
            }
            BarrierDecision::Hold => {
                if self.graph.is_first_completion(node) {
                    if let Some(timeout) = step.def.barrier_timeout {
                        self.arm_barrier_timer(node, timeout);
                    }
                }
            }
            BarrierDecision::Absorbed => {}
        }
    }

    /// Start the barrier timer at the first parent completion.
    fn arm_barrier_timer(&mut self, node: usize, timeout: std::time::Duration) {
        if !self.pending_barrier_timers.insert(node) {
            return;
        }
        let tx = self.ctrl_tx.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Envelope::BarrierTimeout { node }).await;
        });
    }

    /// A barrier timer expired: fire the barrier with a timeout marker
    /// unless it already fired normally.
    pub(crate) async fn fire_barrier_timeout(&mut self, node: usize) {
        if !self.pending_barrier_timers.remove(&node) {
            return;
        }
        if self.graph.is_satisfied(node) || self.draining {
            return;
        }
        self.publisher.metrics.barrier_timeouts += 1;
        let name = self.plan.step_at(node).def.name.clone();
        self.publisher
            .publish(
                Event::new(EventKind::BarrierRelease, name)
                    .with_node_kind(NodeKind::Barrier)
                    .with_meta("barrier", json!("timeout")),
            )
            .await;
        self.schedule_node(node, None, 1, None, None).await;
    }

    /// Expand a map: one worker invocation per payload item, throttled by
    /// the per-firing semaphore.
    async fn start_map(&mut self, node: usize, values: Vec<Value>) {
        if self.draining || self.status.is_some() || self.stop_requested {
            return;
        }
        let plan = Arc::clone(&self.plan);
        let step = plan.step_at(node);
        let Targets::Map { worker, .. } = &step.def.targets else {
            let err = StepError::framework(format!(
                "map items returned by non-map step '{}'",
                step.def.name
            ));
            self.record_failure(FailureKind::Infra, Some(&step.def.name), &err)
                .await;
            return;
        };
        let Some(worker_node) = plan.index_of(worker) else {
            let err =
                StepError::framework(format!("map worker '{worker}' vanished from the plan"));
            self.record_failure(FailureKind::Infra, Some(&step.def.name), &err)
                .await;
            return;
        };
        let map_name = step.def.name.clone();
        let worker_name = worker.clone();

        self.publisher
            .publish(
                Event::new(EventKind::MapStart, map_name.clone())
                    .with_node_kind(NodeKind::Map)
                    .with_payload(json!({ "items": values.len() })),
            )
            .await;

        if values.is_empty() {
            self.publisher
                .publish(
                    Event::new(EventKind::MapComplete, map_name)
                        .with_node_kind(NodeKind::Map)
                        .with_payload(json!({ "items": 0 })),
                )
                .await;
            self.propagate(node).await;
            return;
        }

        let semaphore = step
            .def
            .max_concurrency
            .map(|cap| Arc::new(Semaphore::new(cap)));
        let map_idx = self.maps.len();
        self.maps.push(MapRun {
            node,
            remaining: values.len(),
            semaphore: semaphore.clone(),
        });

        for (index, value) in values.into_iter().enumerate() {
            let spawned = self
                .schedule_node(worker_node, Some(value), 1, Some(map_idx), semaphore.clone())
                .await;
            if let Some(invocation_id) = spawned {
                self.publisher
                    .publish(
                        Event::new(EventKind::MapWorker, worker_name.clone())
                            .with_node_kind(NodeKind::Map)
                            .with_invocation(invocation_id)
                            .with_meta("parent", json!(map_name.clone()))
                            .with_meta("index", json!(index)),
                    )
                    .await;
            }
        }
    }
}
