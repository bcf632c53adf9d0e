// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel runtime: control channel, task group, and run state
//!
//! All coordinator logic (graph tracking, scheduling, completion handling,
//! publishing) runs on one logical task. Step bodies run as peer tasks and
//! touch run state only by sending envelopes back over the bounded control
//! channel; the channel bound is what gives the kernel backpressure.

mod coordinator;
mod schedule;

use crate::args::RunMeta;
use crate::classify::FailureClassifier;
use crate::graph::GraphTracker;
use crate::plan::ExecutionPlan;
use crate::publish::Publisher;
use crate::stream::RunStream;
use parking_lot::Mutex;
use rill_core::{
    Clock, Event, FailureRecord, IdGen, InvocationId, RunId, RunPhase, RunStatus, StepError,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default bound of the control and output channels.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Per-run options for `Pipeline::run`.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub(crate) start: Option<String>,
    pub(crate) queue_size: Option<usize>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) parent_run: Option<RunId>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from this step instead of the plan's roots.
    pub fn start(mut self, step: impl Into<String>) -> Self {
        self.start = Some(step.into());
        self
    }

    /// Bound of the control and output channels (default 1000).
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size.max(1));
        self
    }

    /// Run-level deadline; expiry emits TIMEOUT and cancels live work.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// External cancellation token for the whole run.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Record a parent run id on this run's events (set by sub-run hosts).
    pub fn parent_run(mut self, run_id: RunId) -> Self {
        self.parent_run = Some(run_id);
        self
    }
}

/// Envelopes delivered over the control channel.
pub(crate) enum Envelope {
    /// An invocation actually began executing (after any map throttling).
    Started {
        invocation_id: InvocationId,
        node: usize,
        attempt: u32,
    },
    /// A streaming step yielded a token.
    Token {
        invocation_id: InvocationId,
        node: usize,
        value: Value,
    },
    /// A step finished and is announcing its result for scheduling.
    Completion(StepCompletion),
    /// An event forwarded out of a nested run.
    Forward(Event),
    /// A barrier's first-completion timer expired.
    BarrierTimeout { node: usize },
}

/// Result of one invocation, sent back to the coordinator.
pub(crate) struct StepCompletion {
    pub invocation_id: InvocationId,
    pub attempt: u32,
    pub payload_item: Option<Value>,
    pub outcome: CompletionOutcome,
    /// An error that was recovered by a handler; journaled alongside the
    /// directive the handler returned.
    pub handled_error: Option<StepError>,
}

pub(crate) enum CompletionOutcome {
    Directive(rill_core::Directive),
    Failed(StepError),
    Cancelled,
}

/// Handle given to streaming and sub-run bodies for pushing envelopes into
/// the control channel. Sends block while the channel is full, which is
/// exactly the backpressure contract.
#[derive(Clone)]
pub(crate) struct TokenEmitter {
    pub(crate) tx: mpsc::Sender<Envelope>,
    pub(crate) invocation_id: InvocationId,
    pub(crate) node: usize,
}

impl TokenEmitter {
    pub(crate) async fn send_token(&self, value: Value) -> Result<(), StepError> {
        self.tx
            .send(Envelope::Token {
                invocation_id: self.invocation_id.clone(),
                node: self.node,
                value,
            })
            .await
            .map_err(|_| StepError::framework("control channel closed"))
    }

    pub(crate) async fn forward(&self, event: Event) -> Result<(), StepError> {
        self.tx
            .send(Envelope::Forward(event))
            .await
            .map_err(|_| StepError::framework("control channel closed"))
    }
}

/// One live invocation tracked by the coordinator.
pub(crate) struct LiveInvocation {
    pub node: usize,
    pub map_run: Option<usize>,
}

/// One active map expansion.
pub(crate) struct MapRun {
    pub node: usize,
    pub remaining: usize,
    pub semaphore: Option<Arc<Semaphore>>,
}

/// Coordinator-owned state for one run.
pub(crate) struct RunCore<S, C> {
    pub plan: Arc<ExecutionPlan<S, C>>,
    pub clock: Arc<dyn Clock>,
    pub id_gen: Arc<dyn IdGen>,
    pub publisher: Publisher<S, C>,
    pub graph: GraphTracker,
    pub classifier: FailureClassifier,
    pub state: Arc<Mutex<S>>,
    pub context: Arc<Mutex<C>>,
    pub meta: RunMeta,
    pub ctrl_tx: mpsc::Sender<Envelope>,
    pub tasks: JoinSet<()>,
    pub live: HashMap<InvocationId, LiveInvocation>,
    pub maps: Vec<MapRun>,
    pub external_cancel: CancellationToken,
    pub work_cancel: CancellationToken,
    pub phase: RunPhase,
    pub status: Option<RunStatus>,
    pub journal: Vec<FailureRecord>,
    pub failed_step: Option<String>,
    pub stop_requested: bool,
    pub draining: bool,
    pub pending_barrier_timers: HashSet<usize>,
    pub started_at: Instant,
    pub run_timeout: Option<Duration>,
    pub start_override: Option<String>,
}

/// Spawn the coordinator for one run and hand back its event stream.
pub(crate) fn launch<S, C>(
    plan: Arc<ExecutionPlan<S, C>>,
    state: S,
    context: C,
    opts: RunOptions,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGen>,
) -> RunStream
where
    S: Send + 'static,
    C: Send + 'static,
{
    let run_id = id_gen.run_id();
    let queue_size = opts.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE);
    let (out_tx, out_rx) = mpsc::channel(queue_size);
    let (ctrl_tx, ctrl_rx) = mpsc::channel(queue_size);

    let state = Arc::new(Mutex::new(state));
    let context = Arc::new(Mutex::new(context));
    let meta = RunMeta {
        run_id: run_id.clone(),
        parent_run_id: opts.parent_run.clone(),
        pipeline: plan.name().to_string(),
        started_epoch_ms: clock.epoch_ms(),
    };

    let publisher = Publisher::new(
        Arc::clone(&clock),
        meta.clone(),
        plan.event_hooks.clone(),
        plan.observers.clone(),
        out_tx,
        Arc::clone(&state),
        Arc::clone(&context),
    );

    let external_cancel = opts.cancel.unwrap_or_default();
    let work_cancel = external_cancel.child_token();
    let node_count = plan.node_count();
    let classifier = FailureClassifier::new(plan.classifier.clone());
    let started_at = clock.now();

    let core = RunCore {
        plan,
        clock,
        id_gen,
        publisher,
        graph: GraphTracker::new(node_count),
        classifier,
        state,
        context,
        meta,
        ctrl_tx,
        tasks: JoinSet::new(),
        live: HashMap::new(),
        maps: Vec::new(),
        external_cancel,
        work_cancel,
        phase: RunPhase::Init,
        status: None,
        journal: Vec::new(),
        failed_step: None,
        stop_requested: false,
        draining: false,
        pending_barrier_timers: HashSet::new(),
        started_at,
        run_timeout: opts.timeout,
        start_override: opts.start,
    };

    let span = tracing::info_span!("run", run = %run_id.short(8));
    tokio::spawn(coordinator::run(core, ctrl_rx).instrument(span));

    RunStream::new(run_id, out_rx)
}
