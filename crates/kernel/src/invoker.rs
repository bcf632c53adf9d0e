// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step invoker: argument assembly, timeouts, cancellation, handler chain
//!
//! Runs inside each invocation's task. Every suspension point is guarded
//! by the invocation's cancel token; cancellation and timeouts become
//! explicit completion tags, never stray panics or lost invocations.

use crate::args::StepArgs;
use crate::plan::ExecutionPlan;
use crate::runtime::{CompletionOutcome, Envelope, StepCompletion, TokenEmitter};
use parking_lot::Mutex;
use rill_core::{
    Clock, Directive, InvocationId, Source, StepError, StepKind, Targets,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Everything one invocation task needs, handed over at spawn.
pub(crate) struct InvocationSpec<S, C> {
    pub plan: Arc<ExecutionPlan<S, C>>,
    pub node: usize,
    pub invocation_id: InvocationId,
    pub attempt: u32,
    pub payload_item: Option<Value>,
    pub is_map_worker: bool,
    pub state: Arc<Mutex<S>>,
    pub context: Arc<Mutex<C>>,
    pub cancel: CancellationToken,
    pub ctrl: mpsc::Sender<Envelope>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub clock: Arc<dyn Clock>,
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Execute one invocation end to end and announce its completion.
pub(crate) async fn run_invocation<S, C>(spec: InvocationSpec<S, C>)
where
    S: Send + 'static,
    C: Send + 'static,
{
    let step_name = spec.plan.step_at(spec.node).def.name.clone();

    // Map throttling: hold a permit for the whole invocation.
    let _permit = match spec.semaphore.clone() {
        Some(semaphore) => {
            tokio::select! {
                biased;
                _ = spec.cancel.cancelled() => {
                    send_completion(&spec, CompletionOutcome::Cancelled, None).await;
                    return;
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        send_completion(&spec, CompletionOutcome::Cancelled, None).await;
                        return;
                    }
                }
            }
        }
        None => None,
    };

    let _ = spec
        .ctrl
        .send(Envelope::Started {
            invocation_id: spec.invocation_id.clone(),
            node: spec.node,
            attempt: spec.attempt,
        })
        .await;

    let started = spec.clock.now();
    let (outcome, handled_error) = execute(&spec).await;
    let elapsed_ms = (spec.clock.now() - started).as_millis() as u64;

    match &outcome {
        CompletionOutcome::Directive(_) => {
            tracing::debug!(step = %step_name, elapsed_ms, "step completed")
        }
        CompletionOutcome::Failed(err) => {
            tracing::warn!(step = %step_name, elapsed_ms, error = %err, "step failed")
        }
        CompletionOutcome::Cancelled => {
            tracing::debug!(step = %step_name, elapsed_ms, "step cancelled")
        }
    }

    send_completion(&spec, outcome, handled_error).await;
}

/// Run the effective body with timeout and cancellation guards, then offer
/// any raised error to the handler chain.
async fn execute<S, C>(spec: &InvocationSpec<S, C>) -> (CompletionOutcome, Option<StepError>)
where
    S: Send + 'static,
    C: Send + 'static,
{
    let step = spec.plan.step_at(spec.node);
    let body = step.body.call(build_args(spec, None));

    let result = match step.def.timeout {
        Some(timeout) => {
            tokio::select! {
                biased;
                _ = spec.cancel.cancelled() => Err(Interrupt::Cancelled),
                finished = tokio::time::timeout(timeout, body) => match finished {
                    Ok(result) => Ok(result),
                    Err(_) => Err(Interrupt::TimedOut),
                }
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = spec.cancel.cancelled() => Err(Interrupt::Cancelled),
                result = body => Ok(result),
            }
        }
    };

    let raised = match result {
        Ok(Ok(directive)) => match normalize(spec, directive) {
            Ok(directive) => return (CompletionOutcome::Directive(directive), None),
            Err(err) => err,
        },
        Ok(Err(err)) => err,
        Err(Interrupt::Cancelled) => return (CompletionOutcome::Cancelled, None),
        Err(Interrupt::TimedOut) => StepError::new(
            "rill::step_timeout",
            format!("step '{}' exceeded its timeout", step.def.name),
        ),
    };

    // Per-step handler first, then the pipeline-level handler.
    let handler = step
        .handler
        .clone()
        .or_else(|| spec.plan.global_handler.clone());
    match handler {
        None => (CompletionOutcome::Failed(raised), None),
        Some(handler) => {
            let args = build_args(spec, Some(raised.clone()));
            tokio::select! {
                biased;
                _ = spec.cancel.cancelled() => (CompletionOutcome::Cancelled, Some(raised)),
                result = handler.call(args) => match result {
                    Ok(directive) => match normalize(spec, directive) {
                        Ok(directive) => {
                            (CompletionOutcome::Directive(directive), Some(raised))
                        }
                        Err(err) => (CompletionOutcome::Failed(err), Some(raised)),
                    },
                    Err(err) => (CompletionOutcome::Failed(err), Some(raised)),
                }
            }
        }
    }
}

/// Assemble the argument vector from the step's injection plan. Handlers
/// get the fully-populated view plus the error they are handling.
fn build_args<S, C>(spec: &InvocationSpec<S, C>, error: Option<StepError>) -> StepArgs<S, C> {
    let step = spec.plan.step_at(spec.node);
    let mut args = StepArgs::empty();
    if error.is_some() {
        args.state = Some(Arc::clone(&spec.state));
        args.context = Some(Arc::clone(&spec.context));
        args.cancel = Some(spec.cancel.clone());
        args.step_name = Some(step.def.name.clone());
        args.payload_item = spec.payload_item.clone();
        args.error = error;
    } else {
        for binding in &step.def.bindings {
            match binding.source {
                Source::State => args.state = Some(Arc::clone(&spec.state)),
                Source::Context => args.context = Some(Arc::clone(&spec.context)),
                Source::CancelToken => args.cancel = Some(spec.cancel.clone()),
                Source::StepName => args.step_name = Some(step.def.name.clone()),
                Source::PayloadItem => args.payload_item = spec.payload_item.clone(),
                Source::Error | Source::None => {}
            }
        }
    }
    args.emitter = Some(TokenEmitter {
        tx: spec.ctrl.clone(),
        invocation_id: spec.invocation_id.clone(),
        node: spec.node,
    });
    args
}

/// Resolve dynamic names against the plan and enforce kind-specific
/// directive rules, so the scheduler only ever sees well-formed
/// directives. Violations surface as step errors, which keeps them
/// catchable by handlers.
fn normalize<S, C>(
    spec: &InvocationSpec<S, C>,
    directive: Directive,
) -> Result<Directive, StepError> {
    let step = spec.plan.step_at(spec.node);
    match directive {
        Directive::Route(key) => resolve_route(spec, &key),
        // A switch returning a plain string value routes on it.
        Directive::Value(Value::String(key)) if step.def.kind == StepKind::Switch => {
            resolve_route(spec, &key)
        }
        Directive::Goto(target) => {
            if spec.plan.index_of(&target).is_some() {
                Ok(Directive::Goto(target))
            } else {
                Err(StepError::new(
                    "rill::route",
                    format!("dynamic target '{target}' does not resolve to a registered step"),
                ))
            }
        }
        Directive::FanOut(targets) => {
            for target in &targets {
                if spec.plan.index_of(target).is_none() {
                    return Err(StepError::new(
                        "rill::route",
                        format!("dynamic target '{target}' does not resolve to a registered step"),
                    ));
                }
            }
            Ok(Directive::FanOut(targets))
        }
        Directive::Items(_) if step.def.kind != StepKind::Map => Err(StepError::framework(
            format!("step '{}' returned map items but is not a map", step.def.name),
        )),
        Directive::Done | Directive::Value(_) if step.def.kind == StepKind::Map => {
            Err(StepError::framework(format!(
                "map step '{}' must return payload items",
                step.def.name
            )))
        }
        Directive::Done | Directive::Value(_) if step.def.kind == StepKind::Switch => {
            Err(StepError::framework(format!(
                "switch step '{}' must return a string routing key",
                step.def.name
            )))
        }
        Directive::Suspend { .. } if spec.is_map_worker => Err(StepError::framework(
            format!(
                "step '{}' suspended inside a map fan-out, which is not supported",
                step.def.name
            ),
        )),
        other => Ok(other),
    }
}

fn resolve_route<S, C>(spec: &InvocationSpec<S, C>, key: &str) -> Result<Directive, StepError> {
    let step = spec.plan.step_at(spec.node);
    match &step.def.targets {
        Targets::Routes { table, default } => match table.get(key).or(default.as_ref()) {
            Some(target) => Ok(Directive::Goto(target.clone())),
            None => Err(StepError::new(
                "rill::route",
                format!("switch '{}' has no route for key '{key}'", step.def.name),
            )),
        },
        _ => Err(StepError::framework(format!(
            "step '{}' returned a routing key but is not a switch",
            step.def.name
        ))),
    }
}

async fn send_completion<S, C>(
    spec: &InvocationSpec<S, C>,
    outcome: CompletionOutcome,
    handled_error: Option<StepError>,
) {
    let _ = spec
        .ctrl
        .send(Envelope::Completion(StepCompletion {
            invocation_id: spec.invocation_id.clone(),
            attempt: spec.attempt,
            payload_item: spec.payload_item.clone(),
            outcome,
            handled_error,
        }))
        .await;
}
