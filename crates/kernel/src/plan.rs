// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Graph validation and execution-plan compilation

use crate::body::{BoxStepFn, HookFn, StreamFn, SubLauncher};
use crate::classify::ClassifierConfig;
use crate::middleware::{Middleware, StepContext};
use crate::observer::{EventHook, Observer};
use crate::subrun;
use futures::StreamExt;
use indexmap::IndexMap;
use rill_core::{Directive, Source, Step, StepError, Targets, ValidationError};
use std::sync::Arc;

/// Body of a step as registered, before compilation.
pub(crate) enum RegisteredBody<S, C> {
    Unary(BoxStepFn<S, C>),
    Streaming(Arc<dyn StreamFn<S, C>>),
    Sub(Arc<dyn SubLauncher<S, C>>),
    Pseudo,
}

/// One registered step: definition plus callables.
pub(crate) struct StepRegistration<S, C> {
    pub def: Step,
    pub body: RegisteredBody<S, C>,
    pub handler: Option<BoxStepFn<S, C>>,
}

/// A step frozen into the plan: definition, node id, and the
/// middleware-composed effective body.
pub(crate) struct CompiledStep<S, C> {
    pub def: Step,
    pub node: usize,
    pub body: BoxStepFn<S, C>,
    pub handler: Option<BoxStepFn<S, C>>,
}

/// Immutable compiled form of a pipeline.
///
/// Nodes are numbered in registration order; `parents` and `successors`
/// are derived from static target edges (switch routes are dynamic and
/// contribute none).
pub struct ExecutionPlan<S, C> {
    pub(crate) name: String,
    pub(crate) steps: IndexMap<String, CompiledStep<S, C>>,
    pub(crate) parents: Vec<Vec<usize>>,
    pub(crate) successors: Vec<Vec<usize>>,
    pub(crate) roots: Vec<usize>,
    pub(crate) startup_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    pub(crate) shutdown_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    pub(crate) global_handler: Option<BoxStepFn<S, C>>,
    pub(crate) observers: Vec<Arc<dyn Observer<S, C>>>,
    pub(crate) event_hooks: Vec<EventHook>,
    pub(crate) classifier: ClassifierConfig,
}

impl<S, C> ExecutionPlan<S, C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire schema version of the events this plan's runs emit.
    pub fn schema_version(&self) -> &'static str {
        rill_core::SCHEMA_VERSION
    }

    pub(crate) fn node_count(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.get_index_of(name)
    }

    pub(crate) fn step_at(&self, node: usize) -> &CompiledStep<S, C> {
        &self.steps[node]
    }

    pub(crate) fn parents_of(&self, node: usize) -> &[usize] {
        &self.parents[node]
    }

    pub(crate) fn successors_of(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    pub(crate) fn roots(&self) -> &[usize] {
        &self.roots
    }
}

/// Validate the registered graph.
pub(crate) fn validate<S, C>(
    steps: &IndexMap<String, StepRegistration<S, C>>,
) -> Result<(), ValidationError> {
    // Every referenced target resolves, including dynamic switch routes.
    for (name, reg) in steps {
        for target in reg.def.targets.referenced() {
            if !steps.contains_key(target) {
                return Err(ValidationError::UnknownTarget {
                    step: name.clone(),
                    target: target.to_string(),
                });
            }
        }
        if let Targets::Routes { table, .. } = &reg.def.targets {
            if table.is_empty() {
                return Err(ValidationError::EmptyRoutes { step: name.clone() });
            }
        }
    }

    // payload_item bindings appear exactly on map workers.
    let workers: Vec<&str> = steps
        .values()
        .filter_map(|reg| match &reg.def.targets {
            Targets::Map { worker, .. } => Some(worker.as_str()),
            _ => None,
        })
        .collect();
    for (name, reg) in steps {
        let payload_bindings = reg
            .def
            .bindings
            .iter()
            .filter(|b| b.source == Source::PayloadItem)
            .count();
        if payload_bindings > 0 && !workers.contains(&name.as_str()) {
            return Err(ValidationError::StrayPayloadItem { step: name.clone() });
        }
    }
    for (name, reg) in steps {
        if let Targets::Map { worker, .. } = &reg.def.targets {
            let bound = steps
                .get(worker.as_str())
                .map(|w| {
                    w.def
                        .bindings
                        .iter()
                        .filter(|b| b.source == Source::PayloadItem)
                        .count()
                })
                .unwrap_or(0);
            if bound != 1 {
                return Err(ValidationError::WorkerBinding {
                    step: name.clone(),
                    worker: worker.clone(),
                });
            }
        }
    }

    // No cycles through static edges (switch routing may loop by design).
    detect_cycles(steps)?;

    // At least one entry point. Switch routes count as references here so
    // route-only targets never self-start; a routing cycle therefore needs
    // an explicit entry step (a pseudo anchor works).
    let referenced: std::collections::HashSet<&str> = steps
        .values()
        .flat_map(|reg| reg.def.targets.referenced())
        .collect();
    if !steps.keys().any(|name| !referenced.contains(name.as_str())) {
        return Err(ValidationError::NoRoots);
    }

    Ok(())
}

fn detect_cycles<S, C>(
    steps: &IndexMap<String, StepRegistration<S, C>>,
) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let mut colors: IndexMap<&str, Color> =
        steps.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a, S, C>(
        node: &'a str,
        steps: &'a IndexMap<String, StepRegistration<S, C>>,
        colors: &mut IndexMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), ValidationError> {
        colors.insert(node, Color::Grey);
        stack.push(node);
        if let Some(reg) = steps.get(node) {
            for next in reg.def.targets.static_edges() {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Grey => {
                        let start = stack.iter().position(|s| *s == next).unwrap_or(0);
                        let mut path: Vec<&str> = stack[start..].to_vec();
                        path.push(next);
                        return Err(ValidationError::Cycle {
                            path: path.join(" -> "),
                        });
                    }
                    Color::White => visit(next, steps, colors, stack)?,
                    Color::Black => {}
                }
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
        Ok(())
    }

    let names: Vec<&str> = steps.keys().map(String::as_str).collect();
    for name in names {
        if colors.get(name).copied() == Some(Color::White) {
            visit(name, steps, &mut colors, &mut stack)?;
        }
    }
    Ok(())
}

/// Freeze a validated registry into an execution plan.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compile<S, C>(
    name: String,
    registrations: IndexMap<String, StepRegistration<S, C>>,
    startup_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    shutdown_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    global_handler: Option<BoxStepFn<S, C>>,
    middlewares: Vec<Arc<dyn Middleware<S, C>>>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    event_hooks: Vec<EventHook>,
    classifier: ClassifierConfig,
) -> ExecutionPlan<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    let index: IndexMap<String, usize> = registrations
        .keys()
        .enumerate()
        .map(|(i, k)| (k.clone(), i))
        .collect();
    let node_count = registrations.len();

    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for (node, reg) in registrations.values().enumerate() {
        for target in reg.def.targets.static_edges() {
            if let Some(&child) = index.get(target) {
                successors[node].push(child);
                parents[child].push(node);
            }
        }
    }

    // Roots: nodes referenced by no edge at all. Switch routes are dynamic
    // edges, but a route target still isn't an entry point.
    let referenced: std::collections::HashSet<usize> = registrations
        .values()
        .flat_map(|reg| reg.def.targets.referenced())
        .filter_map(|name| index.get(name).copied())
        .collect();
    let roots: Vec<usize> = (0..node_count).filter(|n| !referenced.contains(n)).collect();

    let mut steps: IndexMap<String, CompiledStep<S, C>> = IndexMap::with_capacity(node_count);
    for (node, (step_name, reg)) in registrations.into_iter().enumerate() {
        let raw = raw_body(&reg.body);
        let body = if matches!(reg.body, RegisteredBody::Pseudo) {
            raw
        } else {
            let ctx = StepContext {
                name: reg.def.name.clone(),
                kind: reg.def.kind,
                retry: reg.def.retry.clone(),
                options: reg.def.options.clone(),
            };
            // First-registered middleware ends up outermost.
            middlewares
                .iter()
                .rev()
                .fold(raw, |next, mw| mw.wrap(next, &ctx))
        };
        steps.insert(
            step_name,
            CompiledStep {
                def: reg.def,
                node,
                body,
                handler: reg.handler,
            },
        );
    }

    ExecutionPlan {
        name,
        steps,
        parents,
        successors,
        roots,
        startup_hooks,
        shutdown_hooks,
        global_handler,
        observers,
        event_hooks,
        classifier,
    }
}

/// Adapt a registered body into the uniform unary callable the invoker
/// runs. Streaming bodies iterate inside the adapter so middleware wraps
/// them like any other step.
fn raw_body<S, C>(body: &RegisteredBody<S, C>) -> BoxStepFn<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    match body {
        RegisteredBody::Unary(f) => Arc::clone(f),
        RegisteredBody::Streaming(f) => {
            let stream_fn = Arc::clone(f);
            Arc::new(move |args: crate::args::StepArgs<S, C>| {
                let stream_fn = Arc::clone(&stream_fn);
                async move {
                    let emitter = args
                        .emitter()
                        .ok_or_else(|| StepError::framework("token emitter not attached"))?;
                    let mut stream = stream_fn.call(args);
                    while let Some(item) = stream.next().await {
                        emitter.send_token(item?).await?;
                    }
                    Ok(Directive::Done)
                }
            })
        }
        RegisteredBody::Sub(launcher) => subrun::host_body(Arc::clone(launcher)),
        RegisteredBody::Pseudo => Arc::new(|_args: crate::args::StepArgs<S, C>| async {
            Ok::<_, StepError>(Directive::Done)
        }),
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
