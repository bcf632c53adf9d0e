// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline registry: step registration, hooks, middleware, observers

use crate::body::{BoxStepFn, HookFn, StepFn, StreamFn, SubLauncher};
use crate::classify::{ClassifierConfig, SourceClassifier};
use crate::error::KernelError;
use crate::middleware::Middleware;
use crate::observer::{EventHook, Observer};
use crate::plan::{self, ExecutionPlan, StepRegistration};
use crate::resolve::resolve_bindings;
use crate::runtime::{self, RunOptions};
use crate::stream::RunStream;
use indexmap::IndexMap;
use rill_core::{
    BarrierKind, Clock, DefinitionError, Event, IdGen, ParamSpec, RetryPolicy, Step, StepKind,
    SystemClock, Targets, UuidIdGen, ValidationError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Registration options for a step.
///
/// Targets are the static successors; for a map they are the successors
/// scheduled after `MAP_COMPLETE` (the worker is named separately).
#[derive(Default)]
pub struct StepOptions {
    pub(crate) targets: Vec<String>,
    pub(crate) barrier: BarrierKind,
    pub(crate) timeout: Option<Duration>,
    pub(crate) barrier_timeout: Option<Duration>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) max_concurrency: Option<usize>,
    pub(crate) default_route: Option<String>,
    pub(crate) options: Map<String, Value>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn barrier(mut self, barrier: BarrierKind) -> Self {
        self.barrier = barrier;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Declare parameters whose sources are inferred from their names.
    pub fn bind<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.params
            .extend(names.into_iter().map(|n| ParamSpec::named(n.into())));
        self
    }

    /// Declare parameters with explicit source specs.
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = ParamSpec>,
    {
        self.params.extend(params);
        self
    }

    /// Worker fan-out cap for map steps.
    pub fn max_concurrency(mut self, cap: usize) -> Self {
        self.max_concurrency = Some(cap);
        self
    }

    /// Fallback route for a switch when the returned key has no entry.
    pub fn default_route(mut self, target: impl Into<String>) -> Self {
        self.default_route = Some(target.into());
        self
    }

    /// Free-form registration option, surfaced to middleware.
    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// A pipeline under construction: registration surface plus frozen plan.
///
/// Registration fails with [`DefinitionError::Finalized`] once `finalize()`
/// has run; `run()` fails with [`KernelError::NotFinalized`] before it.
pub struct Pipeline<S, C> {
    name: String,
    steps: IndexMap<String, StepRegistration<S, C>>,
    startup_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    shutdown_hooks: Vec<Arc<dyn HookFn<S, C>>>,
    global_handler: Option<BoxStepFn<S, C>>,
    middlewares: Vec<Arc<dyn Middleware<S, C>>>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    event_hooks: Vec<EventHook>,
    classifier: ClassifierConfig,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGen>,
    plan: Option<Arc<ExecutionPlan<S, C>>>,
}

impl<S, C> Pipeline<S, C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: IndexMap::new(),
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            global_handler: None,
            middlewares: Vec::new(),
            observers: Vec::new(),
            event_hooks: Vec::new(),
            classifier: ClassifierConfig::default(),
            clock: Arc::new(SystemClock),
            id_gen: Arc::new(UuidIdGen),
            plan: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> Result<(), DefinitionError> {
        if self.plan.is_some() {
            Err(DefinitionError::Finalized)
        } else {
            Ok(())
        }
    }

    fn insert(
        &mut self,
        def: Step,
        body: plan::RegisteredBody<S, C>,
    ) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        if self.steps.contains_key(&def.name) {
            return Err(DefinitionError::DuplicateStep(def.name));
        }
        let name = def.name.clone();
        self.steps.insert(
            name,
            StepRegistration {
                def,
                body,
                handler: None,
            },
        );
        Ok(())
    }

    fn build_def(
        &self,
        name: &str,
        kind: StepKind,
        targets: Targets,
        is_streaming: bool,
        opts: StepOptions,
    ) -> Result<Step, DefinitionError> {
        let bindings = resolve_bindings(name, &opts.params)?;
        Ok(Step {
            name: name.to_string(),
            kind,
            targets,
            barrier: opts.barrier,
            timeout: opts.timeout,
            barrier_timeout: opts.barrier_timeout,
            retry: opts.retry,
            bindings,
            is_streaming,
            max_concurrency: opts.max_concurrency,
            options: opts.options,
        })
    }

    /// Register a plain async step.
    pub fn register_step<F>(
        &mut self,
        name: &str,
        opts: StepOptions,
        body: F,
    ) -> Result<(), DefinitionError>
    where
        F: StepFn<S, C> + 'static,
    {
        let targets = Targets::List(opts.targets.clone());
        let def = self.build_def(name, StepKind::Step, targets, false, opts)?;
        self.insert(def, plan::RegisteredBody::Unary(Arc::new(body)))
    }

    /// Register a streaming step; each stream item surfaces as a TOKEN
    /// event.
    pub fn register_streaming<F>(
        &mut self,
        name: &str,
        opts: StepOptions,
        body: F,
    ) -> Result<(), DefinitionError>
    where
        F: StreamFn<S, C> + 'static,
    {
        let targets = Targets::List(opts.targets.clone());
        let def = self.build_def(name, StepKind::Step, targets, true, opts)?;
        self.insert(def, plan::RegisteredBody::Streaming(Arc::new(body)))
    }

    /// Register a map step: the body returns the payload items, `worker`
    /// runs once per item, and `opts.targets` are scheduled after
    /// MAP_COMPLETE.
    pub fn register_map<F>(
        &mut self,
        name: &str,
        worker: &str,
        opts: StepOptions,
        body: F,
    ) -> Result<(), DefinitionError>
    where
        F: StepFn<S, C> + 'static,
    {
        let targets = Targets::Map {
            worker: worker.to_string(),
            then: opts.targets.clone(),
        };
        let def = self.build_def(name, StepKind::Map, targets, false, opts)?;
        self.insert(def, plan::RegisteredBody::Unary(Arc::new(body)))
    }

    /// Register a switch step: the body returns a routing key looked up in
    /// `routes`.
    pub fn register_switch<F>(
        &mut self,
        name: &str,
        routes: IndexMap<String, String>,
        opts: StepOptions,
        body: F,
    ) -> Result<(), DefinitionError>
    where
        F: StepFn<S, C> + 'static,
    {
        let targets = Targets::Routes {
            table: routes,
            default: opts.default_route.clone(),
        };
        let def = self.build_def(name, StepKind::Switch, targets, false, opts)?;
        self.insert(def, plan::RegisteredBody::Unary(Arc::new(body)))
    }

    /// Register a sub-run step: the launcher opens a nested run whose
    /// events are forwarded into this pipeline's stream.
    pub fn register_sub<F>(
        &mut self,
        name: &str,
        opts: StepOptions,
        launcher: F,
    ) -> Result<(), DefinitionError>
    where
        F: SubLauncher<S, C> + 'static,
    {
        let targets = Targets::List(opts.targets.clone());
        let def = self.build_def(name, StepKind::Sub, targets, false, opts)?;
        self.insert(def, plan::RegisteredBody::Sub(Arc::new(launcher)))
    }

    /// Register a bodyless pseudo anchor (entry or exit joint).
    pub fn register_pseudo(
        &mut self,
        name: &str,
        kind: StepKind,
        opts: StepOptions,
    ) -> Result<(), DefinitionError> {
        if !matches!(kind, StepKind::PseudoStart | StepKind::PseudoEnd) {
            return Err(DefinitionError::InvalidStep {
                step: name.to_string(),
                reason: format!("register_pseudo requires a pseudo kind, got {:?}", kind),
            });
        }
        let targets = Targets::List(opts.targets.clone());
        let def = self.build_def(name, kind, targets, false, opts)?;
        self.insert(def, plan::RegisteredBody::Pseudo)
    }

    /// Attach a per-step error handler. The handler receives fully
    /// populated args plus the offending error and may return any routing
    /// directive to recover.
    pub fn on_step_error<F>(&mut self, step: &str, handler: F) -> Result<(), DefinitionError>
    where
        F: StepFn<S, C> + 'static,
    {
        self.ensure_open()?;
        let registration = self
            .steps
            .get_mut(step)
            .ok_or_else(|| DefinitionError::UnknownStep(step.to_string()))?;
        registration.handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Pipeline-level error handler, consulted when a step has none.
    pub fn on_error<F>(&mut self, handler: F) -> Result<(), DefinitionError>
    where
        F: StepFn<S, C> + 'static,
    {
        self.ensure_open()?;
        self.global_handler = Some(Arc::new(handler));
        Ok(())
    }

    pub fn on_startup<F>(&mut self, hook: F) -> Result<(), DefinitionError>
    where
        F: HookFn<S, C> + 'static,
    {
        self.ensure_open()?;
        self.startup_hooks.push(Arc::new(hook));
        Ok(())
    }

    pub fn on_shutdown<F>(&mut self, hook: F) -> Result<(), DefinitionError>
    where
        F: HookFn<S, C> + 'static,
    {
        self.ensure_open()?;
        self.shutdown_hooks.push(Arc::new(hook));
        Ok(())
    }

    pub fn add_middleware(
        &mut self,
        middleware: Arc<dyn Middleware<S, C>>,
    ) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        self.middlewares.push(middleware);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Arc<dyn Observer<S, C>>) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        self.observers.push(observer);
        Ok(())
    }

    /// Synchronous event transform applied in the publisher, in
    /// registration order.
    pub fn add_event_hook<F>(&mut self, hook: F) -> Result<(), DefinitionError>
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.event_hooks.push(Arc::new(hook));
        Ok(())
    }

    /// `error_type` prefixes attributed to external dependencies.
    pub fn set_external_prefixes<I, T>(&mut self, prefixes: I) -> Result<(), DefinitionError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ensure_open()?;
        self.classifier.external_prefixes = prefixes.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// User override for failure source attribution.
    pub fn set_source_classifier(
        &mut self,
        classifier: SourceClassifier,
    ) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        self.classifier.custom = Some(classifier);
        Ok(())
    }

    pub fn with_clock(&mut self, clock: Arc<dyn Clock>) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        self.clock = clock;
        Ok(())
    }

    pub fn with_id_gen(&mut self, id_gen: Arc<dyn IdGen>) -> Result<(), DefinitionError> {
        self.ensure_open()?;
        self.id_gen = id_gen;
        Ok(())
    }

    /// Check the registered graph without freezing it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.plan.is_some() {
            return Ok(());
        }
        plan::validate(&self.steps)
    }

    /// The frozen plan, if finalized.
    pub fn plan(&self) -> Option<&Arc<ExecutionPlan<S, C>>> {
        self.plan.as_ref()
    }
}

impl<S, C> Pipeline<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    /// Validate and freeze the registry into an immutable execution plan.
    pub fn finalize(&mut self) -> Result<(), KernelError> {
        if self.plan.is_some() {
            return Ok(());
        }
        plan::validate(&self.steps)?;
        let compiled = plan::compile(
            self.name.clone(),
            std::mem::take(&mut self.steps),
            std::mem::take(&mut self.startup_hooks),
            std::mem::take(&mut self.shutdown_hooks),
            self.global_handler.take(),
            std::mem::take(&mut self.middlewares),
            std::mem::take(&mut self.observers),
            std::mem::take(&mut self.event_hooks),
            self.classifier.clone(),
        );
        self.plan = Some(Arc::new(compiled));
        Ok(())
    }
}

impl<S, C> Pipeline<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    /// Launch one run of the finalized plan.
    pub fn run(&self, state: S, context: C, opts: RunOptions) -> Result<RunStream, KernelError> {
        let plan = self.plan.as_ref().ok_or(KernelError::NotFinalized)?;
        Ok(runtime::launch(
            Arc::clone(plan),
            state,
            context,
            opts,
            Arc::clone(&self.clock),
            Arc::clone(&self.id_gen),
        ))
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
