// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step definitions: kinds, targets, barriers, and injection bindings

use crate::event::NodeKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Kind of a registered step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Step,
    Map,
    Switch,
    Sub,
    PseudoStart,
    PseudoEnd,
}

impl StepKind {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            StepKind::Step => NodeKind::Step,
            StepKind::Map => NodeKind::Map,
            StepKind::Switch => NodeKind::Switch,
            StepKind::Sub => NodeKind::Sub,
            StepKind::PseudoStart | StepKind::PseudoEnd => NodeKind::Pseudo,
        }
    }
}

/// Join policy on a node with multiple incoming edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    /// Fire when every parent has completed.
    #[default]
    All,
    /// Fire on the first parent completion; absorb the rest.
    Any,
}

/// Static successors of a step.
///
/// Plain steps carry an ordered target list. A switch carries a routing
/// table consulted with the key it returns; its routes are dynamic edges
/// and contribute nothing to the static graph. A map carries its worker
/// plus the successors scheduled once every worker has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Targets {
    List(Vec<String>),
    Routes {
        table: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Map {
        worker: String,
        then: Vec<String>,
    },
}

impl Targets {
    pub fn empty() -> Self {
        Targets::List(Vec::new())
    }

    /// Every step name referenced by these targets, static or dynamic.
    pub fn referenced(&self) -> Vec<&str> {
        match self {
            Targets::List(names) => names.iter().map(String::as_str).collect(),
            Targets::Routes { table, default } => table
                .values()
                .map(String::as_str)
                .chain(default.as_deref())
                .collect(),
            Targets::Map { worker, then } => std::iter::once(worker.as_str())
                .chain(then.iter().map(String::as_str))
                .collect(),
        }
    }

    /// Names that form static graph edges (switch routes are dynamic-only).
    pub fn static_edges(&self) -> Vec<&str> {
        match self {
            Targets::List(names) => names.iter().map(String::as_str).collect(),
            Targets::Routes { .. } => Vec::new(),
            Targets::Map { worker, then } => std::iter::once(worker.as_str())
                .chain(then.iter().map(String::as_str))
                .collect(),
        }
    }
}

/// Runtime value a step parameter is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    State,
    Context,
    CancelToken,
    Error,
    StepName,
    PayloadItem,
    /// Parameter has a default; nothing is injected.
    None,
}

/// How a parameter's source is determined at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Caller named the source explicitly.
    Explicit(Source),
    /// Infer from the parameter name (`state`, `ctx`, `token`, ...).
    Inferred,
    /// Parameter has a default value; resolves to `Source::None`.
    Defaulted,
}

/// A declared step parameter, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub spec: SourceSpec,
}

impl ParamSpec {
    /// Parameter whose source is inferred from its name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: SourceSpec::Inferred,
        }
    }

    /// Parameter with an explicitly declared source.
    pub fn explicit(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            spec: SourceSpec::Explicit(source),
        }
    }

    /// Parameter with a default value, skipped at call time.
    pub fn defaulted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: SourceSpec::Defaulted,
        }
    }
}

/// A resolved parameter binding in a step's injection plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub param: String,
    pub source: Source,
}

/// Retry policy carried on a step.
///
/// Opaque to the kernel: `Directive::Retry` re-enqueues unconditionally and
/// the policy is surfaced to middleware, which owns actual retry logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

/// Immutable compiled form of a registered step.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    pub targets: Targets,
    pub barrier: BarrierKind,
    pub timeout: Option<Duration>,
    pub barrier_timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub bindings: Vec<Binding>,
    pub is_streaming: bool,
    /// Worker fan-out cap; meaningful only on map steps.
    pub max_concurrency: Option<usize>,
    /// Registration options bag, surfaced to middleware.
    pub options: Map<String, Value>,
}

impl Step {
    /// True if this step's injection plan binds the given source.
    pub fn binds(&self, source: Source) -> bool {
        self.bindings.iter().any(|b| b.source == source)
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
