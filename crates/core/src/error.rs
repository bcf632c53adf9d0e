// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Definition-time and validation-time errors

use thiserror::Error;

/// Errors raised while registering steps or resolving bindings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("step already registered: {0}")]
    DuplicateStep(String),
    #[error("pipeline is finalized; no further registration allowed")]
    Finalized,
    #[error("step {step}: parameter '{param}' cannot be resolved to a source")]
    UnresolvedParam { step: String, param: String },
    #[error("step {step}: more than one payload_item binding")]
    DuplicatePayloadItem { step: String },
    #[error("step {step}: parameter '{param}' binds error outside an error handler")]
    ErrorBindingOutsideHandler { step: String, param: String },
    #[error("step {step}: {reason}")]
    InvalidStep { step: String, reason: String },
    #[error("unknown step: {0}")]
    UnknownStep(String),
}

/// Errors raised while compiling the registry into an execution plan.
///
/// The kernel reports these as a terminal event with
/// `failure_kind = validation` when they surface at run time (e.g. an
/// unresolvable start override).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("step {step}: target '{target}' does not resolve to a registered step")]
    UnknownTarget { step: String, target: String },
    #[error("static cycle through steps: {path}")]
    Cycle { path: String },
    #[error("no root steps: every step is referenced as a target")]
    NoRoots,
    #[error("map step {step}: worker '{worker}' must bind exactly one payload_item parameter")]
    WorkerBinding { step: String, worker: String },
    #[error("step {step}: payload_item binding on a step that is not a map worker")]
    StrayPayloadItem { step: String },
    #[error("switch step {step}: empty routing table")]
    EmptyRoutes { step: String },
}
