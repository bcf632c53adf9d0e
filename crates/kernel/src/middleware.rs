// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Middleware seam wrapped around step invocations

use crate::body::BoxStepFn;
use rill_core::{RetryPolicy, StepKind};
use serde_json::{Map, Value};

/// Registration-time facts about a step, handed to middleware when the
/// chain is composed.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub name: String,
    pub kind: StepKind,
    pub retry: Option<RetryPolicy>,
    /// The registration options bag.
    pub options: Map<String, Value>,
}

/// An active wrapper around step invocations.
///
/// Chains are composed once at plan compilation: the first-registered
/// middleware ends up outermost, the raw step innermost. Retry middleware
/// and the like live here, outside the kernel.
pub trait Middleware<S, C>: Send + Sync {
    fn wrap(&self, next: BoxStepFn<S, C>, ctx: &StepContext) -> BoxStepFn<S, C>;
}
