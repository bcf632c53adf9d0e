// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run phases, terminal statuses, and failure records

use crate::metrics::RuntimeMetrics;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a run. Transitions are strictly monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Startup,
    Executing,
    Shutdown,
    Terminal,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Startup => "startup",
            RunPhase::Executing => "executing",
            RunPhase::Shutdown => "shutdown",
            RunPhase::Terminal => "terminal",
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
    ClientClosed,
}

/// Lifecycle locus of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[default]
    None,
    Validation,
    Startup,
    Step,
    Shutdown,
    Infra,
}

/// Attribution of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    #[default]
    None,
    UserCode,
    Framework,
    ExternalDep,
}

/// One entry in a run's failure journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub source: FailureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Optional classification note (e.g. `classifier_error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, source: FailureSource, message: impl Into<String>) -> Self {
        Self {
            kind,
            source,
            step_name: None,
            error_type: "error".to_string(),
            message: message.into(),
            stack: None,
            reason: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step_name = Some(step.into());
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Payload of the single terminal `FINISH` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEndData {
    pub status: RunStatus,
    pub duration_s: f64,
    pub failure_kind: FailureKind,
    pub failure_source: FailureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub errors: Vec<FailureRecord>,
    pub metrics: RuntimeMetrics,
}

impl PipelineEndData {
    /// The first journaled failure, which fixes the headline kind/source.
    pub fn primary_failure(&self) -> Option<&FailureRecord> {
        self.errors.first()
    }
}
