// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing directives returned by step bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What a completed step tells the scheduler to do next.
///
/// The invoker's return type is `Result<Directive, StepError>`; raising an
/// error is the `Err` arm, everything else is one of these tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Normal completion, no output value.
    Done,
    /// Normal completion carrying an output value (rides the STEP_END
    /// payload).
    Value(Value),
    /// Terminate the pipeline gracefully after this completion.
    Stop,
    /// Emit SUSPEND, mark the node satisfied, schedule nothing downstream.
    Suspend { reason: String },
    /// Re-enqueue this step with a fresh invocation id and attempt + 1.
    Retry,
    /// Mark this node satisfied with no output; downstream sees "parent
    /// completed".
    Skip,
    /// Dynamic next step, overriding static targets.
    Goto(String),
    /// Dynamic fan-out to several steps.
    FanOut(Vec<String>),
    /// Map payload items, one worker invocation each.
    Items(Vec<Value>),
    /// Switch routing key, looked up in the step's route table.
    Route(String),
}

impl Directive {
    pub fn suspend(reason: impl Into<String>) -> Self {
        Directive::Suspend {
            reason: reason.into(),
        }
    }

    pub fn goto(target: impl Into<String>) -> Self {
        Directive::Goto(target.into())
    }

    pub fn route(key: impl Into<String>) -> Self {
        Directive::Route(key.into())
    }

    /// The completion output value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Directive::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Error raised from a step body, hook, or observer.
///
/// Carries enough to build a `FailureRecord`; the classifier attributes the
/// source from `error_type` and provenance.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{error_type}: {message}")]
pub struct StepError {
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Structured payload riding the error (e.g. a sub-run's terminal data).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StepError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
            data: None,
        }
    }

    /// Shorthand for an error of the generic `error` type.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("error", message)
    }

    /// Error raised by the kernel itself rather than user code.
    pub fn framework(message: impl Into<String>) -> Self {
        Self::new("rill::kernel", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True for errors the kernel raised about itself.
    pub fn is_framework(&self) -> bool {
        self.error_type.starts_with("rill::")
    }
}

#[cfg(test)]
#[path = "directive_tests.rs"]
mod tests;
