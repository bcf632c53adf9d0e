// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Argument vectors assembled from a step's injection plan

use crate::runtime::TokenEmitter;
use parking_lot::Mutex;
use rill_core::{RunId, StepError};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared cell holding the user's state or context for one run.
///
/// The kernel never locks it across an await point; concurrent step bodies
/// mutating it race by design, which is the user's concern.
pub type StateCell<T> = Arc<Mutex<T>>;

/// Metadata describing the current run, handed to hooks and observers.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
    pub pipeline: String,
    pub started_epoch_ms: u64,
}

/// Arguments delivered to a step body.
///
/// Only the sources named in the step's injection plan are populated; the
/// rest stay `None`. Error handlers receive a fully-populated view plus the
/// offending error.
pub struct StepArgs<S, C> {
    pub(crate) state: Option<Arc<Mutex<S>>>,
    pub(crate) context: Option<Arc<Mutex<C>>>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) error: Option<StepError>,
    pub(crate) step_name: Option<String>,
    pub(crate) payload_item: Option<Value>,
    pub(crate) emitter: Option<TokenEmitter>,
}

impl<S, C> StepArgs<S, C> {
    pub(crate) fn empty() -> Self {
        Self {
            state: None,
            context: None,
            cancel: None,
            error: None,
            step_name: None,
            payload_item: None,
            emitter: None,
        }
    }

    /// The shared user state cell, if bound.
    pub fn state(&self) -> Option<Arc<Mutex<S>>> {
        self.state.clone()
    }

    /// The shared user context cell, if bound.
    pub fn context(&self) -> Option<Arc<Mutex<C>>> {
        self.context.clone()
    }

    /// The cooperative cancellation token, if bound.
    pub fn cancel(&self) -> Option<CancellationToken> {
        self.cancel.clone()
    }

    /// The error being handled; present only in error handlers.
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// The invoked step's name, if bound.
    pub fn step_name(&self) -> Option<&str> {
        self.step_name.as_deref()
    }

    /// The map payload item, if bound.
    pub fn payload_item(&self) -> Option<&Value> {
        self.payload_item.as_ref()
    }

    /// Take ownership of the payload item.
    pub fn take_payload_item(&mut self) -> Option<Value> {
        self.payload_item.take()
    }

    pub fn required_state(&self) -> Result<Arc<Mutex<S>>, StepError> {
        self.state()
            .ok_or_else(|| StepError::framework("state is not bound for this step"))
    }

    pub fn required_context(&self) -> Result<Arc<Mutex<C>>, StepError> {
        self.context()
            .ok_or_else(|| StepError::framework("context is not bound for this step"))
    }

    pub fn required_payload_item(&self) -> Result<Value, StepError> {
        self.payload_item
            .clone()
            .ok_or_else(|| StepError::framework("payload_item is not bound for this step"))
    }

    pub(crate) fn emitter(&self) -> Option<TokenEmitter> {
        self.emitter.clone()
    }
}

/// Arguments delivered to startup and shutdown hooks.
pub struct HookArgs<S, C> {
    pub(crate) state: Arc<Mutex<S>>,
    pub(crate) context: Arc<Mutex<C>>,
    pub(crate) meta: RunMeta,
}

impl<S, C> HookArgs<S, C> {
    pub fn state(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.state)
    }

    pub fn context(&self) -> Arc<Mutex<C>> {
        Arc::clone(&self.context)
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }
}
