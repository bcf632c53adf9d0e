// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer seam: passive consumers attached at the publisher

use crate::args::{RunMeta, StateCell};
use async_trait::async_trait;
use rill_core::{Event, FailureRecord, PipelineEndData, StepError};
use std::sync::Arc;

/// A passive consumer of the event stream.
///
/// Observers are notified serially by the publisher. Errors they return are
/// caught and journaled as `infra` failures, never propagated; storage
/// backends and metrics sinks plug in here.
#[async_trait]
pub trait Observer<S, C>: Send + Sync {
    async fn on_pipeline_start(
        &self,
        _state: &StateCell<S>,
        _context: &StateCell<C>,
        _meta: &RunMeta,
    ) -> Result<(), StepError> {
        Ok(())
    }

    async fn on_event(
        &self,
        _state: &StateCell<S>,
        _context: &StateCell<C>,
        _meta: &RunMeta,
        _event: &Event,
    ) -> Result<(), StepError> {
        Ok(())
    }

    async fn on_pipeline_end(
        &self,
        _state: &StateCell<S>,
        _context: &StateCell<C>,
        _meta: &RunMeta,
        _end: &PipelineEndData,
    ) -> Result<(), StepError> {
        Ok(())
    }

    async fn on_pipeline_error(
        &self,
        _state: &StateCell<S>,
        _context: &StateCell<C>,
        _meta: &RunMeta,
        _error: &FailureRecord,
    ) -> Result<(), StepError> {
        Ok(())
    }
}

/// Synchronous event transform applied in the publisher before observers
/// see the event, in registration order.
pub type EventHook = Arc<dyn Fn(Event) -> Event + Send + Sync>;
