// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rill-core: data model for the rill execution kernel

pub mod clock;
pub mod directive;
pub mod error;
pub mod event;
pub mod id;
pub mod metrics;
pub mod step;
pub mod terminal;

pub use clock::{Clock, FakeClock, SystemClock};
pub use directive::{Directive, StepError};
pub use error::{DefinitionError, ValidationError};
pub use event::{Event, EventKind, NodeKind, SCHEMA_VERSION, SYSTEM_STAGE};
pub use id::{IdGen, InvocationId, RunId, SequentialIdGen, UuidIdGen};
pub use metrics::{RuntimeMetrics, StepStats};
pub use step::{
    BarrierKind, Binding, ParamSpec, RetryPolicy, Source, SourceSpec, Step, StepKind, Targets,
};
pub use terminal::{
    FailureKind, FailureRecord, FailureSource, PipelineEndData, RunPhase, RunStatus,
};
