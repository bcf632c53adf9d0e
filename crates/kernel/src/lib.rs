// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rill-kernel: runtime kernel for streaming DAG pipelines
//!
//! A [`Pipeline`] collects step registrations, hooks, middleware, and
//! observers; `finalize()` compiles them into an immutable execution plan;
//! `run()` launches a single-coordinator kernel that executes the graph
//! concurrently and yields a finite stream of [`rill_core::Event`]s ending
//! in exactly one `FINISH` event.

mod args;
mod body;
mod classify;
mod error;
mod graph;
mod invoker;
mod middleware;
mod observer;
mod plan;
mod publish;
mod registry;
mod resolve;
mod runtime;
mod stream;
mod subrun;

pub use args::{HookArgs, RunMeta, StateCell, StepArgs};
pub use body::{BoxFuture, BoxStepFn, HookFn, StepFn, StepResult, StreamFn, SubLauncher, TokenStream};
pub use classify::{ClassifierConfig, SourceClassifier};
pub use error::KernelError;
pub use middleware::{Middleware, StepContext};
pub use observer::{EventHook, Observer};
pub use plan::ExecutionPlan;
pub use registry::{Pipeline, StepOptions};
pub use runtime::{RunOptions, DEFAULT_QUEUE_SIZE};
pub use stream::RunStream;
