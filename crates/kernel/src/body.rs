// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step body traits: the callable seams behind every registered step

use crate::args::{HookArgs, StepArgs};
use crate::stream::RunStream;
use futures::Stream;
use rill_core::{Directive, StepError};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Result of one step invocation: a routing directive, or a raised error.
pub type StepResult = Result<Directive, StepError>;

/// Stream of token values produced by a streaming step.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<Value, StepError>> + Send>>;

/// An async step body.
///
/// Implemented for any `Fn(StepArgs) -> Future<Output = StepResult>`
/// closure, so user code registers plain async closures.
pub trait StepFn<S, C>: Send + Sync {
    fn call(&self, args: StepArgs<S, C>) -> BoxFuture<StepResult>;
}

/// Shared, middleware-composable form of a step body.
pub type BoxStepFn<S, C> = Arc<dyn StepFn<S, C>>;

impl<S, C, F, Fut> StepFn<S, C> for F
where
    F: Fn(StepArgs<S, C>) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    fn call(&self, args: StepArgs<S, C>) -> BoxFuture<StepResult> {
        Box::pin((self)(args))
    }
}

/// A streaming step body: returns the token stream the invoker iterates.
pub trait StreamFn<S, C>: Send + Sync {
    fn call(&self, args: StepArgs<S, C>) -> TokenStream;
}

impl<S, C, F, St> StreamFn<S, C> for F
where
    F: Fn(StepArgs<S, C>) -> St + Send + Sync,
    St: Stream<Item = Result<Value, StepError>> + Send + 'static,
{
    fn call(&self, args: StepArgs<S, C>) -> TokenStream {
        Box::pin((self)(args))
    }
}

/// A sub-run launcher: builds the nested run whose events the host forwards
/// into the parent stream.
pub trait SubLauncher<S, C>: Send + Sync {
    fn launch(&self, args: StepArgs<S, C>) -> BoxFuture<Result<RunStream, StepError>>;
}

impl<S, C, F, Fut> SubLauncher<S, C> for F
where
    F: Fn(StepArgs<S, C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RunStream, StepError>> + Send + 'static,
{
    fn launch(&self, args: StepArgs<S, C>) -> BoxFuture<Result<RunStream, StepError>> {
        Box::pin((self)(args))
    }
}

/// A startup or shutdown hook.
pub trait HookFn<S, C>: Send + Sync {
    fn call(&self, args: HookArgs<S, C>) -> BoxFuture<Result<(), StepError>>;
}

impl<S, C, F, Fut> HookFn<S, C> for F
where
    F: Fn(HookArgs<S, C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    fn call(&self, args: HookArgs<S, C>) -> BoxFuture<Result<(), StepError>> {
        Box::pin((self)(args))
    }
}
