// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error handling: handler substitution, unhandled failures, hooks, and
//! classification.

use crate::prelude::*;
use rill_core::{Directive, EventKind, FailureKind, FailureSource, RunStatus, StepError};
use rill_kernel::{HookArgs, Pipeline, RunOptions, StepArgs, StepOptions};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn global_handler_substitutes_a_value() {
    let mut flow = Pipeline::new("recovering");
    flow.register_step(
        "fetch",
        StepOptions::new().targets(["consume"]),
        |_args: StepArgs<TestState, ()>| async {
            Err(StepError::msg("fetch blew up"))
        },
    )
    .unwrap();
    flow.register_step("consume", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.on_error(|_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Value(json!("fallback")))
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    // STEP_ERROR then STEP_END carrying the substituted value.
    let error_pos = position(&events, EventKind::StepError, "fetch").unwrap();
    let end_pos = position(&events, EventKind::StepEnd, "fetch").unwrap();
    assert!(error_pos < end_pos);
    assert_eq!(events[end_pos].payload, json!("fallback"));

    // Downstream still ran; terminal status is SUCCESS.
    assert_eq!(of_stage(&events, EventKind::StepStart, "consume").len(), 1);
    assert_eq!(end.status, RunStatus::Success);

    // The journal still carries the original failure.
    assert_eq!(end.errors.len(), 1);
    assert_eq!(end.errors[0].kind, FailureKind::Step);
    assert_eq!(end.errors[0].source, FailureSource::UserCode);
    assert_eq!(end.errors[0].step_name.as_deref(), Some("fetch"));
}

#[tokio::test]
async fn per_step_handler_wins_over_global() {
    let mut flow = Pipeline::new("layered");
    flow.register_step("fetch", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Err(StepError::msg("boom"))
    })
    .unwrap();
    flow.on_step_error("fetch", |args: StepArgs<TestState, ()>| async move {
        // Handlers observe the error they are recovering from.
        let error = args.error().cloned();
        Ok(Directive::Value(json!({
            "handled_by": "step",
            "message": error.map(|e| e.message),
        })))
    })
    .unwrap();
    flow.on_error(|_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Value(json!({"handled_by": "global"})))
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    let fetch_end = of_stage(&events, EventKind::StepEnd, "fetch");
    assert_eq!(fetch_end[0].payload["handled_by"], json!("step"));
    assert_eq!(fetch_end[0].payload["message"], json!("boom"));
}

#[tokio::test]
async fn handler_can_retry_a_failing_step() {
    let mut flow = Pipeline::new("retry-on-error");
    flow.register_step(
        "flaky",
        StepOptions::new().bind(["state"]),
        |args: StepArgs<TestState, ()>| async move {
            let state = args.required_state()?;
            let mut guard = state.lock();
            guard.counter += 1;
            if guard.counter < 3 {
                return Err(StepError::msg("not yet"));
            }
            Ok(Directive::Done)
        },
    )
    .unwrap();
    flow.on_step_error("flaky", |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Retry)
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(of_stage(&events, EventKind::StepStart, "flaky").len(), 3);
    assert_eq!(of_stage(&events, EventKind::StepError, "flaky").len(), 2);
    assert_eq!(end.errors.len(), 2);
}

#[tokio::test]
async fn unhandled_failure_cancels_peers_and_fails_the_run() {
    let shutdown_ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let probe = std::sync::Arc::clone(&shutdown_ran);

    let mut flow = Pipeline::new("failing");
    flow.register_step(
        "start",
        StepOptions::new().targets(["doomed", "slowpoke"]),
        |_args: StepArgs<TestState, ()>| async { Ok(Directive::Done) },
    )
    .unwrap();
    flow.register_step("doomed", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Err(StepError::msg("fatal"))
    })
    .unwrap();
    flow.register_step("slowpoke", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Directive::Done)
    })
    .unwrap();
    flow.on_shutdown(move |_args: HookArgs<TestState, ()>| {
        let probe = std::sync::Arc::clone(&probe);
        async move {
            probe.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    })
    .unwrap();
    flow.finalize().unwrap();

    let started = std::time::Instant::now();
    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;

    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.failure_kind, FailureKind::Step);
    assert_eq!(end.failed_step.as_deref(), Some("doomed"));
    assert_eq!(of_stage(&events, EventKind::StepError, "doomed").len(), 1);

    // The slow peer was cancelled cooperatively, not awaited for 5s.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(of_stage(&events, EventKind::StepEnd, "slowpoke").is_empty());

    // Shutdown hooks still ran.
    assert!(shutdown_ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn startup_hook_failure_skips_execution() {
    let mut flow = Pipeline::new("bad-startup");
    flow.register_step("never", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.on_startup(|_args: HookArgs<TestState, ()>| async {
        Err(StepError::msg("migration failed"))
    })
    .unwrap();
    flow.finalize().unwrap();

    let (events, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.failure_kind, FailureKind::Startup);
    assert!(of_kind(&events, EventKind::StepStart).is_empty());
}

#[tokio::test]
async fn shutdown_hook_failure_cannot_change_the_primary_status() {
    let mut flow = Pipeline::new("bad-shutdown");
    flow.register_step("fine", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Ok(Directive::Done)
    })
    .unwrap();
    flow.on_shutdown(|_args: HookArgs<TestState, ()>| async {
        Err(StepError::msg("flush failed"))
    })
    .unwrap();
    flow.finalize().unwrap();

    let (_, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Success);
    assert_eq!(end.errors.len(), 1);
    assert_eq!(end.errors[0].kind, FailureKind::Shutdown);
}

#[tokio::test]
async fn external_prefixes_classify_dependency_errors() {
    let mut flow = Pipeline::new("classified");
    flow.register_step("fetch", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Err(StepError::new("reqwest::Error", "connect timeout"))
    })
    .unwrap();
    flow.set_external_prefixes(["reqwest", "sqlx"]).unwrap();
    flow.finalize().unwrap();

    let (_, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.errors[0].source, FailureSource::ExternalDep);
    assert_eq!(end.failure_source, FailureSource::ExternalDep);
}

#[tokio::test]
async fn custom_classifier_failures_degrade_with_an_infra_record() {
    let mut flow = Pipeline::new("degrading");
    flow.register_step("fetch", StepOptions::new(), |_args: StepArgs<TestState, ()>| async {
        Err(StepError::msg("boom"))
    })
    .unwrap();
    flow.set_source_classifier(std::sync::Arc::new(|_| {
        Err(StepError::msg("classifier exploded"))
    }))
    .unwrap();
    flow.finalize().unwrap();

    let (_, end) = run_to_end(&flow, TestState::default(), RunOptions::new()).await;
    assert_eq!(end.status, RunStatus::Failed);
    assert_eq!(end.errors[0].source, FailureSource::Framework);
    let infra: Vec<_> = end
        .errors
        .iter()
        .filter(|r| r.kind == FailureKind::Infra)
        .collect();
    assert_eq!(infra.len(), 1);
    assert_eq!(infra[0].reason.as_deref(), Some("classifier_error"));
}
