// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sub-run host: nested runs forwarded into the parent stream
//!
//! The host owns the child stream. Child events are forwarded over the
//! parent's control channel and re-stamped by the parent publisher: the
//! parent takes over `run_id`, the child run becomes `parent_run_id`, and
//! `origin_run_id` is preserved. The child's FINISH is absorbed and
//! synthesized into the sub step's completion.

use crate::args::StepArgs;
use crate::body::{BoxStepFn, SubLauncher};
use rill_core::{Directive, EventKind, PipelineEndData, RunStatus, StepError};
use serde_json::{json, Value};
use std::sync::Arc;

pub(crate) fn host_body<S, C>(launcher: Arc<dyn SubLauncher<S, C>>) -> BoxStepFn<S, C>
where
    S: Send + 'static,
    C: Send + 'static,
{
    Arc::new(move |args: StepArgs<S, C>| {
        let launcher = Arc::clone(&launcher);
        async move {
            let emitter = args
                .emitter()
                .ok_or_else(|| StepError::framework("sub-run host has no control channel"))?;
            let mut child = launcher.launch(args).await?;
            let child_run = child.run_id().clone();
            tracing::debug!(child = %child_run.short(8), "sub-run opened");

            let mut end: Option<PipelineEndData> = None;
            while let Some(event) = child.next().await {
                if event.kind == EventKind::Finish {
                    end = serde_json::from_value(event.payload.clone()).ok();
                    continue;
                }
                emitter.forward(event).await?;
            }

            match end {
                Some(end) if end.status == RunStatus::Success => Ok(Directive::Value(json!({
                    "sub_run": child_run.as_str(),
                    "status": "success",
                }))),
                Some(end) => {
                    let data = serde_json::to_value(&end).unwrap_or(Value::Null);
                    Err(StepError::new(
                        "rill::subrun",
                        format!(
                            "sub-run {} ended with status {:?}",
                            child_run.short(8),
                            end.status
                        ),
                    )
                    .with_data(data))
                }
                None => Err(StepError::framework(format!(
                    "sub-run {} closed without a terminal event",
                    child_run.short(8)
                ))),
            }
        }
    })
}
