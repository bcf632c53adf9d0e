// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binding-plan resolution: parameter specs to injection bindings
//!
//! Resolution happens once, at registration time; the resulting plan is a
//! first-class data structure the invoker consumes on every invocation.

use rill_core::{Binding, DefinitionError, ParamSpec, Source, SourceSpec};

/// Map a parameter name to its conventional source.
///
/// `error` is only valid inside error handlers and is rejected for step
/// bodies by [`resolve_bindings`].
fn infer_source(name: &str) -> Option<Source> {
    match name {
        "s" | "state" => Some(Source::State),
        "c" | "ctx" | "context" => Some(Source::Context),
        "cancel" | "token" => Some(Source::CancelToken),
        "error" => Some(Source::Error),
        "step_name" => Some(Source::StepName),
        _ => None,
    }
}

/// Resolve a step's declared parameters into its injection plan.
///
/// Rules, first match per parameter:
/// 1. explicit source declarations are taken as-is;
/// 2. known names (`state`, `ctx`, `token`, ...) bind by convention;
/// 3. the first unrecognized required parameter becomes the payload-item
///    candidate (validation later confirms the step is a map worker);
/// 4. defaulted parameters resolve to `Source::None`;
/// 5. any further unrecognized required parameter is a definition error.
///
/// Resolution is a pure function of its inputs, so re-resolving the same
/// specs always produces an identical plan.
pub(crate) fn resolve_bindings(
    step: &str,
    params: &[ParamSpec],
) -> Result<Vec<Binding>, DefinitionError> {
    let mut bindings = Vec::with_capacity(params.len());
    let mut payload_bound = false;

    for param in params {
        let source = match &param.spec {
            SourceSpec::Explicit(source) => *source,
            SourceSpec::Defaulted => Source::None,
            SourceSpec::Inferred => match infer_source(&param.name) {
                Some(source) => source,
                None if !payload_bound => Source::PayloadItem,
                None => {
                    return Err(DefinitionError::UnresolvedParam {
                        step: step.to_string(),
                        param: param.name.clone(),
                    })
                }
            },
        };

        if source == Source::PayloadItem {
            if payload_bound {
                return Err(DefinitionError::DuplicatePayloadItem {
                    step: step.to_string(),
                });
            }
            payload_bound = true;
        }

        if source == Source::Error {
            return Err(DefinitionError::ErrorBindingOutsideHandler {
                step: step.to_string(),
                param: param.name.clone(),
            });
        }

        bindings.push(Binding {
            param: param.name.clone(),
            source,
        });
    }

    Ok(bindings)
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
