// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure classification: kind × source attribution

use rill_core::{FailureKind, FailureRecord, FailureSource, StepError};
use std::sync::Arc;

/// User-supplied source classifier. `Ok(None)` falls back to the default
/// attribution; errors degrade to `framework` plus an `infra` record.
pub type SourceClassifier =
    Arc<dyn Fn(&StepError) -> Result<Option<FailureSource>, StepError> + Send + Sync>;

/// Classification overrides carried on the plan.
#[derive(Clone, Default)]
pub struct ClassifierConfig {
    /// `error_type` prefixes attributed to external dependencies.
    pub external_prefixes: Vec<String>,
    pub custom: Option<SourceClassifier>,
}

/// Composes failure records from raw step errors.
pub(crate) struct FailureClassifier {
    config: ClassifierConfig,
}

impl FailureClassifier {
    pub(crate) fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    fn default_source(&self, error: &StepError) -> FailureSource {
        if error.is_framework() {
            return FailureSource::Framework;
        }
        if self
            .config
            .external_prefixes
            .iter()
            .any(|p| error.error_type.starts_with(p.as_str()))
        {
            return FailureSource::ExternalDep;
        }
        FailureSource::UserCode
    }

    /// Build the failure record for an error raised at the given lifecycle
    /// locus. Returns the record plus an optional extra `infra` record when
    /// the user classifier itself failed.
    pub(crate) fn classify(
        &self,
        kind: FailureKind,
        step_name: Option<&str>,
        error: &StepError,
    ) -> (FailureRecord, Option<FailureRecord>) {
        let mut infra = None;
        let source = match &self.config.custom {
            Some(custom) => match custom(error) {
                Ok(Some(source)) => source,
                Ok(None) => self.default_source(error),
                Err(classifier_err) => {
                    tracing::warn!(error = %classifier_err, "failure classifier failed");
                    infra = Some(
                        FailureRecord::new(
                            FailureKind::Infra,
                            FailureSource::Framework,
                            classifier_err.message.clone(),
                        )
                        .with_error_type(classifier_err.error_type.clone())
                        .with_reason("classifier_error"),
                    );
                    FailureSource::Framework
                }
            },
            None => self.default_source(error),
        };

        let mut record = FailureRecord::new(kind, source, error.message.clone())
            .with_error_type(error.error_type.clone());
        if let Some(step) = step_name {
            record = record.with_step(step);
        }
        record.stack = error.stack.clone();
        (record, infra)
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
