// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel error type

use rill_core::{DefinitionError, ValidationError};
use thiserror::Error;

/// Errors surfaced through the public kernel API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("pipeline has not been finalized; call finalize() before run()")]
    NotFinalized,
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
