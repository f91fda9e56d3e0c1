// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use vox_inference::InferenceError;
use vox_memory::MemoryError;

/// Errors surfaced by the Governor and Context Manager (§4.4.5, §7).
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("model not loaded")]
    NotLoaded,
    #[error("context exhausted")]
    ContextExhausted,
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("user_query must not be empty")]
    EmptyQuery,
}

/// The result of a Governor `execute` call (§4.4.1 public contract).
/// `Timeout` and `NeedClarification` are non-error outcomes, not failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorOutcome {
    Success(String),
    NeedClarification,
    Timeout,
}
