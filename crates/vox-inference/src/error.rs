// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the Inference Adapter (§4.1, §7 `BackendFailure`).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
    #[error("tokenize failed: {0}")]
    TokenizeFailed(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("adapter not initialized: no model loaded")]
    NotInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
