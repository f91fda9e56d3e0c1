// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the Memory Store (§4.2, §7).
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory store full: cap of {0} entries reached")]
    StoreFull(usize),
    #[error("memory id {0} not found")]
    NotFound(u64),
    #[error("memory store io failure: {0}")]
    IoFailure(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to parse memory log record: {0}")]
    ParseFailure(String),
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::IoFailure(e.to_string())
    }
}
