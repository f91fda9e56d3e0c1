// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the Tool Registry & Dispatch layer (§4.3, §7).
#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),
    #[error("no tool named '{0}' is registered")]
    NotFound(String),
    #[error("invalid tool_call tag: {0}")]
    InvalidArgument(String),
}
