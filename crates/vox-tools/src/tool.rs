// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// A single tool invocation parsed out of model output.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Identifier synthesized by the dispatcher (§4.3 `execute`); the wire
    /// form carries no id of its own, so nothing round-trips it to the model.
    pub id: String,
    pub name: String,
    /// Marshaled JSON arguments (§4.3 `marshal_args`).
    pub args: Value,
}

/// The result of executing a tool (§4.3 executor contract: exactly one of
/// `result`/`error` is produced).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Describes the shape of a tool's text output for context-aware truncation
/// (used by the Context Manager's tool-result truncation, §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Keep the first 60 + last 40 lines: both the preamble and the final
    /// result stay visible. Suitable for shell-like tools (none ship here).
    HeadTail,
    /// Ordered match list: keep the leading matches, highest relevance first.
    /// Suitable for `memory_search`.
    MatchList,
    /// File content: keep a head and tail window with a separator.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Trait every registered tool implements. Dispatch is synchronous (§5: no
/// async surface anywhere in this crate).
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters, serialized into the system prompt catalog.
    fn parameters_schema(&self) -> Value;
    /// Whether repeated calls with identical arguments return identical
    /// results (§4.3.1: true for `calculator_compute`, false for
    /// `memory_search`, whose results depend on mutable store state).
    fn is_deterministic(&self) -> bool {
        true
    }
    /// Describes the shape of this tool's output for context-aware
    /// truncation. Default is [`OutputCategory::Generic`] (hard truncation).
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Whether a human must approve this call before it runs. Neither
    /// shipped tool needs this (§4.3.1); default `false`.
    fn requires_confirmation(&self) -> bool {
        false
    }
    /// Whether this tool reads or mutates state outside its arguments (e.g.
    /// `memory_search` touches the Memory Store); default `false`.
    fn is_stateful(&self) -> bool {
        false
    }
    /// Rough latency budget in milliseconds, used only for prompt/catalog
    /// hints; default `0` (effectively instantaneous).
    fn estimated_latency_ms(&self) -> u32 {
        0
    }
    /// Execute the tool. Errors are wrapped in [`ToolOutput::err`], never
    /// propagated as a `Result`, so a failing tool can never panic dispatch.
    fn execute(&self, call: &ToolCall) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct MinimalTool;

    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_is_deterministic() {
        assert!(MinimalTool.is_deterministic());
    }

    #[test]
    fn tool_descriptor_defaults() {
        assert!(!MinimalTool.requires_confirmation());
        assert!(!MinimalTool.is_stateful());
        assert_eq!(MinimalTool.estimated_latency_ms(), 0);
    }

    #[test]
    fn tool_output_ok_is_not_error() {
        let out = ToolOutput::ok("1", "done");
        assert!(!out.is_error);
        assert_eq!(out.content, "done");
    }

    #[test]
    fn tool_output_err_is_error() {
        let out = ToolOutput::err("1", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }
}
