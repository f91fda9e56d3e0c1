// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt::Write as _;

use crate::registry::ToolRegistry;

/// Renders the tool catalog and a fixed usage preamble for the system
/// prompt (§4.3 `build_system_prompt`).
pub fn build_system_prompt(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    out.push_str(
        "You may call tools by emitting a self-closing tag on its own, e.g.:\n\
         <tool_call name=\"TOOL_NAME\" attr=\"value\" .../>\n\
         A single reply may contain more than one tag; they run in the order \
         they appear. Wait for each tool's result before relying on it.\n\n",
    );

    let schemas = registry.schemas();
    if schemas.is_empty() {
        out.push_str("No tools are currently registered.\n");
        return out;
    }

    out.push_str("Available tools:\n");
    for schema in schemas {
        let _ = writeln!(out, "- {}: {}", schema.name, schema.description);
        let _ = writeln!(out, "  parameters: {}", schema.parameters);
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    struct StubTool;
    impl Tool for StubTool {
        fn name(&self) -> &str {
            "stub"
        }
        fn description(&self) -> &str {
            "a stub tool for prompt rendering tests"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "")
        }
    }

    #[test]
    fn empty_registry_says_no_tools() {
        let reg = ToolRegistry::new();
        let prompt = build_system_prompt(&reg);
        assert!(prompt.contains("No tools are currently registered"));
    }

    #[test]
    fn prompt_contains_tag_syntax_preamble() {
        let reg = ToolRegistry::new();
        let prompt = build_system_prompt(&reg);
        assert!(prompt.contains("<tool_call name=\"TOOL_NAME\""));
    }

    #[test]
    fn prompt_lists_registered_tool_name_and_description() {
        let mut reg = ToolRegistry::new();
        reg.register(StubTool).unwrap();
        let prompt = build_system_prompt(&reg);
        assert!(prompt.contains("stub"));
        assert!(prompt.contains("a stub tool for prompt rendering tests"));
    }
}
