// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use serde_json::Value;

use crate::error::ToolsError;
use crate::registry::ToolRegistry;
use crate::tool::ToolCall;

/// Attribute names whose value is always kept as a JSON string, even when it
/// parses as a number — prevents ids and filenames from being silently
/// numericized (§4.3 `marshal_args`).
const FORCED_STRING: &[&str] = &[
    "memory_id",
    "file_path",
    "filepath",
    "tags",
    "query",
    "text",
    "content",
    "directory",
    "pattern",
    "format",
    "label",
];

/// Extracts tool-call tags from model output: substrings bounded by
/// `<tool_call` and the first subsequent `/>`, non-greedy and leftmost-first
/// (§4.3 `parse_calls`). Malformed trailing fragments with no closing `/>`
/// are silently dropped (§7 `ParseFailure`).
pub fn parse_calls(text: &str) -> Vec<&str> {
    let mut calls = Vec::new();
    let mut cursor = 0;
    while let Some(rel_start) = text[cursor..].find("<tool_call") {
        let start = cursor + rel_start;
        match text[start..].find("/>") {
            Some(rel_end) => {
                let end = start + rel_end + 2;
                calls.push(&text[start..end]);
                cursor = end;
            }
            None => break,
        }
    }
    calls
}

/// Splits one `<tool_call name="..." attr="val" .../>` tag into its tool
/// name and a marshaled JSON arguments object (§4.3 `marshal_args`).
pub fn marshal_args(tag: &str) -> Result<(String, Value), ToolsError> {
    let attr_re = Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)="([^"]*)""#).unwrap();
    let mut name = None;
    let mut map = serde_json::Map::new();

    for cap in attr_re.captures_iter(tag) {
        let key = &cap[1];
        let val = &cap[2];
        if key == "name" {
            name = Some(val.to_string());
            continue;
        }
        let forced = FORCED_STRING.contains(&key);
        let json_val = if !forced {
            if let Ok(n) = val.parse::<i64>() {
                Value::from(n)
            } else if let Ok(f) = val.parse::<f64>() {
                Value::from(f)
            } else {
                Value::String(val.to_string())
            }
        } else {
            Value::String(val.to_string())
        };
        map.insert(key.to_string(), json_val);
    }

    let name = name.ok_or_else(|| {
        ToolsError::InvalidArgument("tool_call tag is missing a name attribute".into())
    })?;
    Ok((name, Value::Object(map)))
}

/// Outcome of dispatching a single tool-call tag (§4.3 `execute`).
#[derive(Debug, Clone)]
pub enum ToolExecResult {
    Ok(String),
    Error(String),
}

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Marshals `tag` and dispatches it through `registry` (§4.3 `execute`).
pub fn execute(tag: &str, registry: &ToolRegistry) -> ToolExecResult {
    let (name, args) = match marshal_args(tag) {
        Ok(v) => v,
        Err(e) => return ToolExecResult::Error(e.to_string()),
    };
    let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed).to_string();
    let call = ToolCall { id, name, args };
    let output = registry.execute(&call);
    if output.is_error {
        ToolExecResult::Error(output.content)
    } else {
        ToolExecResult::Ok(output.content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolOutput};

    #[test]
    fn parse_calls_finds_single_tag() {
        let text = r#"sure, let me check <tool_call name="calculator_compute" expression="2 + 2" /> ok"#;
        let calls = parse_calls(text);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("<tool_call"));
        assert!(calls[0].ends_with("/>"));
    }

    #[test]
    fn parse_calls_finds_multiple_tags_in_order() {
        let text = r#"<tool_call name="a" x="1" /> middle <tool_call name="b" y="2" />"#;
        let calls = parse_calls(text);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("name=\"a\""));
        assert!(calls[1].contains("name=\"b\""));
    }

    #[test]
    fn parse_calls_ignores_unterminated_fragment() {
        let text = r#"here is a stray <tool_call name="oops""#;
        assert!(parse_calls(text).is_empty());
    }

    #[test]
    fn parse_calls_on_plain_text_returns_empty() {
        assert!(parse_calls("just a normal reply, no tools needed").is_empty());
    }

    #[test]
    fn marshal_args_extracts_name_and_attrs() {
        let tag = r#"<tool_call name="calculator_compute" expression="3 + 4" />"#;
        let (name, args) = marshal_args(tag).unwrap();
        assert_eq!(name, "calculator_compute");
        assert_eq!(args["expression"], json!("3 + 4"));
    }

    #[test]
    fn marshal_args_numericizes_unforced_numeric_attrs() {
        let tag = r#"<tool_call name="memory_search" query="rust" limit="5" />"#;
        let (_, args) = marshal_args(tag).unwrap();
        assert_eq!(args["limit"], json!(5));
        assert_eq!(args["query"], json!("rust"));
    }

    #[test]
    fn marshal_args_forces_memory_id_to_string_even_if_numeric() {
        let tag = r#"<tool_call name="forget_one" memory_id="42" />"#;
        let (_, args) = marshal_args(tag).unwrap();
        assert_eq!(args["memory_id"], json!("42"));
    }

    #[test]
    fn marshal_args_missing_name_is_invalid_argument() {
        let tag = r#"<tool_call expression="1 + 1" />"#;
        let err = marshal_args(tag).unwrap_err();
        assert!(matches!(err, ToolsError::InvalidArgument(_)));
    }

    struct AddTool;
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "adds two numbers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(&self, call: &ToolCall) -> ToolOutput {
            let a = call.args["a"].as_i64().unwrap_or(0);
            let b = call.args["b"].as_i64().unwrap_or(0);
            ToolOutput::ok(&call.id, (a + b).to_string())
        }
    }

    #[test]
    fn execute_dispatches_through_registry() {
        let mut reg = ToolRegistry::new();
        reg.register(AddTool).unwrap();
        let tag = r#"<tool_call name="add" a="2" b="3" />"#;
        match execute(tag, &reg) {
            ToolExecResult::Ok(text) => assert_eq!(text, "5"),
            ToolExecResult::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn execute_unknown_tool_is_error() {
        let reg = ToolRegistry::new();
        let tag = r#"<tool_call name="does_not_exist" />"#;
        match execute(tag, &reg) {
            ToolExecResult::Error(msg) => assert!(msg.contains("unknown tool")),
            ToolExecResult::Ok(_) => panic!("expected error"),
        }
    }
}
