// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Deterministic arithmetic tool grounding scenario S1 (§4.3.1): parses a
/// simple `a OP b` expression and returns `{"result": N}`.
pub struct CalculatorTool;

/// Finds the operator by scanning for the first `+`/`-`/`*`/`/` that isn't a
/// leading sign on the first operand, so both `"1234*5678"` and `"3 + 4"`
/// parse the same way.
fn find_operator(expression: &str) -> Option<(usize, char)> {
    expression
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '+' | '-' | '*' | '/'))
}

fn eval(expression: &str) -> Result<f64, String> {
    let trimmed = expression.trim();
    let Some((op_idx, op)) = find_operator(trimmed) else {
        return Err(format!(
            "expected \"A OP B\" (e.g. \"3 + 4\" or \"1234*5678\"), got: {expression:?}"
        ));
    };
    let a = trimmed[..op_idx].trim();
    let b = trimmed[op_idx + op.len_utf8()..].trim();
    let a: f64 = a.parse().map_err(|_| format!("not a number: {a:?}"))?;
    let b: f64 = b.parse().map_err(|_| format!("not a number: {b:?}"))?;
    match op {
        '+' => Ok(a + b),
        '-' => Ok(a - b),
        '*' => Ok(a * b),
        '/' => {
            if b == 0.0 {
                Err("division by zero".into())
            } else {
                Ok(a / b)
            }
        }
        other => Err(format!("unsupported operator: {other:?}")),
    }
}

impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator_compute"
    }

    fn description(&self) -> &str {
        "Evaluates a simple arithmetic expression \"A OP B\" where OP is one of + - * /."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "an arithmetic expression, e.g. \"3 + 4\""
                }
            },
            "required": ["expression"]
        })
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let expression = match call.args.get("expression").and_then(Value::as_str) {
            Some(e) => e,
            None => return ToolOutput::err(&call.id, "missing required argument: expression"),
        };
        match eval(expression) {
            Ok(result) => ToolOutput::ok(&call.id, json!({ "result": result }).to_string()),
            Err(msg) => ToolOutput::err(&call.id, msg),
        }
    }
}
