// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use vox_memory::MemoryStore;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Thin wrapper over the Memory Store's `search`, grounding scenario S2
/// (§4.3.1). `query`/`tags` stay forced-string in `marshal_args`; `limit` is
/// numeric. Not deterministic: results depend on mutable store state.
pub struct MemorySearchTool {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<Mutex<MemoryStore>>) -> Self {
        Self { store }
    }
}

impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Searches prior conversation memory for entries relevant to a query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "tags": {
                    "type": "string",
                    "description": "comma-separated tag filter, all tags must match"
                },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn estimated_latency_ms(&self) -> u32 {
        5
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = call.args.get("query").and_then(Value::as_str).unwrap_or("");
        let tags: Vec<String> = call
            .args
            .get("tags")
            .and_then(Value::as_str)
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let limit = call
            .args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;

        let mut store = match self.store.lock() {
            Ok(guard) => guard,
            Err(_) => return ToolOutput::err(&call.id, "memory store lock poisoned"),
        };
        let hits = store.search(query, &tags, limit);
        let results: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "id": h.entry.id,
                    "text": h.entry.text,
                    "tags": h.entry.tags,
                    "relevance": h.relevance,
                })
            })
            .collect();
        ToolOutput::ok(&call.id, json!({ "results": results }).to_string())
    }
}
