// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ToolsError;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// A tool's catalog entry, serialized into the system prompt (§3 Tool
/// Descriptor).
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub is_deterministic: bool,
    pub requires_confirmation: bool,
    pub is_stateful: bool,
    pub estimated_latency_ms: u32,
}

/// Central registry holding every available tool (§4.3).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Fails with `DuplicateName` rather than silently
    /// overwriting an existing entry (§4.3 `register`).
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolsError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolsError::DuplicateName(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Looks up a tool by name (§4.3 `find`).
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Dispatches `call` to its named tool, or returns an error `ToolOutput`
    /// for an unknown name (§4.3 `execute`).
    pub fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.find(&call.name) {
            Some(tool) => tool.execute(call),
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    /// Catalog entries sorted by name, for deterministic prompt rendering.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
                is_deterministic: t.is_deterministic(),
                requires_confirmation: t.requires_confirmation(),
                is_stateful: t.is_stateful(),
                estimated_latency_ms: t.estimated_latency_ms(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
