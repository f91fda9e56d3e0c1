// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use vox_config::GovernorConfig;
use vox_tools::ToolRegistry;

/// Assembles the system prompt: a fixed assistant preamble, the tool
/// catalog built by `vox-tools` (§4.3 `build_system_prompt`), and any
/// operator-supplied extra text (§3.1 `GovernorConfig::system_prompt_extra`).
pub fn system_prompt(cfg: &GovernorConfig, tools: &ToolRegistry) -> String {
    let mut out = String::from(
        "You are a helpful, local voice assistant. Respond concisely; you are \
         speaking, not writing a document. When a tool can answer the user's \
         question more reliably than your own knowledge, call it.\n\n",
    );
    out.push_str(&vox_tools::build_system_prompt(tools));
    if !cfg.system_prompt_extra.is_empty() {
        out.push('\n');
        out.push_str(&cfg.system_prompt_extra);
        out.push('\n');
    }
    out
}
