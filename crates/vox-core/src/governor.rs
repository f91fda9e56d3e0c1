// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use vox_config::{ContextManagerConfig, GovernorConfig, InferenceConfig, SamplerConfig};
use vox_inference::InferenceAdapter;
use vox_memory::MemoryStore;
use vox_tools::{parse_calls, ToolExecResult, ToolRegistry};

use crate::compact;
use crate::context::ConversationContext;
use crate::error::{GovernorError, GovernorOutcome};
use crate::events::GovernorEvent;
use crate::prompts::system_prompt;

const USER_WRAPPER_PREFIX: &str = "<|im_start|>user\n";
const ASSISTANT_WRAPPER_SUFFIX: &str = "<|im_end|>\n<|im_start|>assistant\n";

/// Control sequences that must never reach `token_cb` partially formed
/// (§4.4.2 stream filter).
const CONTROL_MARKERS: &[&str] = &[
    "<tool_call",
    "<|im_start|>",
    "<|im_end|>",
    "<tool_result>",
    "<tool_error>",
];

/// Drives the reasoning loop over a loaded model, calling tools until a
/// turn produces no further tool calls (§4.4).
pub struct Governor {
    adapter: Option<InferenceAdapter>,
    ctx: Option<ConversationContext>,
    tools: ToolRegistry,
    memory: Option<Arc<Mutex<MemoryStore>>>,
    governor_cfg: GovernorConfig,
    sampler_cfg: SamplerConfig,
    context_mgr_cfg: ContextManagerConfig,
    n_ctx: u32,
    cancel: Arc<AtomicBool>,
}

impl Governor {
    pub fn new(
        governor_cfg: GovernorConfig,
        sampler_cfg: SamplerConfig,
        context_mgr_cfg: ContextManagerConfig,
        tools: ToolRegistry,
        memory: Option<Arc<Mutex<MemoryStore>>>,
    ) -> Self {
        Self {
            adapter: None,
            ctx: None,
            tools,
            memory,
            governor_cfg,
            sampler_cfg,
            context_mgr_cfg,
            n_ctx: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.adapter.is_some()
    }

    /// A shared flag the caller can set to interrupt generation at the next
    /// token boundary (§5 cancellation).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// Loads a model, tokenizes and decodes the system prompt, and
    /// pre-tokenizes the turn wrappers (§4.4.3 `load_model`). Frees any
    /// previously loaded model first.
    pub fn load_model(&mut self, inference_cfg: &InferenceConfig) -> Result<(), GovernorError> {
        self.unload_model();

        let mut adapter = InferenceAdapter::load(inference_cfg)?;
        let prompt = system_prompt(&self.governor_cfg, &self.tools);
        let sys_tokens = adapter.tokenize(&prompt, true)?;
        adapter.decode(&sys_tokens, 0, 0)?;

        let prefix_tokens = adapter.tokenize(USER_WRAPPER_PREFIX, false)?;
        let suffix_tokens = adapter.tokenize(ASSISTANT_WRAPPER_SUFFIX, false)?;

        self.n_ctx = inference_cfg.n_ctx;
        self.ctx = Some(ConversationContext::new(
            sys_tokens.len() as i32,
            prefix_tokens,
            suffix_tokens,
        ));
        self.adapter = Some(adapter);
        debug!(n_prompt_tokens = sys_tokens.len(), "governor model loaded");
        Ok(())
    }

    /// Reverses `load_model`; subsequent `execute` calls fail with
    /// `NotLoaded` (§4.4.3 `unload_model`).
    pub fn unload_model(&mut self) {
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.unload();
        }
        self.adapter = None;
        self.ctx = None;
    }

    /// Drives one user turn to completion (§4.4.1). `progress_cb` receives
    /// structured lifecycle events; `token_cb` receives filtered model text
    /// as it is generated.
    pub fn execute(
        &mut self,
        user_query: &str,
        mut progress_cb: impl FnMut(GovernorEvent),
        mut token_cb: impl FnMut(&str),
    ) -> Result<GovernorOutcome, GovernorError> {
        if user_query.trim().is_empty() {
            return Err(GovernorError::EmptyQuery);
        }
        if self.adapter.is_none() || self.ctx.is_none() {
            return Err(GovernorError::NotLoaded);
        }
        self.cancel.store(false, Ordering::SeqCst);

        // The initial user-turn decode happens as part of iteration 0, not
        // before the loop, so `max_iterations = 0` performs no decode at all
        // (§8 boundary behavior).
        for iteration in 0..self.governor_cfg.max_iterations {
            if iteration == 0 {
                self.append_wrapped(user_query, true, preview_text(user_query))?;
            }
            progress_cb(GovernorEvent::IterationStart {
                iteration: iteration as usize,
            });

            let gen_start = self.ctx.as_ref().ok_or(GovernorError::NotLoaded)?.current_pos;
            let (generated, cancelled) = self.generate_one(&mut token_cb)?;
            self.push_assistant_turn(gen_start, &generated);
            if cancelled {
                return Ok(GovernorOutcome::Timeout);
            }

            let tool_calls: Vec<String> = parse_calls(&generated).iter().map(|s| s.to_string()).collect();
            if tool_calls.is_empty() {
                self.record_memory(user_query, &generated);
                progress_cb(GovernorEvent::Complete);
                return Ok(GovernorOutcome::Success(generated));
            }

            for tag in &tool_calls {
                if self.cancel.load(Ordering::SeqCst) {
                    return Ok(GovernorOutcome::Timeout);
                }
                self.dispatch_tool_call(tag, &mut progress_cb)?;
            }
        }

        Ok(GovernorOutcome::Timeout)
    }

    fn record_memory(&self, user_query: &str, generated: &str) {
        let Some(memory) = &self.memory else { return };
        let Ok(mut store) = memory.lock() else {
            warn!("memory store lock poisoned; skipping turn persistence");
            return;
        };
        store.advance_turn();
        let _ = store.add(user_query.to_string(), vec!["user".into()], 0.5, true);
        let _ = store.add(generated.to_string(), vec!["assistant".into()], 0.5, false);
    }

    /// Appends one `is_user = false` turn spanning the assistant's just
    /// generated text (§3 Conversation Turn: one turn per message).
    fn push_assistant_turn(&mut self, gen_start: i32, generated: &str) {
        if let Some(ctx) = self.ctx.as_mut() {
            let pos = ctx.current_pos;
            ctx.push_turn(false, gen_start, pos, preview_text(generated));
        }
    }

    /// Wraps `payload` in the cached `PREFIX`/`SUFFIX` token sequences,
    /// decodes it at the end of the current KV sequence (compacting first
    /// if needed, §4.4.2), and records it as one message turn.
    fn append_wrapped(
        &mut self,
        payload: &str,
        is_user: bool,
        preview: impl Into<String>,
    ) -> Result<(), GovernorError> {
        let adapter = self.adapter.as_mut().ok_or(GovernorError::NotLoaded)?;
        let payload_tokens = adapter.tokenize(payload, false)?;

        let ctx = self.ctx.as_ref().ok_or(GovernorError::NotLoaded)?;
        let additional = ctx.prefix_tokens.len() + payload_tokens.len() + ctx.suffix_tokens.len();

        self.ensure_capacity(additional as i32)?;

        let adapter = self.adapter.as_mut().ok_or(GovernorError::NotLoaded)?;
        let ctx = self.ctx.as_mut().ok_or(GovernorError::NotLoaded)?;
        let turn_start = ctx.current_pos;
        let mut pos = ctx.current_pos;
        adapter.decode(&ctx.prefix_tokens, pos, 0)?;
        pos += ctx.prefix_tokens.len() as i32;
        adapter.decode(&payload_tokens, pos, 0)?;
        pos += payload_tokens.len() as i32;
        adapter.decode(&ctx.suffix_tokens, pos, 0)?;
        pos += ctx.suffix_tokens.len() as i32;
        ctx.current_pos = pos;
        ctx.push_turn(is_user, turn_start, pos, preview);
        Ok(())
    }

    /// Invokes the Context Manager reactively (would overflow by
    /// `additional` tokens) or proactively (already past
    /// `compaction_threshold`) (§4.5).
    fn ensure_capacity(&mut self, additional: i32) -> Result<(), GovernorError> {
        let n_ctx = self.n_ctx;
        let needs_reactive = {
            let ctx = self.ctx.as_ref().ok_or(GovernorError::NotLoaded)?;
            ctx.current_pos + additional > n_ctx as i32
        };
        let needs_proactive = {
            let ctx = self.ctx.as_ref().ok_or(GovernorError::NotLoaded)?;
            ctx.fraction_of(n_ctx) >= self.context_mgr_cfg.compaction_threshold
        };
        if !needs_reactive && !needs_proactive {
            return Ok(());
        }

        let adapter = self.adapter.as_mut().ok_or(GovernorError::NotLoaded)?;
        let ctx = self.ctx.as_mut().ok_or(GovernorError::NotLoaded)?;

        if let Some(memory) = &self.memory {
            let mut store = memory.lock().map_err(|_| GovernorError::ContextExhausted)?;
            compact::summarize_old(
                ctx,
                adapter,
                &self.sampler_cfg,
                Some(&mut *store),
                self.context_mgr_cfg.summarize_keep_last_k,
                self.context_mgr_cfg.summarize_detail_level,
            )?;
        } else {
            compact::shift_window(ctx, adapter, self.context_mgr_cfg.shift_keep_last_k)?;
        }

        if needs_reactive && ctx.current_pos + additional > n_ctx as i32 {
            return Err(GovernorError::ContextExhausted);
        }
        Ok(())
    }

    /// Samples up to `max_tokens_per_response` tokens, applying the stream
    /// filter and early-stop detection (§4.4.2). Returns the accumulated
    /// text and whether cancellation was observed.
    fn generate_one(&mut self, token_cb: &mut impl FnMut(&str)) -> Result<(String, bool), GovernorError> {
        let n_ctx = self.n_ctx as i32;
        let adapter = self.adapter.as_mut().ok_or(GovernorError::NotLoaded)?;
        let ctx = self.ctx.as_mut().ok_or(GovernorError::NotLoaded)?;

        // The window may already be exactly full (a prior tool-result decode
        // landed on the last free slot) — fail fast rather than attempt a
        // decode llama.cpp would reject (§8 boundary behavior).
        if ctx.current_pos >= n_ctx {
            return Err(GovernorError::ContextExhausted);
        }

        let seed = if self.sampler_cfg.reseed_each_generation {
            self.sampler_cfg.seed.wrapping_add(ctx.current_pos as u32)
        } else {
            self.sampler_cfg.seed
        };
        let mut sampler = vox_inference::sampler::build_chain(&self.sampler_cfg, seed);

        let mut generated = String::new();
        let mut emitted_chars = 0usize;

        for _ in 0..self.governor_cfg.max_tokens_per_response {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok((generated, true));
            }

            let token = adapter.sample_next(&mut sampler)?;
            if adapter.is_end_of_generation(token) {
                break;
            }
            let piece = adapter.detokenize_piece(token)?;
            generated.push_str(&piece);

            emit_safe_text(&generated, &mut emitted_chars, token_cb);

            let stop_cut = detect_early_stop(&generated);

            adapter.decode(std::slice::from_ref(&token), ctx.current_pos, 0)?;
            ctx.current_pos += 1;

            if let Some(cut) = stop_cut {
                generated.truncate(cut);
                break;
            }
        }

        Ok((generated, false))
    }

    fn dispatch_tool_call(
        &mut self,
        tag: &str,
        progress_cb: &mut impl FnMut(GovernorEvent),
    ) -> Result<(), GovernorError> {
        let name = vox_tools::marshal_args(tag)
            .map(|(n, _)| n)
            .unwrap_or_else(|_| "unknown".to_string());
        progress_cb(GovernorEvent::ToolCall { name: name.clone() });

        let (wire_payload, category) = match vox_tools::execute(tag, &self.tools) {
            ToolExecResult::Ok(text) => {
                progress_cb(GovernorEvent::ToolResult {
                    name: name.clone(),
                    output: text.clone(),
                });
                let category = self
                    .tools
                    .find(&name)
                    .map(|t| t.output_category())
                    .unwrap_or_default();
                (format!("<tool_result>{text}</tool_result>"), category)
            }
            ToolExecResult::Error(msg) => {
                progress_cb(GovernorEvent::ToolError {
                    name: name.clone(),
                    message: msg.clone(),
                });
                (format!("<tool_error>{msg}</tool_error>"), Default::default())
            }
        };

        let remaining = {
            let ctx = self.ctx.as_ref().ok_or(GovernorError::NotLoaded)?;
            (self.n_ctx as i32 - ctx.current_pos).max(0) as usize
        };
        // `smart_truncate(.., 0)` means "no cap", not "truncate to nothing" —
        // with zero room left there is nothing worth tokenizing at all.
        if remaining == 0 {
            let notice = "<tool_error>context exhausted</tool_error>";
            return self.append_wrapped(notice, false, preview_text(notice));
        }
        let truncated = compact::smart_truncate(&wire_payload, category, remaining);

        match self.append_wrapped(&truncated, false, preview_text(&truncated)) {
            Ok(()) => Ok(()),
            Err(GovernorError::ContextExhausted) => {
                // Even the truncated result doesn't fit after compaction; drop it
                // and inject a minimal failure notice instead (§8 scenario S5).
                let notice = "<tool_error>context exhausted</tool_error>";
                self.append_wrapped(notice, false, preview_text(notice))
            }
            Err(e) => Err(e),
        }
    }
}

/// Length, in chars, of the trailing suffix of `generated` that could still
/// be the beginning of a control marker — this much must stay unemitted
/// until more tokens arrive to disambiguate it (§4.4.2 stream filter).
fn unsafe_suffix_char_len(generated: &str) -> usize {
    let mut max_len = 0usize;
    for marker in CONTROL_MARKERS {
        let marker_len = marker.chars().count();
        let check_len = marker_len.min(generated.chars().count());
        for len in (1..=check_len).rev() {
            let suffix = tail_chars(generated, len);
            if marker.starts_with(suffix.as_str()) {
                max_len = max_len.max(len);
                break;
            }
        }
    }
    max_len
}

fn tail_chars(s: &str, n: usize) -> String {
    let total = s.chars().count();
    let skip = total.saturating_sub(n);
    s.chars().skip(skip).collect()
}

/// Emits to `token_cb` whatever newly-generated text is now provably not
/// the prefix of a control marker, advancing `emitted_chars`.
fn emit_safe_text(generated: &str, emitted_chars: &mut usize, token_cb: &mut impl FnMut(&str)) {
    let total_chars = generated.chars().count();
    let unsafe_len = unsafe_suffix_char_len(generated);
    let safe_chars = total_chars.saturating_sub(unsafe_len);
    if safe_chars > *emitted_chars {
        let to_emit: String = generated
            .chars()
            .skip(*emitted_chars)
            .take(safe_chars - *emitted_chars)
            .collect();
        if !to_emit.is_empty() {
            token_cb(&to_emit);
        }
        *emitted_chars = safe_chars;
    }
}

/// Returns the byte offset at which `generated` should be truncated when a
/// complete tool-call tag or chat-control marker has appeared (§4.4.2).
fn detect_early_stop(generated: &str) -> Option<usize> {
    if let Some(tag_start) = generated.find("<tool_call") {
        if let Some(rel_end) = generated[tag_start..].find("/>") {
            return Some(tag_start + rel_end + 2);
        }
    }
    for marker in ["<|im_end|>", "<|im_start|>", "<tool_result>", "<tool_error>"] {
        if let Some(idx) = generated.find(marker) {
            return Some(idx);
        }
    }
    None
}

/// Truncates `text` to the 128-char preview cap used for `ConversationTurn`
/// previews and `summarize_old`'s fallback concatenation (§3).
fn preview_text(text: &str) -> String {
    const MAX_CHARS: usize = 128;
    if text.chars().count() <= MAX_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_CHARS).collect()
    }
}
