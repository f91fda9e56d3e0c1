// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use vox_inference::LlamaToken;

/// One message's KV-cache span: a user query, an assistant reply, or a tool
/// result/error injection — one `ConversationTurn` per message, not per
/// `execute()` call (§3 Conversation Turn).
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub turn_id: u64,
    pub is_user: bool,
    pub kv_start: i32,
    pub kv_end: i32,
    /// Short text snippet used by `summarize_old`'s preview fallback and by
    /// diagnostics; not replayed into the model, only into summaries.
    pub preview: String,
}

/// Everything the Governor needs to keep KV-cache bookkeeping coherent
/// across many `execute` calls (§4.4.3 model-load lifecycle, §4.5).
pub struct ConversationContext {
    /// Token count of the system prompt; `shift_window`/`summarize_old`
    /// never touch positions below this.
    pub system_prompt_len: i32,
    /// Next free KV position in sequence 0.
    pub current_pos: i32,
    pub turns: Vec<ConversationTurn>,
    /// Pre-tokenized `<|im_start|>user\n` wrapper, cached at model load.
    pub prefix_tokens: Vec<LlamaToken>,
    /// Pre-tokenized `<|im_end|>\n<|im_start|>assistant\n` wrapper, cached
    /// at model load.
    pub suffix_tokens: Vec<LlamaToken>,
    next_turn_id: u64,
}

impl ConversationContext {
    pub fn new(system_prompt_len: i32, prefix_tokens: Vec<LlamaToken>, suffix_tokens: Vec<LlamaToken>) -> Self {
        Self {
            system_prompt_len,
            current_pos: system_prompt_len,
            turns: Vec::new(),
            prefix_tokens,
            suffix_tokens,
            next_turn_id: 0,
        }
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Appends one message turn and returns its assigned `turn_id`.
    pub fn push_turn(
        &mut self,
        is_user: bool,
        kv_start: i32,
        kv_end: i32,
        preview: impl Into<String>,
    ) -> u64 {
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        self.turns.push(ConversationTurn {
            turn_id,
            is_user,
            kv_start,
            kv_end,
            preview: preview.into(),
        });
        turn_id
    }

    /// Fraction of the context window consumed, used for the Governor's
    /// proactive compaction check (`current_pos / n_ctx ≥ compaction_threshold`).
    pub fn fraction_of(&self, n_ctx: u32) -> f32 {
        if n_ctx == 0 {
            return 0.0;
        }
        self.current_pos as f32 / n_ctx as f32
    }
}
