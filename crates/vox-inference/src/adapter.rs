// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::num::NonZeroU32;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tracing::{debug, warn};

use vox_config::InferenceConfig;

use crate::error::InferenceError;

/// Thin, typed facade over the llama.cpp binding (§4.1). Owns one long-lived
/// model + inference context, so KV positions persist across many Governor
/// `execute` calls — unlike a stateless request/response client, which would
/// have to reconstruct the context (and lose `current_pos`) on every turn.
///
/// Field order matters: `ctx` borrows from `model` and `backend`, and Rust
/// drops struct fields top-to-bottom, so `ctx` must be declared — and
/// therefore dropped — before the values it borrows from.
pub struct InferenceAdapter {
    // SAFETY: `ctx`'s lifetime is extended to `'static` at construction time
    // (see `load`). This is sound only because `model` and `backend` are
    // heap-allocated (`Box`, stable address across moves of `InferenceAdapter`
    // itself) and are never dropped or replaced while `ctx` is alive: `ctx` is
    // declared first and is therefore dropped first, and `unload` drops all
    // three together by replacing the whole `Option`.
    ctx: Option<LlamaContext<'static>>,
    model: Box<LlamaModel>,
    backend: Box<LlamaBackend>,
    model_path: String,
    n_ctx: u32,
    n_batch: u32,
}

impl InferenceAdapter {
    /// Loads a model and creates its inference context (§4.1 `load`,
    /// §4.4.3 model-load lifecycle). Fails with `ModelLoadFailed` if the file
    /// is absent or corrupt.
    pub fn load(params: &InferenceConfig) -> Result<Self, InferenceError> {
        if params.model_path.is_empty() {
            return Err(InferenceError::InvalidArgument(
                "model_path must not be empty".into(),
            ));
        }

        let backend = Box::new(
            LlamaBackend::init()
                .map_err(|e| InferenceError::ModelLoadFailed(e.to_string()))?,
        );

        let mut model_params = LlamaModelParams::default();
        model_params = model_params.with_n_gpu_layers(params.gpu_layers);

        let model = Box::new(
            LlamaModel::load_from_file(&backend, &params.model_path, &model_params).map_err(
                |e| InferenceError::ModelLoadFailed(format!("{}: {e}", params.model_path)),
            )?,
        );

        let n_threads = params.n_threads.max(1);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(params.n_ctx))
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);

        // SAFETY: see the struct-level comment. `backend`/`model` outlive
        // `ctx` because both live in heap allocations owned by `self` and are
        // only ever dropped together with `ctx` (never moved or replaced
        // independently while a context exists).
        let backend_ref: &'static LlamaBackend =
            unsafe { &*(backend.as_ref() as *const LlamaBackend) };
        let model_ref: &'static LlamaModel = unsafe { &*(model.as_ref() as *const LlamaModel) };

        let ctx = model_ref
            .new_context(backend_ref, ctx_params)
            .map_err(|e| InferenceError::ModelLoadFailed(e.to_string()))?;

        debug!(model_path = %params.model_path, n_ctx = params.n_ctx, "model loaded");

        Ok(Self {
            ctx: Some(ctx),
            model,
            backend,
            model_path: params.model_path.clone(),
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
        })
    }

    /// Frees the context, model, and backend. Subsequent operations fail
    /// with `NotInitialized` until `load` is called again (§4.4.3 `unload_model`).
    pub fn unload(&mut self) {
        self.ctx = None;
        debug!(model_path = %self.model_path, "model unloaded");
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    pub fn n_batch(&self) -> u32 {
        self.n_batch
    }

    fn ctx(&self) -> Result<&LlamaContext<'static>, InferenceError> {
        self.ctx.as_ref().ok_or(InferenceError::NotInitialized)
    }

    fn ctx_mut(&mut self) -> Result<&mut LlamaContext<'static>, InferenceError> {
        self.ctx.as_mut().ok_or(InferenceError::NotInitialized)
    }

    /// Pure tokenization; does not touch context state (§4.1 `tokenize`).
    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>, InferenceError> {
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        self.model
            .str_to_token(text, add_bos)
            .map_err(|e| InferenceError::TokenizeFailed(e.to_string()))
    }

    /// Decodes `tokens` at consecutive positions `[start_pos, start_pos +
    /// tokens.len())` in sequence `seq_id`, splitting into sub-batches of at
    /// most `n_batch` tokens (§4.1 `decode`). Only the final token of the
    /// final sub-batch requests logits, matching the single-sequence,
    /// single-generation use of this adapter.
    pub fn decode(
        &mut self,
        tokens: &[LlamaToken],
        start_pos: i32,
        seq_id: i32,
    ) -> Result<(), InferenceError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let n_batch = self.n_batch as usize;
        let total = tokens.len();
        let ctx = self.ctx_mut()?;

        for (chunk_idx, chunk) in tokens.chunks(n_batch).enumerate() {
            let chunk_start = chunk_idx * n_batch;
            let mut batch = LlamaBatch::new(chunk.len().max(1), 1);
            for (i, token) in chunk.iter().enumerate() {
                let global_i = chunk_start + i;
                let is_last = global_i == total - 1;
                batch
                    .add(*token, start_pos + global_i as i32, &[seq_id], is_last)
                    .map_err(|e| InferenceError::DecodeFailed(e.to_string()))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| InferenceError::DecodeFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Samples the next token from the logits of the last decoded position
    /// (§4.1 `sample_next`).
    pub fn sample_next(&self, sampler: &mut LlamaSampler) -> Result<LlamaToken, InferenceError> {
        let ctx = self.ctx()?;
        Ok(sampler.sample(ctx, -1))
    }

    /// Detokenizes a single token to its short byte/text fragment
    /// (§4.1 `detokenize_piece`).
    pub fn detokenize_piece(&self, token: LlamaToken) -> Result<String, InferenceError> {
        self.model
            .token_to_str_with_size(token, 32, Special::Tokenize)
            .map_err(|e| InferenceError::DecodeFailed(e.to_string()))
    }

    pub fn is_end_of_generation(&self, token: LlamaToken) -> bool {
        self.model.is_eog_token(token)
    }

    /// Evicts the half-open position range `[pos_start, pos_end)` from
    /// `seq_id`'s KV cache (§4.1 `kv_remove`), used by the Context Manager's
    /// `shift_window` to reclaim space without touching the system prompt.
    pub fn kv_remove(
        &mut self,
        seq_id: i32,
        pos_start: i32,
        pos_end: i32,
    ) -> Result<(), InferenceError> {
        let ctx = self.ctx_mut()?;
        let removed = ctx.clear_kv_cache_seq(Some(seq_id as u32), Some(pos_start), Some(pos_end));
        if !removed {
            warn!(seq_id, pos_start, pos_end, "kv_remove reported no-op");
        }
        Ok(())
    }
}
