// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use llama_cpp_2::sampling::LlamaSampler;
use vox_config::SamplerConfig;

/// Builds the sampler chain in the fixed order named by §4.1: repetition
/// penalties first, then top-k, top-p, temperature, and a final seeded
/// distributional draw. The chain is disposed (dropped) at generation end by
/// the caller; this function does not retain it.
pub fn build_chain(cfg: &SamplerConfig, seed: u32) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(cfg.repeat_last_n, cfg.repeat_penalty, 0.0, 0.0),
        LlamaSampler::top_k(cfg.top_k),
        LlamaSampler::top_p(cfg.top_p, 1),
        LlamaSampler::temp(cfg.temperature),
        LlamaSampler::dist(seed),
    ])
}
