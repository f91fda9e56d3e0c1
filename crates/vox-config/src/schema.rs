// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Top-level configuration tree for the governor core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub context_manager: ContextManagerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_n_ctx() -> u32 {
    4096
}
fn default_n_batch() -> u32 {
    1024
}
fn default_n_threads() -> i32 {
    4
}

/// Model load parameters, forwarded to the Inference Adapter's `load` op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Path to the GGUF model file on disk. Empty until set by the caller —
    /// there is no sane default model location.
    #[serde(default)]
    pub model_path: String,
    /// Maximum KV-cache position count (`N_CTX`).
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    /// Maximum tokens per decode sub-batch.
    #[serde(default = "default_n_batch")]
    pub n_batch: u32,
    /// CPU threads used for both generation and batch decode.
    #[serde(default = "default_n_threads")]
    pub n_threads: i32,
    /// Number of transformer layers offloaded to GPU (0 = CPU only).
    #[serde(default)]
    pub gpu_layers: u32,
    /// Memory-map the model file instead of reading it fully into RAM.
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    /// Lock model pages into physical memory (avoids swap at the cost of
    /// requiring the pages to fit in RAM up front).
    #[serde(default)]
    pub use_mlock: bool,
    /// KV-cache quantization type, forwarded to the backend as-is
    /// (e.g. "f16", "q8_0"). An empty string selects the backend default.
    #[serde(default)]
    pub kv_cache_dtype: String,
    /// Enable flash-attention in the backend, when supported by the model.
    #[serde(default)]
    pub flash_attn: bool,
}

fn default_true() -> bool {
    true
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            n_ctx: default_n_ctx(),
            n_batch: default_n_batch(),
            n_threads: default_n_threads(),
            gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
            kv_cache_dtype: String::new(),
            flash_attn: false,
        }
    }
}

fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_repeat_last_n() -> i32 {
    64
}
fn default_top_k() -> i32 {
    40
}
fn default_top_p() -> f32 {
    0.95
}
fn default_temperature() -> f32 {
    0.8
}
fn default_seed() -> u32 {
    42
}

/// Sampler-chain parameters. The chain is built fresh for every generation in
/// the fixed order penalties → top-k → top-p → temperature → dist(seed),
/// per §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// Number of trailing tokens the repetition penalty looks back over.
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: i32,
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Seed applied to the final distributional draw.
    #[serde(default = "default_seed")]
    pub seed: u32,
    /// When true, a fresh seed is drawn each generation instead of reusing
    /// `seed` every time. Off by default: reproducible sampling is more
    /// useful for debugging tool-call loops than varied phrasing.
    #[serde(default)]
    pub reseed_each_generation: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            temperature: default_temperature(),
            seed: default_seed(),
            reseed_each_generation: false,
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}
fn default_max_tokens_per_response() -> u32 {
    512
}

/// Governor loop bounds (§4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Maximum tool-call rounds before the loop returns `Timeout`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum tokens sampled per generation within one iteration.
    #[serde(default = "default_max_tokens_per_response")]
    pub max_tokens_per_response: u32,
    /// Extra text appended to the built-in tool-catalog system prompt, e.g.
    /// persona or house-style instructions. Empty by default.
    #[serde(default)]
    pub system_prompt_extra: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens_per_response: default_max_tokens_per_response(),
            system_prompt_extra: String::new(),
        }
    }
}

fn default_shift_keep_last_k() -> usize {
    6
}
fn default_summarize_keep_last_k() -> usize {
    4
}
fn default_compaction_threshold() -> f32 {
    0.85
}

/// Detail level requested from the summarization prompt when an LLM is used
/// for `summarize_old`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryDetail {
    Brief,
    #[default]
    Normal,
    Thorough,
}

impl std::fmt::Display for SummaryDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryDetail::Brief => write!(f, "brief"),
            SummaryDetail::Normal => write!(f, "normal"),
            SummaryDetail::Thorough => write!(f, "thorough"),
        }
    }
}

/// Context Manager thresholds (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextManagerConfig {
    /// Turns kept verbatim by `shift_window`.
    #[serde(default = "default_shift_keep_last_k")]
    pub shift_keep_last_k: usize,
    /// Turns kept verbatim by `summarize_old` (the rest are summarized).
    #[serde(default = "default_summarize_keep_last_k")]
    pub summarize_keep_last_k: usize,
    #[serde(default)]
    pub summarize_detail_level: SummaryDetail,
    /// Fraction of `n_ctx` at which the Governor proactively invokes the
    /// Context Manager, ahead of a hard decode-time overflow.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            shift_keep_last_k: default_shift_keep_last_k(),
            summarize_keep_last_k: default_summarize_keep_last_k(),
            summarize_detail_level: SummaryDetail::default(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

fn default_storage_dir() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("vox").join("memory"))
        .unwrap_or_else(|| std::path::PathBuf::from(".vox/memory"))
        .to_string_lossy()
        .into_owned()
}
fn default_max_entries() -> usize {
    100_000
}
fn default_search_limit() -> usize {
    10
}

/// Memory Store limits (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding per-session `.jsonl` logs.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// Hard cap on live entries; `add` fails with `StoreFull` beyond this.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Default `limit` for `search`/`search_by_tag` when the caller does not
    /// specify one explicitly.
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            max_entries: default_max_entries(),
            default_search_limit: default_search_limit(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_inference_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.inference.n_ctx, 4096);
        assert_eq!(cfg.inference.n_batch, 1024);
        assert!(cfg.inference.use_mmap);
        assert!(!cfg.inference.use_mlock);
    }

    #[test]
    fn default_governor_max_iterations_is_five() {
        assert_eq!(GovernorConfig::default().max_iterations, 5);
    }

    #[test]
    fn default_sampler_chain_order_params_present() {
        let s = SamplerConfig::default();
        assert_eq!(s.repeat_penalty, 1.1);
        assert_eq!(s.top_k, 40);
        assert!((s.top_p - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn summary_detail_display_matches_serde_rename() {
        assert_eq!(SummaryDetail::Brief.to_string(), "brief");
        assert_eq!(SummaryDetail::Thorough.to_string(), "thorough");
    }

    #[test]
    fn partial_yaml_fills_remaining_fields_from_defaults() {
        let yaml = "inference:\n  model_path: /tmp/model.gguf\n  n_ctx: 8192\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.inference.model_path, "/tmp/model.gguf");
        assert_eq!(cfg.inference.n_ctx, 8192);
        // untouched fields keep their defaults
        assert_eq!(cfg.inference.n_batch, 1024);
        assert_eq!(cfg.governor.max_iterations, 5);
    }

    #[test]
    fn context_manager_threshold_default_is_eighty_five_percent() {
        assert!((ContextManagerConfig::default().compaction_threshold - 0.85).abs() < f32::EPSILON);
    }
}
