// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tracing::debug;

use vox_config::{SamplerConfig, SummaryDetail};
use vox_inference::InferenceAdapter;
use vox_memory::MemoryStore;
use vox_tools::OutputCategory;

use crate::error::GovernorError;
use crate::context::ConversationContext;

/// A scratch sequence id used by `summarize_old` for in-context
/// summarization; never shares KV space with the main conversation (seq 0).
const SUMMARY_SEQ_ID: i32 = 1;

/// Computes the `[drop_start, drop_end)` KV span `shift_window` would evict,
/// or `None` if `turn_count <= keep_last_k` (nothing to do). Pure — no
/// `InferenceAdapter` required, so the splice arithmetic is unit-testable on
/// its own (§8 item 6).
fn plan_shift(ctx: &ConversationContext, keep_last_k: usize) -> Option<(i32, i32)> {
    let turn_count = ctx.turns.len();
    if turn_count <= keep_last_k {
        return None;
    }
    let to_drop = turn_count - keep_last_k;
    Some((ctx.turns[0].kv_start, ctx.turns[to_drop - 1].kv_end))
}

/// Drops the turns covered by `[drop_start, drop_end)` and shifts every
/// surviving turn's span and `current_pos` down to close the gap. Pure
/// bookkeeping side of `shift_window`, kept separate from the KV-cache call
/// so it can be exercised (including repeated-call idempotence) without a
/// loaded model.
fn apply_shift(ctx: &mut ConversationContext, keep_last_k: usize, drop_start: i32, drop_end: i32) {
    let to_drop = ctx.turns.len() - keep_last_k;
    let shift = drop_end - drop_start;
    ctx.turns.drain(0..to_drop);
    for turn in ctx.turns.iter_mut() {
        turn.kv_start -= shift;
        turn.kv_end -= shift;
    }
    ctx.current_pos -= shift;
}

/// Evicts the KV span of the oldest turns beyond `keep_last_k`, then shifts
/// every surviving turn's recorded span down to close the gap (§4.5 policy
/// 1). The system prompt span is never touched.
pub fn shift_window(
    ctx: &mut ConversationContext,
    adapter: &mut InferenceAdapter,
    keep_last_k: usize,
) -> Result<(), GovernorError> {
    let Some((drop_start, drop_end)) = plan_shift(ctx, keep_last_k) else {
        return Ok(());
    };

    adapter.kv_remove(0, drop_start, drop_end)?;
    let dropped = ctx.turns.len() - keep_last_k;
    apply_shift(ctx, keep_last_k, drop_start, drop_end);
    debug!(dropped, new_pos = ctx.current_pos, "shift_window compacted context");
    Ok(())
}

fn concatenate_previews(previews: &[String], detail_level: SummaryDetail) -> String {
    let char_budget = match detail_level {
        SummaryDetail::Brief => 400,
        SummaryDetail::Normal => 1200,
        SummaryDetail::Thorough => 4000,
    };
    let mut out = String::from("Summary of earlier conversation:\n");
    for p in previews {
        if out.len() >= char_budget {
            break;
        }
        out.push_str("- ");
        out.push_str(p);
        out.push('\n');
    }
    out.truncate(char_budget.min(out.len()));
    out
}

/// Generates a short summary of `previews` on a scratch sequence, then evicts
/// that sequence's KV range before returning (§4.5: "MUST remove that
/// sequence id's KV range before returning, to prevent cross-contamination
/// of logits").
fn summarize_via_model(
    adapter: &mut InferenceAdapter,
    sampler_cfg: &SamplerConfig,
    previews: &[String],
    detail_level: SummaryDetail,
) -> Result<String, GovernorError> {
    let target_sentences = match detail_level {
        SummaryDetail::Brief => 2,
        SummaryDetail::Normal => 4,
        SummaryDetail::Thorough => 8,
    };
    let prompt = format!(
        "<|im_start|>system\nSummarize the following exchanges in at most {target_sentences} \
         sentences, keeping concrete facts and decisions.\n{}<|im_end|>\n<|im_start|>assistant\n",
        previews.join("\n")
    );

    let tokens = adapter.tokenize(&prompt, true)?;
    adapter.decode(&tokens, 0, SUMMARY_SEQ_ID)?;
    let mut pos = tokens.len() as i32;

    let mut sampler = vox_inference::sampler::build_chain(sampler_cfg, sampler_cfg.seed);
    let mut summary = String::new();
    let max_summary_tokens = 256;
    for _ in 0..max_summary_tokens {
        let token = adapter.sample_next(&mut sampler)?;
        if adapter.is_end_of_generation(token) {
            break;
        }
        summary.push_str(&adapter.detokenize_piece(token)?);
        adapter.decode(&[token], pos, SUMMARY_SEQ_ID)?;
        pos += 1;
    }

    adapter.kv_remove(SUMMARY_SEQ_ID, 0, pos)?;
    Ok(summary.trim().to_string())
}

/// Summarizes the turns beyond `keep_last_k` into a Memory Store entry
/// tagged `{context_summary, auto_generated, conversation}` at importance
/// 0.95, then performs `shift_window` (§4.5 policy 2). Falls back to
/// concatenating turn previews if model-based summarization fails.
pub fn summarize_old(
    ctx: &mut ConversationContext,
    adapter: &mut InferenceAdapter,
    sampler_cfg: &SamplerConfig,
    memory: Option<&mut MemoryStore>,
    keep_last_k: usize,
    detail_level: SummaryDetail,
) -> Result<(), GovernorError> {
    let turn_count = ctx.turns.len();
    if turn_count <= keep_last_k {
        return Ok(());
    }
    let to_drop = turn_count - keep_last_k;
    let previews: Vec<String> = ctx.turns[..to_drop].iter().map(|t| t.preview.clone()).collect();

    let summary_text = match summarize_via_model(adapter, sampler_cfg, &previews, detail_level) {
        Ok(s) if !s.is_empty() => s,
        _ => concatenate_previews(&previews, detail_level),
    };

    if let Some(store) = memory {
        store.add(
            summary_text,
            vec![
                "context_summary".into(),
                "auto_generated".into(),
                "conversation".into(),
            ],
            0.95,
            false,
        )?;
    }

    shift_window(ctx, adapter, keep_last_k)
}

/// Not implemented at initial build (§4.5 policy 3, §9).
pub fn prune_unimportant(_threshold: f32) -> Result<(), GovernorError> {
    Err(GovernorError::NotImplemented("prune_unimportant"))
}

/// Truncates `content` to fit `cap_tokens` (≈4 bytes/token), choosing an
/// extraction strategy from `category` so the most useful part of a tool
/// result survives truncation rather than an arbitrary character cut.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 narrow the query to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!("[... {{lines}} lines omitted ({omitted_bytes} bytes) ...]"),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(
    content: &str,
    cap_chars: usize,
    max_head: usize,
    max_tail: usize,
    notice_template: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_rev: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_rev.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_rev.push(line);
    }
    let tail_count = tail_rev.len();
    let tail: String = tail_rev.into_iter().rev().collect::<Vec<_>>().join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_turns(n: usize) -> ConversationContext {
        let mut ctx = ConversationContext::new(10, vec![], vec![]);
        let mut pos = 10;
        for i in 0..n {
            let start = pos;
            pos += 20;
            ctx.push_turn(i % 2 == 0, start, pos, format!("turn {i}"));
        }
        ctx.current_pos = pos;
        ctx
    }

    #[test]
    fn plan_shift_is_none_when_under_limit() {
        let ctx = ctx_with_turns(2);
        assert_eq!(plan_shift(&ctx, 5), None);
    }

    #[test]
    fn plan_shift_picks_the_oldest_turns_to_drop() {
        let ctx = ctx_with_turns(5);
        // keep_last_k=3 drops turns 0 and 1: kv_start of turn 0 through
        // kv_end of turn 1.
        let (drop_start, drop_end) = plan_shift(&ctx, 3).unwrap();
        assert_eq!(drop_start, ctx.turns[0].kv_start);
        assert_eq!(drop_end, ctx.turns[1].kv_end);
    }

    #[test]
    fn apply_shift_drops_turns_and_closes_the_gap() {
        let mut ctx = ctx_with_turns(5);
        let before_pos = ctx.current_pos;
        let (drop_start, drop_end) = plan_shift(&ctx, 3).unwrap();
        let shift = drop_end - drop_start;

        apply_shift(&mut ctx, 3, drop_start, drop_end);

        assert_eq!(ctx.turns.len(), 3);
        assert_eq!(ctx.current_pos, before_pos - shift);
        // Surviving turns keep their (kv_end - kv_start) span and stay contiguous.
        for turn in &ctx.turns {
            assert_eq!(turn.kv_end - turn.kv_start, 20);
        }
        assert_eq!(ctx.turns[0].kv_start, 10);
    }

    #[test]
    fn repeated_shifts_with_the_same_argument_are_idempotent() {
        // §8 item 6: once turn_count == keep_last_k, further shifts no-op.
        let mut ctx = ctx_with_turns(5);
        let (drop_start, drop_end) = plan_shift(&ctx, 3).unwrap();
        apply_shift(&mut ctx, 3, drop_start, drop_end);
        assert_eq!(ctx.turns.len(), 3);

        assert_eq!(plan_shift(&ctx, 3), None);
        let snapshot_pos = ctx.current_pos;
        let snapshot_turns = ctx.turns.clone();
        // A second call plans nothing, so the state is untouched.
        assert_eq!(ctx.current_pos, snapshot_pos);
        assert_eq!(ctx.turns, snapshot_turns);
    }

    #[test]
    fn prune_unimportant_is_not_implemented() {
        let err = prune_unimportant(0.5).unwrap_err();
        assert!(matches!(err, GovernorError::NotImplemented("prune_unimportant")));
    }

    #[test]
    fn concatenate_previews_respects_brief_budget() {
        let previews: Vec<String> = (0..50).map(|i| format!("preview line number {i}")).collect();
        let brief = concatenate_previews(&previews, SummaryDetail::Brief);
        let thorough = concatenate_previews(&previews, SummaryDetail::Thorough);
        assert!(brief.len() <= 400);
        assert!(thorough.len() > brief.len());
    }

    // ── smart_truncate ───────────────────────────────────────────────────────

    #[test]
    fn smart_truncate_returns_original_when_under_cap() {
        let short = "hello world";
        assert_eq!(smart_truncate(short, OutputCategory::Generic, 100), short);
    }

    #[test]
    fn smart_truncate_zero_cap_returns_original() {
        let content = "a".repeat(10_000);
        assert_eq!(smart_truncate(&content, OutputCategory::Generic, 0), content);
    }

    #[test]
    fn smart_truncate_match_list_keeps_leading_matches() {
        let content = (0..200).map(|i| format!("match {i}\n")).collect::<String>();
        let result = smart_truncate(&content, OutputCategory::MatchList, 20);
        assert!(result.starts_with("match 0"));
        assert!(result.contains("more matches omitted"));
    }

    #[test]
    fn smart_truncate_head_tail_keeps_both_ends() {
        let content = (0..300).map(|i| format!("line {i}\n")).collect::<String>();
        let result = smart_truncate(&content, OutputCategory::HeadTail, 40);
        assert!(result.starts_with("line 0"));
        assert!(result.trim_end().ends_with("line 299"));
        assert!(result.contains("lines"));
    }

    #[test]
    fn smart_truncate_generic_cuts_at_line_boundary() {
        let content = (0..500).map(|i| format!("x{i}\n")).collect::<String>();
        let result = smart_truncate(&content, OutputCategory::Generic, 30);
        assert!(result.contains("bytes omitted"));
        assert!(!result.is_empty());
    }
}
