// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::MemoryError;
use crate::log::{parse_line, AddRecord, LogRecord, OpRecord};

/// Export/import format selector for `MemoryStore::export` (§4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

/// One unit of conversational memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: u64,
    pub turn: u64,
    pub ts: i64,
    pub is_user: bool,
    pub importance: f32,
    pub text: String,
    pub tags: Vec<String>,
}

/// Aggregate counters returned by `stats()` (§4.2.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStats {
    pub entry_count: usize,
    pub total_searches: u64,
    pub total_tags: usize,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub relevance: f32,
}

/// Append-only, replayable conversational memory (§4.2).
///
/// Every mutation is written to `log_path` before it is applied in memory,
/// and the file is flushed on every append — the log is always a strict
/// serialization of what is in memory, never ahead or behind it.
pub struct MemoryStore {
    session_id: String,
    storage_dir: PathBuf,
    log_path: PathBuf,
    log_file: File,
    entries: Vec<MemoryEntry>,
    next_id: u64,
    current_turn: u64,
    total_searches: u64,
    max_entries: usize,
}

/// Tags are unordered; duplicates within an entry are collapsed (§3),
/// keeping first-seen order so output stays deterministic.
fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

impl MemoryStore {
    /// Opens (creating if absent) the per-session log for `session_id` under
    /// `storage_dir`, then replays the most recently modified prior `.jsonl`
    /// log in that directory — if any — into memory (§4.2 `init`).
    pub fn init(
        session_id: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
        max_entries: usize,
    ) -> Result<Self, MemoryError> {
        let session_id = session_id.into();
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;

        let log_path = storage_dir.join(format!("{session_id}.jsonl"));

        let mut store = Self {
            session_id,
            storage_dir: storage_dir.clone(),
            log_path: log_path.clone(),
            log_file: OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?,
            entries: Vec::new(),
            next_id: 1,
            current_turn: 0,
            total_searches: 0,
            max_entries,
        };

        if let Some(prev) = store.most_recent_previous_log()? {
            debug!(path = %prev.display(), "replaying previous memory log");
            store.replay(&prev)?;
        }

        Ok(store)
    }

    fn most_recent_previous_log(&self) -> Result<Option<PathBuf>, MemoryError> {
        let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
        for entry in fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.log_path {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if best.as_ref().map(|(_, t)| modified > *t).unwrap_or(true) {
                best = Some((path, modified));
            }
        }
        Ok(best.map(|(p, _)| p))
    }

    fn replay(&mut self, path: &Path) -> Result<(), MemoryError> {
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_line(&line)
                .map_err(|e| MemoryError::ParseFailure(format!("{}: {e}", path.display())))?;
            self.apply(record, false)?;
        }
        Ok(())
    }

    /// Applies a record to the in-memory entry list. When `write_log` is
    /// true the record is also appended (and flushed) to the session log —
    /// replay calls this with `write_log = false` to avoid re-writing
    /// history into the new session's file.
    fn apply(&mut self, record: LogRecord, write_log: bool) -> Result<(), MemoryError> {
        match record {
            LogRecord::Add(add) => {
                self.next_id = self.next_id.max(add.id + 1);
                self.entries.push(MemoryEntry {
                    id: add.id,
                    turn: add.turn,
                    ts: add.ts,
                    is_user: add.user,
                    importance: add.imp,
                    text: add.text.clone(),
                    tags: add.tags.clone(),
                });
                if write_log {
                    self.append_log(&LogRecord::Add(add))?;
                }
            }
            LogRecord::Op(OpRecord::Update { id, tags }) => {
                let idx = self.index_of(id)?;
                self.entries[idx].tags = tags.clone();
                if write_log {
                    self.append_log(&LogRecord::Op(OpRecord::Update { id, tags }))?;
                }
            }
            LogRecord::Op(OpRecord::UpdateText { id, text }) => {
                let idx = self.index_of(id)?;
                self.entries[idx].text = text.clone();
                if write_log {
                    self.append_log(&LogRecord::Op(OpRecord::UpdateText { id, text }))?;
                }
            }
            LogRecord::Op(OpRecord::Delete { id }) => {
                let idx = self.index_of(id)?;
                self.entries.remove(idx);
                if write_log {
                    self.append_log(&LogRecord::Op(OpRecord::Delete { id }))?;
                }
            }
        }
        Ok(())
    }

    fn index_of(&self, id: u64) -> Result<usize, MemoryError> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(MemoryError::NotFound(id))
    }

    fn append_log(&mut self, record: &LogRecord) -> Result<(), MemoryError> {
        let line = serde_json::to_string(record)
            .map_err(|e| MemoryError::ParseFailure(e.to_string()))?;
        writeln!(self.log_file, "{line}")?;
        self.log_file.flush()?;
        Ok(())
    }

    /// Advances and returns the turn counter the Governor uses to tag new
    /// entries (§4.2 `add`'s `turn` field is not a caller-supplied
    /// parameter; the store tracks it across calls to `add`).
    pub fn advance_turn(&mut self) -> u64 {
        self.current_turn += 1;
        self.current_turn
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a new memory entry (§4.2 `add`). Fails with `StoreFull` once
    /// `max_entries` is reached.
    pub fn add(
        &mut self,
        text: impl Into<String>,
        tags: Vec<String>,
        importance: f32,
        is_user: bool,
    ) -> Result<u64, MemoryError> {
        if self.entries.len() >= self.max_entries {
            return Err(MemoryError::StoreFull(self.max_entries));
        }
        let id = self.next_id;
        let record = AddRecord {
            id,
            turn: self.current_turn,
            ts: Utc::now().timestamp(),
            user: is_user,
            imp: importance,
            text: text.into(),
            tags: dedup_tags(tags),
        };
        self.apply(LogRecord::Add(record), true)?;
        Ok(id)
    }

    /// Same as `add`, but used by the replay path: takes every field
    /// explicitly and does not write to the log (§4.2 `add_internal`).
    pub fn add_internal(
        &mut self,
        text: impl Into<String>,
        tags: Vec<String>,
        importance: f32,
        is_user: bool,
        id: u64,
        turn_id: u64,
        ts: i64,
    ) -> Result<(), MemoryError> {
        let record = AddRecord {
            id,
            turn: turn_id,
            ts,
            user: is_user,
            imp: importance,
            text: text.into(),
            tags: dedup_tags(tags),
        };
        self.apply(LogRecord::Add(record), false)
    }

    /// Ranked text search (§4.2 `search`). Empty query falls back to an
    /// importance/recency blend; otherwise word-overlap similarity combined
    /// with importance. Ties resolve newer-first (higher id first).
    pub fn search(
        &mut self,
        query: &str,
        tag_filter: &[String],
        limit: usize,
    ) -> Vec<ScoredEntry> {
        self.total_searches += 1;
        let n = self.entries.len();
        let query_words = tokenize(query);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| tag_filter.iter().all(|t| e.tags.contains(t)))
            .map(|(i, e)| {
                let score = if query_words.is_empty() {
                    let recency = 1.0 - (i as f32 / n.max(1) as f32);
                    0.6 * e.importance + 0.4 * recency
                } else {
                    let entry_words = tokenize(&e.text);
                    let overlap = query_words.intersection(&entry_words).count();
                    let sim = overlap as f32 / query_words.len().max(1) as f32;
                    0.7 * sim + 0.3 * e.importance
                };
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.entries[b.0].id.cmp(&self.entries[a.0].id))
        });

        scored
            .into_iter()
            .take(limit)
            .map(|(i, score)| ScoredEntry {
                entry: self.entries[i].clone(),
                relevance: score,
            })
            .collect()
    }

    /// All-of tag filter, newest first, no text ranking (§4.2 `search_by_tag`).
    pub fn search_by_tag(&self, tags: &[String], limit: usize) -> Vec<ScoredEntry> {
        let mut matches: Vec<&MemoryEntry> = self
            .entries
            .iter()
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .collect();
        matches.sort_by(|a, b| b.id.cmp(&a.id));
        matches
            .into_iter()
            .take(limit)
            .map(|e| ScoredEntry {
                entry: e.clone(),
                relevance: e.importance,
            })
            .collect()
    }

    pub fn update_tags(&mut self, memory_id: u64, new_tags: Vec<String>) -> Result<(), MemoryError> {
        self.apply(
            LogRecord::Op(OpRecord::Update {
                id: memory_id,
                tags: dedup_tags(new_tags),
            }),
            true,
        )
    }

    pub fn update_text(&mut self, memory_id: u64, new_text: impl Into<String>) -> Result<(), MemoryError> {
        self.apply(
            LogRecord::Op(OpRecord::UpdateText {
                id: memory_id,
                text: new_text.into(),
            }),
            true,
        )
    }

    pub fn delete(&mut self, memory_ids: &[u64]) -> Result<(), MemoryError> {
        for &id in memory_ids {
            self.apply(LogRecord::Op(OpRecord::Delete { id }), true)?;
        }
        Ok(())
    }

    /// Compacts out entries older than `older_than_seconds` with importance
    /// below `importance_below`, emitting a `DELETE` record per removed
    /// entry (§4.2 `forget`). Returns the number pruned.
    pub fn forget(&mut self, older_than_seconds: i64, importance_below: f32) -> Result<usize, MemoryError> {
        let now = Utc::now().timestamp();
        let to_remove: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| now - e.ts > older_than_seconds && e.importance < importance_below)
            .map(|e| e.id)
            .collect();
        let count = to_remove.len();
        self.delete(&to_remove)?;
        Ok(count)
    }

    pub fn stats(&self) -> MemoryStats {
        let mut tags: HashSet<&str> = HashSet::new();
        for e in &self.entries {
            for t in &e.tags {
                tags.insert(t.as_str());
            }
        }
        MemoryStats {
            entry_count: self.entries.len(),
            total_searches: self.total_searches,
            total_tags: tags.len(),
            oldest_timestamp: self.entries.iter().map(|e| e.ts).min(),
            newest_timestamp: self.entries.iter().map(|e| e.ts).max(),
        }
    }

    /// Writes `entries` plus `stats()` to `path` (§4.2.1). `Markdown` is a
    /// read-only convenience format with no corresponding `import`.
    pub fn export(&self, path: impl AsRef<Path>, format: ExportFormat) -> Result<(), MemoryError> {
        match format {
            ExportFormat::Json => {
                let doc = json!({
                    "entries": self.entries,
                    "statistics": self.stats(),
                });
                fs::write(path, serde_json::to_string_pretty(&doc).unwrap())?;
            }
            ExportFormat::Markdown => {
                let mut out = String::new();
                for e in &self.entries {
                    out.push_str(&format!("### Entry {}\n\n{}\n\n", e.id, e.text));
                    if !e.tags.is_empty() {
                        out.push_str("Tags:\n");
                        for t in &e.tags {
                            out.push_str(&format!("- {t}\n"));
                        }
                        out.push('\n');
                    }
                }
                fs::write(path, out)?;
            }
        }
        Ok(())
    }

    /// Reads entries back from a prior JSON `export`, or replays a raw
    /// `.jsonl` log — auto-detected by whether the first line contains
    /// `"entries":` (§4.2 `import`).
    pub fn import(&mut self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let first_line = content.lines().next().unwrap_or("");
        if first_line.contains("\"entries\":") || content.contains("\"entries\":") {
            #[derive(Deserialize)]
            struct ExportDoc {
                entries: Vec<MemoryEntry>,
            }
            let doc: ExportDoc = serde_json::from_str(&content)
                .map_err(|e| MemoryError::ParseFailure(e.to_string()))?;
            for e in doc.entries {
                self.add_internal(e.text, e.tags, e.importance, e.is_user, e.id, e.turn, e.ts)?;
            }
        } else {
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record = parse_line(line)
                    .map_err(|e| MemoryError::ParseFailure(format!("{}: {e}", path.display())))?;
                self.apply(record, false)?;
            }
        }
        Ok(())
    }

    /// Moves every `.jsonl` file in `storage_dir` other than the current
    /// session's into an `archive/` subdirectory (§4.2 `archive_sessions`).
    pub fn archive_sessions(&self) -> Result<usize, MemoryError> {
        let archive_dir = self.storage_dir.join("archive");
        fs::create_dir_all(&archive_dir)?;
        let mut moved = 0;
        for entry in fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.log_path || path == archive_dir {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let dest = archive_dir.join(path.file_name().unwrap());
            if let Err(e) = fs::rename(&path, &dest) {
                warn!(path = %path.display(), error = %e, "failed to archive session log");
                continue;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path, session: &str) -> MemoryStore {
        MemoryStore::init(session, dir.to_path_buf(), 100).unwrap()
    }

    #[test]
    fn add_assigns_monotonic_ids() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        let a = s.add("first", vec![], 0.5, true).unwrap();
        let b = s.add("second", vec![], 0.5, true).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn add_fails_when_store_full() {
        let dir = tempdir().unwrap();
        let mut s = MemoryStore::init("s1", dir.path().to_path_buf(), 1).unwrap();
        s.add("first", vec![], 0.5, true).unwrap();
        let err = s.add("second", vec![], 0.5, true).unwrap_err();
        assert!(matches!(err, MemoryError::StoreFull(1)));
    }

    #[test]
    fn update_and_delete_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        assert!(matches!(
            s.update_tags(42, vec![]).unwrap_err(),
            MemoryError::NotFound(42)
        ));
        assert!(matches!(
            s.delete(&[42]).unwrap_err(),
            MemoryError::NotFound(42)
        ));
    }

    #[test]
    fn search_ranks_text_overlap_over_unrelated_entries() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        s.add("the weather is sunny today", vec![], 0.2, true).unwrap();
        s.add("favorite programming language is rust", vec![], 0.2, true)
            .unwrap();
        let hits = s.search("rust programming", &[], 10);
        assert_eq!(hits[0].entry.text, "favorite programming language is rust");
    }

    #[test]
    fn search_ties_break_newer_first() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        s.add("alpha", vec![], 0.5, true).unwrap();
        s.add("alpha", vec![], 0.5, true).unwrap();
        let hits = s.search("alpha", &[], 10);
        assert!(hits[0].entry.id > hits[1].entry.id);
    }

    #[test]
    fn search_increments_total_searches() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        s.search("anything", &[], 5);
        s.search("else", &[], 5);
        assert_eq!(s.stats().total_searches, 2);
    }

    #[test]
    fn add_collapses_duplicate_tags() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        let id = s
            .add("hi", vec!["x".into(), "y".into(), "x".into()], 0.5, true)
            .unwrap();
        assert_eq!(s.entries[s.index_of(id).unwrap()].tags, vec!["x", "y"]);
    }

    #[test]
    fn update_tags_collapses_duplicate_tags() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        let id = s.add("hi", vec![], 0.5, true).unwrap();
        s.update_tags(id, vec!["a".into(), "a".into(), "b".into()]).unwrap();
        assert_eq!(s.entries[s.index_of(id).unwrap()].tags, vec!["a", "b"]);
    }

    #[test]
    fn search_by_tag_requires_all_tags_present() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        s.add("a", vec!["x".into(), "y".into()], 0.5, true).unwrap();
        s.add("b", vec!["x".into()], 0.5, true).unwrap();
        let hits = s.search_by_tag(&["x".into(), "y".into()], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.text, "a");
    }

    #[test]
    fn forget_prunes_old_low_importance_entries_only() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        let old_id = s.add("old trivial", vec![], 0.1, true).unwrap();
        let keep_id = s.add("important", vec![], 0.9, true).unwrap();
        // Simulate age by rewriting the timestamp directly.
        let idx = s.index_of(old_id).unwrap();
        s.entries[idx].ts -= 10_000;
        let pruned = s.forget(1000, 0.5).unwrap();
        assert_eq!(pruned, 1);
        assert!(s.index_of(old_id).is_err());
        assert!(s.index_of(keep_id).is_ok());
    }

    #[test]
    fn replay_reproduces_live_entry_list_exactly() {
        let dir = tempdir().unwrap();
        let mut first = store(dir.path(), "session-a");
        let id1 = first.add("remember this", vec!["note".into()], 0.6, true).unwrap();
        first.update_tags(id1, vec!["note".into(), "important".into()]).unwrap();
        let id2 = first.add("second thing", vec![], 0.3, false).unwrap();
        first.update_text(id2, "second thing, revised").unwrap();
        drop(first);

        // Make the previous log's mtime unambiguously older (some filesystems
        // only track mtime at 1s resolution), then init a new session in the
        // same directory.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = store(dir.path(), "session-b");
        assert_eq!(second.entries.len(), 2);
        assert_eq!(second.entries[0].tags, vec!["note", "important"]);
        assert_eq!(second.entries[1].text, "second thing, revised");
        assert_eq!(second.next_id, 3);
    }

    #[test]
    fn export_json_then_import_into_fresh_store_restores_entries() {
        let dir = tempdir().unwrap();
        let mut s = store(dir.path(), "s1");
        s.add("alpha", vec!["a".into()], 0.4, true).unwrap();
        s.add("beta", vec!["b".into()], 0.8, false).unwrap();
        let export_path = dir.path().join("export.json");
        s.export(&export_path, ExportFormat::Json).unwrap();

        let dir2 = tempdir().unwrap();
        let mut s2 = store(dir2.path(), "s2");
        s2.import(&export_path).unwrap();
        assert_eq!(s2.len(), 2);
        assert_eq!(s2.entries[0].text, "alpha");
    }

    #[test]
    fn archive_sessions_moves_other_logs_but_not_current() {
        let dir = tempdir().unwrap();
        let mut old = store(dir.path(), "old-session");
        old.add("hi", vec![], 0.5, true).unwrap();
        drop(old);

        let current = store(dir.path(), "current-session");
        let moved = current.archive_sessions().unwrap();
        assert_eq!(moved, 1);
        assert!(dir.path().join("archive").join("old-session.jsonl").exists());
        assert!(dir.path().join("current-session.jsonl").exists());
    }
}
