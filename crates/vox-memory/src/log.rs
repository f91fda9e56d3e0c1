// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// An `ADD` record (§6). Carries everything needed to reconstruct the entry
/// exactly, including its assigned id and timestamp, so replay never has to
/// invent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecord {
    pub id: u64,
    pub turn: u64,
    pub ts: i64,
    pub user: bool,
    pub imp: f32,
    pub text: String,
    pub tags: Vec<String>,
}

/// The three mutation records (§6). Tagged on `op` so they round-trip
/// unambiguously next to the untagged `AddRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpRecord {
    Update { id: u64, tags: Vec<String> },
    UpdateText { id: u64, text: String },
    Delete { id: u64 },
}

/// One line of the session log. `Add` has no `op` key, so it is tried first;
/// untagged deserialization falls through to `Op` for anything carrying one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Add(AddRecord),
    Op(OpRecord),
}

/// Parses one JSONL line into a record. Blank lines are not valid input;
/// callers should filter them before calling this.
pub fn parse_line(line: &str) -> Result<LogRecord, serde_json::Error> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_record_round_trips() {
        let rec = LogRecord::Add(AddRecord {
            id: 1,
            turn: 0,
            ts: 1000,
            user: true,
            imp: 0.5,
            text: "hello".into(),
            tags: vec!["greeting".into()],
        });
        let line = serde_json::to_string(&rec).unwrap();
        assert!(!line.contains("\"op\""));
        let parsed = parse_line(&line).unwrap();
        assert!(matches!(parsed, LogRecord::Add(a) if a.id == 1 && a.text == "hello"));
    }

    #[test]
    fn update_tags_record_round_trips() {
        let rec = LogRecord::Op(OpRecord::Update {
            id: 7,
            tags: vec!["a".into(), "b".into()],
        });
        let line = serde_json::to_string(&rec).unwrap();
        let parsed = parse_line(&line).unwrap();
        assert!(matches!(parsed, LogRecord::Op(OpRecord::Update { id, .. }) if id == 7));
    }

    #[test]
    fn update_text_record_round_trips() {
        let rec = LogRecord::Op(OpRecord::UpdateText {
            id: 3,
            text: "revised".into(),
        });
        let line = serde_json::to_string(&rec).unwrap();
        let parsed = parse_line(&line).unwrap();
        match parsed {
            LogRecord::Op(OpRecord::UpdateText { id, text }) => {
                assert_eq!(id, 3);
                assert_eq!(text, "revised");
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn delete_record_round_trips() {
        let rec = LogRecord::Op(OpRecord::Delete { id: 9 });
        let line = serde_json::to_string(&rec).unwrap();
        let parsed = parse_line(&line).unwrap();
        assert!(matches!(parsed, LogRecord::Op(OpRecord::Delete { id }) if id == 9));
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_line("{not json").is_err());
    }
}
