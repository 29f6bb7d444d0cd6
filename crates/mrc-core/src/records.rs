use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::types::Record;

#[derive(Deserialize)]
struct Row {
    #[serde(rename = "Question")]
    question: String,
    #[serde(rename = "Context")]
    context: String,
    #[serde(rename = "Answer")]
    answer: AnswerCell,
}

/// The `Answer` column holds either the answer text or a SQuAD-style object.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerCell {
    Text(String),
    Squad { text: String },
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        let answer = match row.answer { AnswerCell::Text(t) | AnswerCell::Squad { text: t } => t };
        Record { question: row.question, context: row.context, answer }
    }
}

/// Read a JSON Lines table with `Context`, `Question` and `Answer` columns, in row order.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read records from {}", path.display()))?;
    parse_records(&text).with_context(|| format!("Invalid record file {}", path.display()))
}

pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        let row: Row = serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
        records.push(row.into());
    }
    Ok(records)
}

/// Column-wise view of the records; index `i` of each column is the same row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    pub questions: Vec<String>,
    pub contexts: Vec<String>,
    pub answers: Vec<String>,
}

impl Columns {
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut cols = Self::default();
        for r in records {
            cols.questions.push(r.question);
            cols.contexts.push(r.context);
            cols.answers.push(r.answer);
        }
        cols
    }

    pub fn len(&self) -> usize { self.questions.len() }

    pub fn is_empty(&self) -> bool { self.questions.is_empty() }
}
