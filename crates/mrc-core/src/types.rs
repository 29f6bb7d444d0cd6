//! Domain types shared by the encoding, training and evaluation stages.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::span::AnswerSpan;

/// One `(question, context, answer)` row of the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub question: String,
    pub context: String,
    pub answer: String,
}

impl Record {
    pub fn new(question: impl Into<String>, context: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { question: question.into(), context: context.into(), answer: answer.into() }
    }
}

/// Tokenizer output for one batch of records, before answer spans are attached.
///
/// Every row of `input_ids` and `attention_mask` has the same, fixed length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEncoding {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
}

impl BatchEncoding {
    pub fn len(&self) -> usize { self.input_ids.len() }

    pub fn is_empty(&self) -> bool { self.input_ids.is_empty() }

    /// Attach one answer span per record and freeze the result.
    ///
    /// Fails when `spans` (or the attention mask) does not line up with `input_ids`.
    pub fn annotate(self, spans: &[AnswerSpan]) -> Result<AnnotatedEncoding> {
        let expected = self.input_ids.len();
        if self.attention_mask.len() != expected {
            return Err(Error::Misaligned { what: "attention_mask", expected, actual: self.attention_mask.len() });
        }
        if spans.len() != expected {
            return Err(Error::Misaligned { what: "answer spans", expected, actual: spans.len() });
        }
        let (start_positions, end_positions) = spans.iter().map(|s| (s.start_label(), s.end_label())).unzip();
        Ok(AnnotatedEncoding {
            input_ids: self.input_ids,
            attention_mask: self.attention_mask,
            start_positions,
            end_positions,
        })
    }
}

/// A batch encoding carrying `start_positions`/`end_positions` labels.
///
/// Index `i` of every field refers to the same record. A label of `-1` marks an
/// answer word that could not be found in the (possibly truncated) token sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedEncoding {
    input_ids: Vec<Vec<u32>>,
    attention_mask: Vec<Vec<u32>>,
    start_positions: Vec<i64>,
    end_positions: Vec<i64>,
}

impl AnnotatedEncoding {
    pub fn len(&self) -> usize { self.input_ids.len() }

    pub fn is_empty(&self) -> bool { self.input_ids.is_empty() }

    pub fn input_ids(&self) -> &[Vec<u32>] { &self.input_ids }

    pub fn attention_mask(&self) -> &[Vec<u32>] { &self.attention_mask }

    pub fn start_positions(&self) -> &[i64] { &self.start_positions }

    pub fn end_positions(&self) -> &[i64] { &self.end_positions }

    pub fn record(&self, i: usize) -> Option<EncodedRecord<'_>> {
        Some(EncodedRecord {
            input_ids: self.input_ids.get(i)?,
            attention_mask: self.attention_mask.get(i)?,
            start_position: *self.start_positions.get(i)?,
            end_position: *self.end_positions.get(i)?,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = EncodedRecord<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.record(i))
    }
}

/// Borrowed view of one labelled row of an [`AnnotatedEncoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedRecord<'a> {
    pub input_ids: &'a [u32],
    pub attention_mask: &'a [u32],
    pub start_position: i64,
    pub end_position: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding(rows: usize) -> BatchEncoding {
        BatchEncoding { input_ids: vec![vec![101, 7, 102]; rows], attention_mask: vec![vec![1, 1, 1]; rows] }
    }

    #[test]
    fn annotate_keeps_record_alignment() {
        let spans = [AnswerSpan { start: Some(1), end: Some(1) }, AnswerSpan { start: None, end: Some(2) }];
        let annotated = encoding(2).annotate(&spans).unwrap();
        assert_eq!(annotated.start_positions(), &[1, -1]);
        assert_eq!(annotated.end_positions(), &[1, 2]);
        let second = annotated.record(1).unwrap();
        assert_eq!(second.start_position, -1);
        assert_eq!(second.input_ids, &[101, 7, 102]);
    }

    #[test]
    fn annotate_rejects_span_count_mismatch() {
        let err = encoding(3).annotate(&[AnswerSpan::default()]).unwrap_err();
        assert!(matches!(err, Error::Misaligned { expected: 3, actual: 1, .. }));
    }
}
