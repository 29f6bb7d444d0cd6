//! Alignment of a free-text answer onto token positions.
//!
//! The answer is lower-cased and split on whitespace; its first and last words are
//! looked up independently in the token sequence. A word the tokenizer split into a
//! root plus continuation pieces (`play`, `##ing`) is found by dropping characters
//! from the end until a token matches; the boundary then lands on the token right
//! after the root.

/// Label written for an answer word that does not occur in the token sequence.
pub const NOT_FOUND: i64 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerSpan {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl AnswerSpan {
    pub fn start_label(&self) -> i64 { to_label(self.start) }

    pub fn end_label(&self) -> i64 { to_label(self.end) }
}

fn to_label(index: Option<usize>) -> i64 {
    index.and_then(|i| i64::try_from(i).ok()).unwrap_or(NOT_FOUND)
}

/// Find the token span of `answer` inside `tokens`.
///
/// Single-word answers always produce `start == end`. An answer without any word
/// yields an empty span.
pub fn locate_answer_span<S: AsRef<str>>(tokens: &[S], answer: &str) -> AnswerSpan {
    let answer = answer.to_lowercase();
    let words: Vec<&str> = answer.split_whitespace().collect();
    let (first, last) = match (words.first(), words.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return AnswerSpan::default(),
    };
    let start = shrinking_match(tokens, first);
    let end = if words.len() > 1 { shrinking_match(tokens, last) } else { start };
    AnswerSpan { start, end }
}

/// Index of the first token equal to `word`, or to the longest prefix of `word`
/// present in `tokens`.
///
/// A prefix hit reports the following index (`matched + 1`), which is where the
/// continuation piece of a split word sits. `None` once every prefix is exhausted.
pub fn shrinking_match<S: AsRef<str>>(tokens: &[S], word: &str) -> Option<usize> {
    let mut candidate = word.to_string();
    let mut shrunk = false;
    while !candidate.is_empty() {
        if let Some(index) = tokens.iter().position(|t| t.as_ref() == candidate) {
            return Some(if shrunk { index + 1 } else { index });
        }
        candidate.pop();
        shrunk = true;
    }
    None
}
