#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunking;
pub mod config;
pub mod error;
pub mod records;
pub mod span;
pub mod types;

pub use chunking::{divide_into_chunks, ArtifactChunking};
pub use records::{read_records, Columns};
pub use span::{locate_answer_span, shrinking_match, AnswerSpan, NOT_FOUND};
pub use types::{AnnotatedEncoding, BatchEncoding, EncodedRecord, Record};
