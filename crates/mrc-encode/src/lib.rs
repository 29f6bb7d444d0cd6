//! Question/context pair encoding with answer-span labels, and the artifacts it persists.

pub mod artifact;
pub mod builder;
pub mod tokenizer;

pub use artifact::{artifact_path, persist, read_artifact, read_split, write_artifact, ARTIFACT_EXTENSION};
pub use builder::{EncodeOptions, EncodingBuilder};
pub use tokenizer::{load_tokenizer, token_strings, UNKNOWN_TOKEN};
