use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Per-record columns or arrays disagree in length.
    #[error("Misaligned encoding: {what} has {actual} entries, expected {expected}")]
    Misaligned { what: &'static str, expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
