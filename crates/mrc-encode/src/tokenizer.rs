use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tokenizers::{
    PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy,
};
use tracing::info;

/// Token string reported for ids missing from the vocabulary.
pub const UNKNOWN_TOKEN: &str = "[UNK]";

/// Load a tokenizer from a model directory (`<dir>/tokenizer.json`) or a direct file path,
/// configured for longest-first truncation and fixed padding to `max_length`.
pub fn load_tokenizer(location: &Path, max_length: usize) -> Result<Tokenizer> {
    let path = resolve_tokenizer_file(location);
    let mut tokenizer = Tokenizer::from_file(&path)
        .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Invalid truncation settings: {e}"))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(max_length),
        ..Default::default()
    }));
    info!("Loaded tokenizer from {} (max_length={})", path.display(), max_length);
    Ok(tokenizer)
}

fn resolve_tokenizer_file(location: &Path) -> PathBuf {
    if location.is_dir() { location.join("tokenizer.json") } else { location.to_path_buf() }
}

/// Convert one record's ids back into their token strings.
pub fn token_strings(tokenizer: &Tokenizer, ids: &[u32]) -> Vec<String> {
    ids.iter()
        .map(|&id| tokenizer.id_to_token(id).unwrap_or_else(|| UNKNOWN_TOKEN.to_string()))
        .collect()
}
