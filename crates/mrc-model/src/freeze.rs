use mrc_core::error::{Error, Result};

const EMBEDDINGS_PREFIX: &str = "bert.embeddings.";

/// Which encoder parameters are excluded from gradient updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FreezePolicy {
    #[default]
    None,
    EmbeddingsOnly,
    /// Embeddings plus the first `n` encoder layers.
    EmbeddingsPlusLayers(usize),
}

impl FreezePolicy {
    /// `0` → nothing, `-1` → embeddings only, `n > 0` → embeddings and layers `0..n`.
    pub fn from_layer_count(count: i64) -> Result<Self> {
        match count {
            0 => Ok(Self::None),
            -1 => Ok(Self::EmbeddingsOnly),
            n if n > 0 => usize::try_from(n)
                .map(Self::EmbeddingsPlusLayers)
                .map_err(|_| Error::InvalidConfig(format!("freeze layer count {n} is out of range"))),
            n => Err(Error::InvalidConfig(format!("freeze layer count must be >= -1, got {n}"))),
        }
    }

    pub fn is_frozen(&self, var_name: &str) -> bool {
        match *self {
            Self::None => false,
            Self::EmbeddingsOnly => var_name.starts_with(EMBEDDINGS_PREFIX),
            Self::EmbeddingsPlusLayers(n) => {
                var_name.starts_with(EMBEDDINGS_PREFIX) || encoder_layer(var_name).is_some_and(|layer| layer < n)
            }
        }
    }
}

fn encoder_layer(var_name: &str) -> Option<usize> {
    let rest = var_name.strip_prefix("bert.encoder.layer.")?;
    rest.split('.').next()?.parse().ok()
}
