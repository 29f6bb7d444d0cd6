//! Span-prediction model on candle: a BERT encoder with a two-logit head scoring
//! every token as answer start or end.

use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use std::path::{Path, PathBuf};

pub mod bert;
pub mod device;
pub mod encoder;
pub mod freeze;
pub mod loss;

pub use bert::{checkpoint_path, BertSpanModel, CHECKPOINT_EXTENSION, CONFIG_FILE};
pub use device::select_device;
pub use encoder::{BertConfig, BertEncoder};
pub use freeze::FreezePolicy;
pub use loss::{span_cross_entropy, span_loss};

/// Output of one forward pass; logits are `(batch, seq_len)`.
#[derive(Debug, Clone)]
pub struct SpanOutput {
    /// Present when target positions were supplied.
    pub loss: Option<Tensor>,
    pub start_logits: Tensor,
    pub end_logits: Tensor,
}

pub trait SpanPredictor {
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        positions: Option<(&Tensor, &Tensor)>,
    ) -> Result<SpanOutput>;

    fn device(&self) -> &Device;
}

pub trait TrainableSpanModel: SpanPredictor {
    /// Variables the optimizer may update; frozen parameters are left out.
    fn trainable_vars(&self) -> Result<Vec<Var>>;

    /// Write the weights as `{dir}/{name}.safetensors` next to the model config.
    fn save(&self, dir: &Path, name: &str) -> Result<PathBuf>;
}
