//! Training and evaluation loops over persisted, labelled encodings.

pub mod data;
pub mod evaluator;
pub mod trainer;

pub use data::{load_split_loaders, SpanBatch, SpanDataset, SpanLoader};
pub use evaluator::{BatchPredictions, EvalReport, Evaluator};
pub use trainer::{adamw_params, TrainOptions, TrainOutcome, Trainer, INTERMEDIATE_CHECKPOINT};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

pub(crate) fn progress_bar(len: usize, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!("{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{percent}}%) {{msg}}"))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
