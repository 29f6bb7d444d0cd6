use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor, D};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use mrc_model::{BertSpanModel, SpanPredictor};

use crate::data::SpanLoader;
use crate::progress_bar;

/// Predicted and true indices for one evaluated batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPredictions {
    pub start_pred: Vec<i64>,
    pub start_true: Vec<i64>,
    pub end_pred: Vec<i64>,
    pub end_true: Vec<i64>,
}

impl BatchPredictions {
    pub fn start_accuracy(&self) -> f64 { fraction_equal(&self.start_pred, &self.start_true) }

    pub fn end_accuracy(&self) -> f64 { fraction_equal(&self.end_pred, &self.end_true) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// Mean over every per-batch start and end accuracy, pooled.
    pub accuracy: f64,
    pub start_accuracy: f64,
    pub end_accuracy: f64,
    pub batches: Vec<BatchPredictions>,
}

pub struct Evaluator;

impl Evaluator {
    /// Rebuild a saved model read-only from `{model_path}/{model_name}.safetensors`.
    pub fn load_checkpoint(model_path: &Path, model_name: &str, device: &Device) -> Result<BertSpanModel> {
        BertSpanModel::load_checkpoint(model_path, model_name, device)
    }

    /// Arg-max predictions for every batch of every loader, scored against the labels.
    pub fn run<M: SpanPredictor>(model: &M, loaders: &[SpanLoader]) -> Result<EvalReport> {
        let device = model.device().clone();
        let pb = progress_bar(loaders.iter().map(SpanLoader::len).sum(), "batches")?;
        let mut batches = Vec::new();
        for loader in loaders {
            for batch in loader.batches() {
                let batch = batch?.to_device(&device)?;
                let output = model.forward(&batch.input_ids, &batch.attention_mask, None)?;
                let predictions = BatchPredictions {
                    start_pred: argmax(&output.start_logits)?,
                    start_true: to_i64(&batch.start_positions)?,
                    end_pred: argmax(&output.end_logits)?,
                    end_true: to_i64(&batch.end_positions)?,
                };
                debug!(
                    start = predictions.start_accuracy(),
                    end = predictions.end_accuracy(),
                    "evaluated batch {}",
                    batches.len() + 1
                );
                batches.push(predictions);
                pb.inc(1);
            }
        }
        pb.finish_with_message("done");

        if batches.is_empty() {
            bail!(mrc_core::error::Error::NotFound("no batches to evaluate".into()));
        }
        let n = batches.len() as f64;
        let start_sum: f64 = batches.iter().map(BatchPredictions::start_accuracy).sum();
        let end_sum: f64 = batches.iter().map(BatchPredictions::end_accuracy).sum();
        let report = EvalReport {
            accuracy: (start_sum + end_sum) / (2.0 * n),
            start_accuracy: start_sum / n,
            end_accuracy: end_sum / n,
            batches,
        };
        info!(
            "Accuracy {:.4} (start {:.4}, end {:.4}) over {} batches",
            report.accuracy,
            report.start_accuracy,
            report.end_accuracy,
            report.batches.len()
        );
        Ok(report)
    }
}

fn argmax(logits: &Tensor) -> Result<Vec<i64>> {
    let idx = logits.detach().argmax(D::Minus1)?;
    to_i64(&idx)
}

fn to_i64(t: &Tensor) -> Result<Vec<i64>> {
    Ok(t.to_dtype(DType::I64)?.to_device(&Device::Cpu)?.to_vec1::<i64>()?)
}

fn fraction_equal(pred: &[i64], truth: &[i64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = pred.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f64 / truth.len() as f64
}
