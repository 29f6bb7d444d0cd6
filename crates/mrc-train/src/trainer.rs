use anyhow::{anyhow, Result};
use candle_core::DType;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use std::path::PathBuf;
use tracing::{debug, info};

use mrc_core::error::Error;
use mrc_model::{select_device, BertSpanModel, FreezePolicy, SpanOutput, TrainableSpanModel};

use crate::data::SpanLoader;
use crate::progress_bar;

/// Fixed name of the checkpoint overwritten during a run.
pub const INTERMEDIATE_CHECKPOINT: &str = "intermediate-bert";

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Pretrained model directory, used when no model is supplied.
    pub model_dir: PathBuf,
    pub learning_rate: f64,
    pub freeze: FreezePolicy,
    pub iterations_before_saving_model: usize,
    pub save_model_name: String,
    pub output_path: PathBuf,
}

pub struct TrainOutcome<M> {
    pub model: M,
    pub steps: usize,
    pub last_loss: Option<f32>,
}

pub struct Trainer<'a> {
    options: TrainOptions,
    first_output: Option<Box<dyn FnMut(&SpanOutput) + 'a>>,
}

impl<'a> Trainer<'a> {
    pub fn new(options: TrainOptions) -> Result<Self> {
        if options.iterations_before_saving_model == 0 {
            return Err(Error::InvalidConfig("iterations_before_saving_model must be positive".into()).into());
        }
        if options.learning_rate.is_nan() || options.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!("learning_rate must be positive, got {}", options.learning_rate)).into());
        }
        Ok(Self { options, first_output: None })
    }

    /// Called once, with the output of the very first forward pass.
    pub fn on_first_output(mut self, hook: impl FnMut(&SpanOutput) + 'a) -> Self {
        self.first_output = Some(Box::new(hook));
        self
    }

    /// Initialise from `model_dir` with the configured freeze policy, then train.
    pub fn run_pretrained(&mut self, loaders: &[SpanLoader]) -> Result<TrainOutcome<BertSpanModel>> {
        let device = select_device();
        let model = BertSpanModel::from_pretrained(&self.options.model_dir, self.options.freeze, &device)?;
        self.run(model, loaders)
    }

    /// Train `model` over every loader in order, checkpointing as configured.
    ///
    /// The model's own device is used; batches are moved onto it.
    pub fn run<M: TrainableSpanModel>(&mut self, model: M, loaders: &[SpanLoader]) -> Result<TrainOutcome<M>> {
        let device = model.device().clone();
        let vars = model.trainable_vars()?;
        info!("Training {} variables over {} loaders (lr={})", vars.len(), loaders.len(), self.options.learning_rate);
        let mut optimizer = AdamW::new(vars, adamw_params(self.options.learning_rate))?;

        let pb = progress_bar(loaders.iter().map(SpanLoader::len).sum(), "batches")?;
        let mut steps = 0;
        let mut last_loss = None;
        for (i, loader) in loaders.iter().enumerate() {
            for batch in loader.batches() {
                let batch = batch?.to_device(&device)?;
                let output = model.forward(
                    &batch.input_ids,
                    &batch.attention_mask,
                    Some((&batch.start_positions, &batch.end_positions)),
                )?;
                if let Some(mut hook) = self.first_output.take() {
                    hook(&output);
                }
                let loss = output.loss.as_ref().ok_or_else(|| anyhow!("model returned no loss for a labelled batch"))?;
                let grads = loss.backward()?;
                optimizer.step(&grads)?;

                let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
                debug!(loader = i + 1, step = steps, loss = value, "train step");
                last_loss = Some(value);
                steps += 1;
                pb.inc(1);
            }
            if saves_intermediate(i, self.options.iterations_before_saving_model) {
                let path = model.save(&self.options.output_path, INTERMEDIATE_CHECKPOINT)?;
                info!("Saved intermediate checkpoint after loader {} to {}", i + 1, path.display());
            }
        }
        pb.finish_with_message("done");

        let path = model.save(&self.options.output_path, &self.options.save_model_name)?;
        info!("Saved final model to {} after {} steps", path.display(), steps);
        Ok(TrainOutcome { model, steps, last_loss })
    }
}

/// AdamW without weight decay, `eps = 1e-6`.
pub fn adamw_params(lr: f64) -> ParamsAdamW {
    ParamsAdamW { lr, weight_decay: 0.0, eps: 1e-6, ..Default::default() }
}

/// After loader 0 and after every loader whose 1-based index is a multiple of `every`.
pub fn saves_intermediate(loader_index: usize, every: usize) -> bool {
    loader_index == 0 || (loader_index + 1) % every == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intermediate_checkpoint_cadence() {
        let saved: Vec<usize> = (0..7).filter(|&i| saves_intermediate(i, 3)).collect();
        assert_eq!(saved, vec![0, 2, 5]);
        assert!((0..4).all(|i| saves_intermediate(i, 1)));
    }

    #[test]
    fn optimizer_has_no_weight_decay() {
        let params = adamw_params(3e-5);
        assert_eq!(params.weight_decay, 0.0);
        assert!((params.lr - 3e-5).abs() < f64::EPSILON);
        assert!((params.eps - 1e-6).abs() < f64::EPSILON);
    }
}
