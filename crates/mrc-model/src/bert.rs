use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::encoder::{BertConfig, BertEncoder};
use crate::freeze::FreezePolicy;
use crate::loss::span_loss;
use crate::{SpanOutput, SpanPredictor, TrainableSpanModel};

pub const CONFIG_FILE: &str = "config.json";
pub const CHECKPOINT_EXTENSION: &str = "safetensors";

pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{CHECKPOINT_EXTENSION}"))
}

/// BERT encoder (`bert.*`) plus the `qa_outputs` span head, the layout of
/// question-answering BERT checkpoints.
pub struct BertSpanModel {
    bert: BertEncoder,
    qa_outputs: Linear,
    config: serde_json::Value,
    device: Device,
    // None for read-only checkpoints.
    vars: Option<VarMap>,
    freeze: FreezePolicy,
}

impl BertSpanModel {
    /// Randomly initialised, trainable model for the given `config.json` contents.
    pub fn from_config(config: serde_json::Value, freeze: FreezePolicy, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let (bert, qa_outputs) = build(&config, vb)?;
        Ok(Self { bert, qa_outputs, config, device: device.clone(), vars: Some(varmap), freeze })
    }

    /// Trainable model initialised from a pretrained model directory.
    ///
    /// Reads `config.json` and `model.safetensors` (or `pytorch_model.bin`). Parameters
    /// the checkpoint lacks, typically the span head, keep their random init.
    pub fn from_pretrained(model_dir: &Path, freeze: FreezePolicy, device: &Device) -> Result<Self> {
        info!("Loading pretrained model from {}", model_dir.display());
        let config = read_config(model_dir)?;
        let model = Self::from_config(config, freeze, device)?;
        let weights = read_pretrained_weights(model_dir, device)?;
        model.copy_weights(&weights)?;
        info!("Freeze policy: {:?}", freeze);
        Ok(model)
    }

    /// Read-only model from a checkpoint written by [`TrainableSpanModel::save`].
    pub fn load_checkpoint(dir: &Path, name: &str, device: &Device) -> Result<Self> {
        let config = read_config(dir)?;
        let path = checkpoint_path(dir, name);
        let tensors = candle_core::safetensors::load(&path, device)
            .with_context(|| format!("Failed to load checkpoint {}", path.display()))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let (bert, qa_outputs) = build(&config, vb)?;
        info!("Loaded checkpoint {}", path.display());
        Ok(Self { bert, qa_outputs, config, device: device.clone(), vars: None, freeze: FreezePolicy::None })
    }

    pub fn freeze_policy(&self) -> FreezePolicy { self.freeze }

    /// Number of parameter tensors, frozen or not. Zero for read-only models.
    pub fn var_count(&self) -> Result<usize> {
        match &self.vars {
            Some(vars) => Ok(lock(vars)?.len()),
            None => Ok(0),
        }
    }

    fn copy_weights(&self, weights: &HashMap<String, Tensor>) -> Result<()> {
        let vars = self.vars.as_ref().ok_or_else(|| anyhow!("model is read-only"))?;
        let vars = lock(vars)?;
        let mut missing = Vec::new();
        for (name, var) in vars.iter() {
            match lookup(weights, name) {
                Some(tensor) => {
                    let tensor = tensor.to_dtype(DType::F32)?.to_device(&self.device)?;
                    var.set(&tensor).with_context(|| format!("Pretrained tensor {name} does not fit"))?;
                }
                None => missing.push(name.as_str()),
            }
        }
        missing.sort_unstable();
        for name in &missing {
            warn!("No pretrained tensor for {name}, keeping random init");
        }
        info!("Copied {} pretrained tensors", vars.len() - missing.len());
        Ok(())
    }
}

impl SpanPredictor for BertSpanModel {
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        positions: Option<(&Tensor, &Tensor)>,
    ) -> Result<SpanOutput> {
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.bert.forward(input_ids, &token_type_ids, attention_mask)?;
        let logits = self.qa_outputs.forward(&hidden)?;
        let start_logits = logits.narrow(2, 0, 1)?.squeeze(2)?.contiguous()?;
        let end_logits = logits.narrow(2, 1, 1)?.squeeze(2)?.contiguous()?;
        let loss = positions
            .map(|(start, end)| span_loss(&start_logits, &end_logits, start, end))
            .transpose()?;
        Ok(SpanOutput { loss, start_logits, end_logits })
    }

    fn device(&self) -> &Device { &self.device }
}

impl TrainableSpanModel for BertSpanModel {
    fn trainable_vars(&self) -> Result<Vec<Var>> {
        let vars = self.vars.as_ref().ok_or_else(|| anyhow!("model was loaded read-only"))?;
        let vars = lock(vars)?;
        let mut named: Vec<(&String, &Var)> = vars.iter().filter(|(name, _)| !self.freeze.is_frozen(name)).collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
    }

    fn save(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        let Some(vars) = &self.vars else { bail!("model was loaded read-only") };
        fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
        let path = checkpoint_path(dir, name);
        vars.save(&path).with_context(|| format!("Failed to save checkpoint {}", path.display()))?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&self.config)?)?;
        Ok(path)
    }
}

fn build(config: &serde_json::Value, vb: VarBuilder) -> Result<(BertEncoder, Linear)> {
    let bert_config: BertConfig = serde_json::from_value(config.clone()).context("Invalid BERT config")?;
    let bert = BertEncoder::load(&bert_config, vb.pp("bert"))?;
    let qa_outputs = candle_nn::linear(bert_config.hidden_size, 2, vb.pp("qa_outputs"))?;
    Ok((bert, qa_outputs))
}

fn read_config(dir: &Path) -> Result<serde_json::Value> {
    let path = dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn read_pretrained_weights(dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = dir.join("model.safetensors");
    if safetensors.exists() {
        return candle_core::safetensors::load(&safetensors, device)
            .with_context(|| format!("Failed to read {}", safetensors.display()));
    }
    let pickle = dir.join("pytorch_model.bin");
    if pickle.exists() {
        let weights = candle_core::pickle::read_all(&pickle)
            .with_context(|| format!("Failed to read {}", pickle.display()))?;
        return Ok(weights.into_iter().collect());
    }
    bail!(mrc_core::error::Error::NotFound(format!("no model.safetensors or pytorch_model.bin in {}", dir.display())))
}

/// Checkpoint tensor for a variable, accepting legacy `gamma`/`beta` layer-norm names
/// and encoder-only checkpoints without the `bert.` prefix.
fn lookup<'a>(weights: &'a HashMap<String, Tensor>, name: &str) -> Option<&'a Tensor> {
    let legacy = name
        .strip_suffix("LayerNorm.weight")
        .map(|p| format!("{p}LayerNorm.gamma"))
        .or_else(|| name.strip_suffix("LayerNorm.bias").map(|p| format!("{p}LayerNorm.beta")));
    let mut candidates = vec![name.to_string()];
    candidates.extend(legacy);
    let unprefixed: Vec<String> = candidates.iter().filter_map(|c| c.strip_prefix("bert.").map(str::to_string)).collect();
    candidates.extend(unprefixed);
    candidates.iter().find_map(|c| weights.get(c))
}

fn lock(vars: &VarMap) -> Result<std::sync::MutexGuard<'_, HashMap<String, Var>>> {
    vars.data().lock().map_err(|_| anyhow!("variable map lock poisoned"))
}
