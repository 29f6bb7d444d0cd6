use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use std::path::Path;
use tracing::info;

use mrc_core::error::Error;
use mrc_core::AnnotatedEncoding;

#[derive(Debug, Clone)]
struct Row {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
    start_position: i64,
    end_position: i64,
}

/// Labelled records flattened out of their encodings, in order.
#[derive(Debug, Clone, Default)]
pub struct SpanDataset {
    rows: Vec<Row>,
}

impl SpanDataset {
    pub fn from_encodings(encodings: Vec<AnnotatedEncoding>) -> Self {
        let rows = encodings
            .iter()
            .flat_map(|e| e.records())
            .map(|r| Row {
                input_ids: r.input_ids.to_vec(),
                attention_mask: r.attention_mask.to_vec(),
                start_position: r.start_position,
                end_position: r.end_position,
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

/// One batch of tensors on the CPU: ids and mask are `u32 (b, t)`, positions `i64 (b)`.
#[derive(Debug, Clone)]
pub struct SpanBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub start_positions: Tensor,
    pub end_positions: Tensor,
}

impl SpanBatch {
    fn from_rows(rows: &[Row]) -> Result<Self> {
        let b = rows.len();
        let t = rows.first().map_or(0, |r| r.input_ids.len());
        let ids: Vec<u32> = rows.iter().flat_map(|r| r.input_ids.iter().copied()).collect();
        let mask: Vec<u32> = rows.iter().flat_map(|r| r.attention_mask.iter().copied()).collect();
        let starts: Vec<i64> = rows.iter().map(|r| r.start_position).collect();
        let ends: Vec<i64> = rows.iter().map(|r| r.end_position).collect();
        Ok(Self {
            input_ids: Tensor::from_vec(ids, (b, t), &Device::Cpu).context("rows differ in length")?,
            attention_mask: Tensor::from_vec(mask, (b, t), &Device::Cpu).context("rows differ in length")?,
            start_positions: Tensor::from_vec(starts, b, &Device::Cpu)?,
            end_positions: Tensor::from_vec(ends, b, &Device::Cpu)?,
        })
    }

    pub fn len(&self) -> usize { self.start_positions.dims().first().copied().unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            input_ids: self.input_ids.to_device(device)?,
            attention_mask: self.attention_mask.to_device(device)?,
            start_positions: self.start_positions.to_device(device)?,
            end_positions: self.end_positions.to_device(device)?,
        })
    }
}

/// Sequential, re-iterable batches over a dataset.
#[derive(Debug, Clone)]
pub struct SpanLoader {
    dataset: SpanDataset,
    batch_size: usize,
}

impl SpanLoader {
    pub fn new(dataset: SpanDataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("loader batch_size must be positive".into()).into());
        }
        Ok(Self { dataset, batch_size })
    }

    /// Number of batches.
    pub fn len(&self) -> usize { self.dataset.len().div_ceil(self.batch_size) }

    pub fn is_empty(&self) -> bool { self.dataset.is_empty() }

    pub fn batches(&self) -> impl Iterator<Item = Result<SpanBatch>> + '_ {
        self.dataset.rows.chunks(self.batch_size).map(SpanBatch::from_rows)
    }
}

/// One loader per persisted `{prefix}_{n}` artifact under `dir`, in artifact order.
pub fn load_split_loaders(dir: &Path, prefix: &str, batch_size: usize) -> Result<Vec<SpanLoader>> {
    let loaders = mrc_encode::read_split(dir, prefix)?
        .into_iter()
        .map(|encodings| SpanLoader::new(SpanDataset::from_encodings(encodings), batch_size))
        .collect::<Result<Vec<_>>>()?;
    let rows: usize = loaders.iter().map(|l| l.dataset.len()).sum();
    info!("Loaded {} '{}' loaders with {} records", loaders.len(), prefix, rows);
    Ok(loaders)
}
