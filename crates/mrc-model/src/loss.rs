use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// Cross-entropy of `(batch, seq_len)` logits against one target position per row.
///
/// Positions are clamped to `[0, seq_len]`; rows whose clamped position equals
/// `seq_len` are ignored. A `-1` label therefore trains towards position 0.
pub fn span_cross_entropy(logits: &Tensor, positions: &Tensor) -> Result<Tensor> {
    let (_, seq_len) = logits.dims2()?;
    let limit = i64::try_from(seq_len)?;
    let targets: Vec<i64> = positions.to_dtype(DType::I64)?.to_device(&candle_core::Device::Cpu)?.to_vec1()?;

    let mut index = Vec::with_capacity(targets.len());
    let mut keep = Vec::with_capacity(targets.len());
    for t in targets {
        let t = t.clamp(0, limit);
        let ignored = t == limit;
        index.push(u32::try_from(if ignored { 0 } else { t })?);
        keep.push(if ignored { 0f32 } else { 1f32 });
    }
    let kept: f32 = keep.iter().sum();

    let rows = index.len();
    let device = logits.device();
    let index = Tensor::from_vec(index, (rows, 1), device)?;
    let keep = Tensor::from_vec(keep, rows, device)?;
    let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    let picked = log_probs.gather(&index, 1)?.squeeze(1)?;
    let total = (picked * keep)?.sum_all()?;
    if kept == 0.0 {
        return Ok((total * 0.0)?);
    }
    Ok(total.affine(-1.0 / f64::from(kept), 0.0)?)
}

/// Mean of the start and end cross-entropies.
pub fn span_loss(start_logits: &Tensor, end_logits: &Tensor, start_positions: &Tensor, end_positions: &Tensor) -> Result<Tensor> {
    let start = span_cross_entropy(start_logits, start_positions)?;
    let end = span_cross_entropy(end_logits, end_positions)?;
    Ok(((start + end)? * 0.5)?)
}
