//! On-load 8-bit quantization of a safetensors checkpoint into an in-memory GGUF image.

use std::io::Cursor;
use std::path::PathBuf;

use candle_core::quantized::{gguf_file, GgmlDType, QTensor};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device};

use crate::error::{PredictError, Result};

pub const WEIGHT_DTYPE: GgmlDType = GgmlDType::Q8_0;

/// Matrices whose rows split into whole blocks get 8-bit storage, everything else
/// (norm scales, relative attention buckets) stays in f32.
pub fn target_dtype(dims: &[usize]) -> GgmlDType {
    match dims {
        [_, cols] if cols % WEIGHT_DTYPE.block_size() == 0 => WEIGHT_DTYPE,
        _ => GgmlDType::F32,
    }
}

pub fn quantize_checkpoint(files: &[PathBuf]) -> Result<Vec<u8>> {
    let weights = unsafe { MmapedSafetensors::multi(files) }
        .map_err(|e| PredictError::load("opening checkpoint for quantization", e))?;

    let mut names = weights
        .tensors()
        .into_iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    names.sort();

    let mut quantized = Vec::with_capacity(names.len());
    for name in &names {
        let tensor = weights
            .load(name, &Device::Cpu)
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(|e| PredictError::load(name, e))?;
        let qtensor = QTensor::quantize(&tensor, target_dtype(tensor.dims()))
            .map_err(|e| PredictError::load(format!("quantizing {name}"), e))?;
        quantized.push((name.as_str(), qtensor));
    }

    tracing::debug!(tensors = quantized.len(), "checkpoint quantized");

    let refs = quantized
        .iter()
        .map(|(name, qtensor)| (*name, qtensor))
        .collect::<Vec<_>>();
    let mut buffer = Cursor::new(Vec::new());
    gguf_file::write(&mut buffer, &[], &refs)
        .map_err(|e| PredictError::load("writing quantized weights", e))?;
    Ok(buffer.into_inner())
}
