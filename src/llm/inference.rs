use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::error::{PredictError, Result};
use crate::llm::models::{LoadedModel, SpecialTokens, T5Model};
use crate::llm::sampling::{Sampler, SamplingParams};

/// Decoder loop bounds for one request.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub num_sequences: usize,
    /// Upper bound on decoder tokens per sequence, the start token included.
    pub max_length: usize,
}

/// Tokenize, encode once, sample `num_sequences` independent continuations, decode.
pub fn generate(
    prompt: &str,
    limits: DecodeLimits,
    params: SamplingParams,
    seed: u64,
    tokenizer: &Tokenizer,
    model: &LoadedModel,
) -> Result<Vec<String>> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| PredictError::generation("tokenizing prompt", e))?;
    let device = model.device();
    let input_tensor = Tensor::new(encoding.get_ids(), device)
        .and_then(|t| t.unsqueeze(0))
        .map_err(|e| PredictError::generation("building input ids", e))?;

    let tokens = model.special_tokens();
    let use_cache = model.use_cache();
    let mut sampler = Sampler::new(params, seed);

    let sequences = model.with_session(|session| {
        let encoder_output = session
            .encode(&input_tensor)
            .map_err(|e| PredictError::generation("encoding prompt", e))?;

        let mut sequences = Vec::with_capacity(limits.num_sequences);
        for _ in 0..limits.num_sequences {
            session.clear_kv_cache();
            let ids = sample_sequence(
                session,
                &encoder_output,
                &mut sampler,
                tokens,
                limits.max_length,
                use_cache,
                device,
            )
            .map_err(|e| PredictError::generation("sampling", e))?;
            sequences.push(ids);
        }
        Ok(sequences)
    })?;

    tracing::debug!(
        prompt_tokens = encoding.get_ids().len(),
        lengths = ?sequences.iter().map(Vec::len).collect::<Vec<_>>(),
        "sequences sampled"
    );

    sequences
        .iter()
        .map(|ids| decode(tokenizer, ids, tokens))
        .collect()
}

fn sample_sequence(
    session: &mut T5Model,
    encoder_output: &Tensor,
    sampler: &mut Sampler,
    tokens: SpecialTokens,
    max_length: usize,
    use_cache: bool,
    device: &Device,
) -> candle_core::Result<Vec<u32>> {
    let mut output_ids = vec![tokens.decoder_start];

    while output_ids.len() < max_length {
        // With the cache warm only the newest token goes through the decoder.
        let decoder_input = if output_ids.len() == 1 || !use_cache {
            Tensor::new(output_ids.as_slice(), device)?.unsqueeze(0)?
        } else {
            let last = output_ids[output_ids.len() - 1];
            Tensor::new(&[last], device)?.unsqueeze(0)?
        };

        let logits = session.decode(&decoder_input, encoder_output)?.squeeze(0)?;
        let next_token = sampler.sample(&logits, &output_ids)?;
        output_ids.push(next_token);

        if next_token == tokens.eos {
            break;
        }
    }

    Ok(output_ids)
}

pub fn decode(tokenizer: &Tokenizer, ids: &[u32], tokens: SpecialTokens) -> Result<String> {
    let ids = ids
        .iter()
        .copied()
        .filter(|&id| !tokens.is_special(id))
        .collect::<Vec<_>>();
    tokenizer
        .decode(&ids, true)
        .map_err(|e| PredictError::generation("decoding output", e))
}
