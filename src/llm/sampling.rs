use candle_core::{DType, Result as CandleResult, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_transformers::utils::apply_repeat_penalty;
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f32,
}

/// Stochastic next-token picker: repetition penalty, temperature, top-p, then a draw.
pub struct Sampler {
    params: SamplingParams,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: SamplingParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `logits` is the 1-d score vector of the next position, `context` the tokens
    /// already in the sequence.
    pub fn sample(&mut self, logits: &Tensor, context: &[u32]) -> CandleResult<u32> {
        let logits = logits.to_dtype(DType::F32)?;
        let logits = if self.params.repetition_penalty == 1.0 {
            logits
        } else {
            apply_repeat_penalty(&logits, self.params.repetition_penalty, context)?
        };

        let scaled_logits = (logits / self.params.temperature)?;
        let probs = softmax_last_dim(&scaled_logits)?.to_vec1::<f32>()?;
        let probs = nucleus(probs, self.params.top_p);

        let dist = WeightedIndex::new(&probs).map_err(|e| candle_core::Error::msg(e.to_string()))?;
        Ok(dist.sample(&mut self.rng) as u32)
    }
}

/// Zeroes every probability outside the smallest most-likely prefix whose mass reaches `top_p`.
/// At least one token always survives.
pub fn nucleus(mut probs: Vec<f32>, top_p: f64) -> Vec<f32> {
    if top_p >= 1.0 {
        return probs;
    }

    let mut order = (0..probs.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f64;
    let mut cutoff = order.len();
    for (rank, &idx) in order.iter().enumerate() {
        cumulative += probs[idx] as f64;
        if cumulative >= top_p {
            cutoff = rank + 1;
            break;
        }
    }

    for &idx in &order[cutoff..] {
        probs[idx] = 0.0;
    }
    probs
}
