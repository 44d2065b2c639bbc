//! Seedable frame sampling with classifier-free guidance.
//!
//! With guidance active the model runs two lanes: row 0 conditional,
//! row 1 unconditional. Their logits are blended as
//! `uncond + (cond - uncond) * cfg_scale`, one id is sampled per codebook,
//! and that id is written back into both lanes so the lanes stay in step.

use candle_core::{DType, IndexOp, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};

use crate::{Error, Result};

/// Sampling controls for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: usize,
    pub cfg_scale: f64,
}

impl SamplingParams {
    fn sampling(&self) -> Sampling {
        if self.temperature <= 0.0 || self.top_k <= 1 {
            Sampling::ArgMax
        } else {
            Sampling::TopK {
                k: self.top_k,
                temperature: self.temperature,
            }
        }
    }
}

/// Top-k/temperature sampler seeded once per generation.
pub struct FrameSampler {
    processor: LogitsProcessor,
    params: SamplingParams,
}

impl FrameSampler {
    pub fn new(seed: u64, params: SamplingParams) -> Self {
        Self {
            processor: LogitsProcessor::from_sampling(seed, params.sampling()),
            params,
        }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Sample one id from logits `[batch, vocab]`.
    ///
    /// A batch of 2 is blended with [`apply_cfg`] first.
    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = logits.to_dtype(DType::F32)?;
        let guided = match logits.dim(0)? {
            1 => logits.i(0)?,
            2 => apply_cfg(&logits.i(0)?, &logits.i(1)?, self.params.cfg_scale)?,
            n => {
                return Err(Error::InvalidInput(format!(
                    "expected 1 or 2 guidance lanes, got {n}"
                )));
            }
        };
        Ok(self.processor.sample(&guided)?)
    }

    /// Sample a whole frame from logits `[batch, codebooks, vocab]`.
    ///
    /// Returns `[batch, codebooks]` (u32) with the same ids in every lane.
    pub fn sample_frame(&mut self, logits: &Tensor) -> Result<Tensor> {
        let (batch, codebooks, _vocab) = logits.dims3()?;
        let mut ids = Vec::with_capacity(codebooks);
        for codebook in 0..codebooks {
            ids.push(self.sample(&logits.i((.., codebook))?)?);
        }
        let row = Tensor::from_vec(ids, (1, codebooks), logits.device())?;
        Ok(row.repeat((batch, 1))?)
    }
}

/// Blend conditional and unconditional logits.
pub fn apply_cfg(cond: &Tensor, uncond: &Tensor, cfg_scale: f64) -> Result<Tensor> {
    if cfg_scale == 1.0 {
        return Ok(cond.clone());
    }
    let delta = cond.sub(uncond)?.affine(cfg_scale, 0.0)?;
    Ok(uncond.add(&delta)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn params(temperature: f64, top_k: usize, cfg_scale: f64) -> SamplingParams {
        SamplingParams {
            temperature,
            top_k,
            cfg_scale,
        }
    }

    #[test]
    fn test_apply_cfg() {
        let dev = Device::Cpu;
        let cond = Tensor::new(&[2.0f32, 0.0], &dev).unwrap();
        let uncond = Tensor::new(&[1.0f32, 1.0], &dev).unwrap();
        let guided = apply_cfg(&cond, &uncond, 1.5).unwrap();
        let values = guided.to_vec1::<f32>().unwrap();
        // 1 + (2 - 1) * 1.5 = 2.5, 1 + (0 - 1) * 1.5 = -0.5
        assert!((values[0] - 2.5).abs() < 1e-6);
        assert!((values[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_apply_cfg_identity_at_one() {
        let dev = Device::Cpu;
        let cond = Tensor::new(&[3.0f32, -1.0], &dev).unwrap();
        let uncond = Tensor::new(&[0.0f32, 0.0], &dev).unwrap();
        let guided = apply_cfg(&cond, &uncond, 1.0).unwrap();
        assert_eq!(guided.to_vec1::<f32>().unwrap(), vec![3.0, -1.0]);
    }

    #[test]
    fn test_greedy_sampling() {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[0.1f32, 5.0, 0.2]], &dev).unwrap();
        let mut sampler = FrameSampler::new(0, params(0.0, 50, 1.0));
        assert_eq!(sampler.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn test_guidance_can_flip_choice() {
        let dev = Device::Cpu;
        // cond prefers 0 slightly, uncond prefers 0 strongly; guidance pushes to 1.
        let logits = Tensor::new(&[[1.0f32, 0.9], [3.0, 0.0]], &dev).unwrap();
        let mut plain = FrameSampler::new(0, params(0.0, 1, 1.0));
        let mut guided = FrameSampler::new(0, params(0.0, 1, 3.0));
        assert_eq!(plain.sample(&logits.i(0..1).unwrap()).unwrap(), 0);
        // 3 + (1 - 3) * 3 = -3, 0 + (0.9 - 0) * 3 = 2.7
        assert_eq!(guided.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn test_sample_frame_duplicates_lanes() {
        let dev = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (2, 8, 32), &dev).unwrap();
        let mut sampler = FrameSampler::new(7, params(1.0, 8, 1.5));
        let frame = sampler.sample_frame(&logits).unwrap();
        assert_eq!(frame.dims(), &[2, 8]);
        let rows = frame.to_vec2::<u32>().unwrap();
        assert_eq!(rows[0], rows[1]);
        assert!(rows[0].iter().all(|&id| id < 32));
    }

    #[test]
    fn test_same_seed_same_samples() {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((1, 8, 64), DType::F32, &dev).unwrap();
        let draw = |seed| {
            let mut sampler = FrameSampler::new(seed, params(1.0, 50, 1.0));
            (0..4)
                .map(|_| sampler.sample_frame(&logits).unwrap().to_vec2::<u32>().unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn test_rejects_three_lanes() {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((3, 4), DType::F32, &dev).unwrap();
        let mut sampler = FrameSampler::new(0, params(1.0, 2, 1.5));
        assert!(sampler.sample(&logits).is_err());
    }
}
