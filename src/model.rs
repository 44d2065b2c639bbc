//! Model capabilities consumed by the pipeline.
//!
//! The pipeline never looks inside the models. It needs:
//!
//! - [`SequenceModel`]: predicts one multi-channel frame at a time
//! - [`CodecModel`]: turns a frame sequence into a waveform
//! - [`ModelLoader`]: builds either from a checkpoint directory
//!
//! [`sampling`] holds the seedable top-k sampler and CFG logit blending that
//! sequence model implementations use to turn logits into a frame.

pub mod sampling;

use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::Result;
pub use sampling::{FrameSampler, SamplingParams};

/// Audio-conditioning inputs for the prime step.
pub struct Conditioning<'a> {
    /// Conditioning embeddings `[batch, CONDITIONING_DIM]`.
    pub embeddings: &'a Tensor,
    /// Prompt row each embedding replaces, one per batch lane.
    pub starts: &'a [usize],
}

/// Inputs to one [`SequenceModel::generate_frame`] call.
pub struct FrameRequest<'a> {
    /// Tokens `[batch, seq, PARALLEL_CHANNELS]` (u32).
    pub tokens: &'a Tensor,
    /// Live-channel mask, same shape as `tokens` (u8, 1 = live).
    pub tokens_mask: &'a Tensor,
    /// Absolute positions `[batch, seq]` (u32).
    pub input_pos: &'a Tensor,
    /// Present on the prime step only.
    pub conditioning: Option<Conditioning<'a>>,
}

/// Autoregressive multi-channel token model.
pub trait SequenceModel {
    /// Device the model's weights live on.
    fn device(&self) -> &Device;

    /// Allocate the decode cache for `batch_size` lanes.
    fn setup_caches(&mut self, batch_size: usize) -> Result<()>;

    /// Drop the decode cache.
    fn reset_caches(&mut self);

    /// Predict the next frame, `[batch, AUDIO_CHANNELS]` (u32).
    ///
    /// All sampling randomness must come from `sampler`, and guidance is
    /// applied with `sampler.params().cfg_scale`.
    fn generate_frame(
        &mut self,
        request: FrameRequest<'_>,
        sampler: &mut FrameSampler,
    ) -> Result<Tensor>;
}

/// Frame sequence → waveform model.
pub trait CodecModel {
    fn device(&self) -> &Device;

    /// Decode frames `[AUDIO_CHANNELS, n_frames]` into a waveform
    /// `[channels, samples]` at [`SAMPLE_RATE`](crate::config::SAMPLE_RATE).
    fn detokenize(&self, frames: &Tensor) -> Result<Tensor>;
}

/// Builds a model from its checkpoint directory.
pub trait ModelLoader {
    type Model;

    fn load(&self, path: &Path, device: &Device, dtype: DType) -> Result<Self::Model>;
}

impl<F, M> ModelLoader for F
where
    F: Fn(&Path, &Device, DType) -> Result<M>,
{
    type Model = M;

    fn load(&self, path: &Path, device: &Device, dtype: DType) -> Result<M> {
        self(path, device, dtype)
    }
}
