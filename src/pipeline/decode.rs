//! Autoregressive frame decoding.
//!
//! ```text
//! Primed ──prime step──▶ Stepping { frames } ──▶ … ──▶ Done(StopReason)
//! ```
//!
//! The prime step runs the whole prompt (with the conditioning slot) and
//! yields the first frame. Each later step feeds the previous frame back,
//! padded to full channel width with the text channel masked off. A frame
//! whose lane 0 holds any id `>= audio_eos_id` ends decoding and is dropped.

use candle_core::{DType, Device, IndexOp, Tensor};

use crate::config::{AUDIO_CHANNELS, GenerationConfig, PARALLEL_CHANNELS};
use crate::model::{Conditioning, FrameRequest, FrameSampler, SequenceModel};
use crate::pipeline::prompt::PackedPrompt;
use crate::{Error, Result};

/// Why decoding ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model emitted the end-of-audio marker.
    EndOfAudio,
    /// The frame budget was used up.
    MaxLength,
}

/// Decoder progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Prompt packed and cache allocated, nothing generated yet.
    Primed,
    /// `frames` frames accepted so far.
    Stepping { frames: usize },
    Done(StopReason),
}

/// Accepted frames of one generation.
#[derive(Debug, Clone)]
pub struct DecodedFrames {
    /// `[AUDIO_CHANNELS, n_frames]` (u32), on the sequence model's device.
    pub frames: Tensor,
    pub stop_reason: StopReason,
}

impl DecodedFrames {
    pub fn len(&self) -> usize {
        self.frames.dim(1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Frame-by-frame decoder over one [`SequenceModel`].
pub struct FrameDecoder<'a, M: SequenceModel> {
    model: &'a mut M,
    config: &'a GenerationConfig,
    max_frames: usize,
    state: DecodeState,
    batch: usize,
    /// Position of the last row fed to the model.
    last_pos: usize,
    /// Latest model output `[batch, AUDIO_CHANNELS]`.
    last_frame: Option<Tensor>,
    /// Accepted frames, lane 0 only, each `[AUDIO_CHANNELS]`.
    frames: Vec<Tensor>,
}

impl<'a, M: SequenceModel> FrameDecoder<'a, M> {
    /// Allocate the model's decode cache for the prompt's batch size.
    pub fn new(
        model: &'a mut M,
        config: &'a GenerationConfig,
        batch: usize,
        max_frames: usize,
    ) -> Result<Self> {
        model
            .setup_caches(batch)
            .map_err(Error::model_execution("setup_caches"))?;
        Ok(Self {
            model,
            config,
            max_frames,
            state: DecodeState::Primed,
            batch,
            last_pos: 0,
            last_frame: None,
            frames: Vec::new(),
        })
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Advance by one model call.
    pub fn step(
        &mut self,
        prompt: &PackedPrompt,
        sampler: &mut FrameSampler,
    ) -> Result<DecodeState> {
        let frame = match self.state {
            DecodeState::Done(_) => return Ok(self.state),
            DecodeState::Primed => self.prime(prompt, sampler)?,
            DecodeState::Stepping { .. } => self.next(sampler)?,
        };

        if self.is_end_of_audio(&frame)? {
            self.state = DecodeState::Done(StopReason::EndOfAudio);
            return Ok(self.state);
        }

        self.frames.push(frame.i(0)?);
        self.last_frame = Some(frame);
        self.state = if self.frames.len() >= self.max_frames {
            DecodeState::Done(StopReason::MaxLength)
        } else {
            DecodeState::Stepping {
                frames: self.frames.len(),
            }
        };
        Ok(self.state)
    }

    /// Stack accepted frames into `[AUDIO_CHANNELS, n_frames]`.
    pub fn finish(self) -> Result<DecodedFrames> {
        let stop_reason = match self.state {
            DecodeState::Done(reason) => reason,
            _ => StopReason::MaxLength,
        };
        let frames = if self.frames.is_empty() {
            Tensor::zeros((AUDIO_CHANNELS, 0), DType::U32, self.model.device())?
        } else {
            Tensor::stack(&self.frames, 1)?
        };
        Ok(DecodedFrames {
            frames,
            stop_reason,
        })
    }

    fn prime(&mut self, prompt: &PackedPrompt, sampler: &mut FrameSampler) -> Result<Tensor> {
        let device = self.model.device().clone();
        let tokens = prompt.tokens.to_device(&device)?;
        let tokens_mask = prompt.tokens_mask.to_device(&device)?;
        let positions = prompt.positions.to_device(&device)?;
        let embeddings = prompt.conditioning.to_device(&device)?;
        self.last_pos = prompt.prompt_len().saturating_sub(1);

        let request = FrameRequest {
            tokens: &tokens,
            tokens_mask: &tokens_mask,
            input_pos: &positions,
            conditioning: Some(Conditioning {
                embeddings: &embeddings,
                starts: &prompt.conditioning_starts,
            }),
        };
        self.call_model(request, sampler)
    }

    fn next(&mut self, sampler: &mut FrameSampler) -> Result<Tensor> {
        let previous = self
            .last_frame
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("decoder stepped before priming".into()))?;
        let device = self.model.device().clone();
        let (tokens, tokens_mask) = pad_audio_frame(previous, self.config.empty_id, &device)?;
        self.last_pos += 1;
        let input_pos = Tensor::full(self.last_pos as u32, (self.batch, 1), &device)?;

        let request = FrameRequest {
            tokens: &tokens,
            tokens_mask: &tokens_mask,
            input_pos: &input_pos,
            conditioning: None,
        };
        self.call_model(request, sampler)
    }

    fn call_model(
        &mut self,
        request: FrameRequest<'_>,
        sampler: &mut FrameSampler,
    ) -> Result<Tensor> {
        let frame = self
            .model
            .generate_frame(request, sampler)
            .map_err(Error::model_execution("generate_frame"))?;
        let dims = frame.dims();
        if dims != [self.batch, AUDIO_CHANNELS] {
            return Err(Error::model_execution("generate_frame")(Error::InvalidInput(
                format!(
                    "expected a frame of shape [{}, {AUDIO_CHANNELS}], got {dims:?}",
                    self.batch
                ),
            )));
        }
        Ok(frame.to_dtype(DType::U32)?)
    }

    fn is_end_of_audio(&self, frame: &Tensor) -> Result<bool> {
        let lane = frame.i(0)?.to_vec1::<u32>()?;
        Ok(lane.iter().any(|&id| id >= self.config.audio_eos_id))
    }
}

/// Widen a `[batch, AUDIO_CHANNELS]` frame to `[batch, 1, P]` with the text
/// channel set to `empty_id`, plus a mask that marks only audio channels live.
pub fn pad_audio_frame(frame: &Tensor, empty_id: u32, device: &Device) -> Result<(Tensor, Tensor)> {
    let batch = frame.dim(0)?;
    let frame = frame.to_device(device)?.to_dtype(DType::U32)?;
    let filler = Tensor::full(empty_id, (batch, 1), device)?;
    let tokens = Tensor::cat(&[&frame, &filler], 1)?.unsqueeze(1)?;

    let live = Tensor::ones((batch, PARALLEL_CHANNELS - 1), DType::U8, device)?;
    let text = Tensor::zeros((batch, 1), DType::U8, device)?;
    let mask = Tensor::cat(&[&live, &text], 1)?.unsqueeze(1)?;
    Ok((tokens, mask))
}

/// Run the full decode loop and release the model's cache afterwards,
/// whether decoding succeeded or not.
pub fn decode<M: SequenceModel>(
    model: &mut M,
    config: &GenerationConfig,
    prompt: &PackedPrompt,
    max_frames: usize,
    sampler: &mut FrameSampler,
) -> Result<DecodedFrames> {
    if max_frames == 0 {
        return Err(Error::InvalidInput("frame budget must be at least 1".into()));
    }
    let result = run(model, config, prompt, max_frames, sampler);
    model.reset_caches();
    result
}

fn run<M: SequenceModel>(
    model: &mut M,
    config: &GenerationConfig,
    prompt: &PackedPrompt,
    max_frames: usize,
    sampler: &mut FrameSampler,
) -> Result<DecodedFrames> {
    let mut decoder = FrameDecoder::new(model, config, prompt.batch_size(), max_frames)?;
    let started = std::time::Instant::now();
    loop {
        match decoder.step(prompt, sampler)? {
            DecodeState::Done(reason) => {
                tracing::info!(
                    frames = decoder.frames.len(),
                    ?reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "decoding finished"
                );
                break;
            }
            DecodeState::Stepping { frames } if frames % 250 == 0 => {
                tracing::debug!(frames, max_frames, "decoding");
            }
            _ => {}
        }
    }
    decoder.finish()
}
