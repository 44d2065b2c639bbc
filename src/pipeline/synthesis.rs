//! Frames → waveform → audio file.

use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::audio::write_audio;
use crate::config::SAMPLE_RATE;
use crate::model::CodecModel;
use crate::{Error, Result};

/// Decoded audio ready for encoding.
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Interleaved samples in [-1, 1].
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_ms(&self) -> u64 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// Run the codec over `frames` `[AUDIO_CHANNELS, n_frames]`.
pub fn detokenize<C: CodecModel>(codec: &C, frames: &Tensor) -> Result<Waveform> {
    if frames.dim(1)? == 0 {
        return Err(Error::InvalidInput(
            "no frames were generated, nothing to synthesize".into(),
        ));
    }
    let frames = frames.to_device(codec.device())?;
    let wav = codec
        .detokenize(&frames)
        .map_err(Error::model_execution("detokenize"))?;
    let (samples, channels) = interleave(&wav)?;
    Ok(Waveform {
        samples,
        channels,
        sample_rate: SAMPLE_RATE,
    })
}

/// Detokenize and write the result to `path`.
pub fn synthesize<C: CodecModel>(codec: &C, frames: &Tensor, path: &Path) -> Result<Waveform> {
    let waveform = detokenize(codec, frames)?;
    write_audio(path, &waveform.samples, waveform.sample_rate, waveform.channels)?;
    tracing::info!(
        ?path,
        duration_ms = waveform.duration_ms(),
        channels = waveform.channels,
        "wrote audio"
    );
    Ok(waveform)
}

/// Flatten a codec waveform into interleaved f32 samples on the CPU.
///
/// Accepts `[samples]`, `[channels, samples]` or `[1, channels, samples]`.
pub fn interleave(wav: &Tensor) -> Result<(Vec<f32>, u16)> {
    let wav = wav.to_dtype(DType::F32)?.to_device(&Device::Cpu)?;
    let wav = match wav.rank() {
        1 => wav.unsqueeze(0)?,
        2 => wav,
        3 if wav.dim(0)? == 1 => wav.squeeze(0)?,
        _ => {
            return Err(Error::Audio(format!(
                "unexpected waveform shape {:?}",
                wav.dims()
            )));
        }
    };
    let channels = wav.dim(0)?;
    let channels = u16::try_from(channels)
        .map_err(|_| Error::Audio(format!("too many audio channels: {channels}")))?;
    let samples = wav.t()?.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
    Ok((samples, channels))
}
