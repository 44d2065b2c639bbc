//! Configuration for the HeartMuLa generation pipeline.
//!
//! [`GenerationConfig`] mirrors `gen_config.json` shipped with the checkpoint;
//! [`GenerationParams`] carries the per-invocation knobs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Parallel token channels per position: 8 audio codebooks + 1 text channel (last).
pub const PARALLEL_CHANNELS: usize = 9;

/// Audio codebook channels produced per frame.
pub const AUDIO_CHANNELS: usize = PARALLEL_CHANNELS - 1;

/// Dimension of the audio-conditioning embedding slot.
pub const CONDITIONING_DIM: usize = 512;

/// Duration of one generated frame in milliseconds (12.5 Hz).
pub const FRAME_MS: u64 = 80;

/// Output sample rate of the codec model.
pub const SAMPLE_RATE: u32 = 48_000;

/// Special token ids used to lay out the prompt and detect end of audio.
///
/// Loaded once from `gen_config.json`; fields missing from the file keep
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub text_bos_id: u32,
    pub text_eos_id: u32,
    pub audio_eos_id: u32,
    pub empty_id: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            text_bos_id: 128000,
            text_eos_id: 128001,
            audio_eos_id: 8193,
            empty_id: 0,
        }
    }
}

impl GenerationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(?path, ?config, "loaded generation config");
        Ok(config)
    }
}

/// Per-invocation generation parameters.
///
/// Deserializable from task payloads; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Upper bound on generated audio. Each frame covers [`FRAME_MS`].
    pub max_audio_length_ms: u64,
    /// Top-k cutoff for sampling. `0` means greedy.
    pub topk: usize,
    /// Sampling temperature. `<= 0` means greedy.
    pub temperature: f64,
    /// Classifier-free guidance scale. `1.0` disables guidance and batching.
    pub cfg_scale: f64,
    /// Output file. The container is chosen from the extension.
    pub save_path: PathBuf,
    /// Sampling seed. `None` draws a fresh one (reported in the summary).
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_audio_length_ms: 240_000,
            topk: 50,
            temperature: 1.0,
            cfg_scale: 1.5,
            save_path: PathBuf::from("output.ogg"),
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Frame budget derived from `max_audio_length_ms`.
    pub fn max_frames(&self) -> usize {
        (self.max_audio_length_ms / FRAME_MS) as usize
    }

    /// Reject parameter combinations that cannot produce a single frame.
    pub fn validate(&self) -> Result<()> {
        if self.max_frames() == 0 {
            return Err(Error::InvalidInput(format!(
                "max_audio_length_ms must be at least {FRAME_MS}, got {}",
                self.max_audio_length_ms
            )));
        }
        if !self.cfg_scale.is_finite() {
            return Err(Error::InvalidInput(format!(
                "cfg_scale must be finite, got {}",
                self.cfg_scale
            )));
        }
        if !self.temperature.is_finite() {
            return Err(Error::InvalidInput(format!(
                "temperature must be finite, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// CFG batch size: 2 lanes when guidance is active, else 1.
pub fn cfg_batch_size(cfg_scale: f64) -> usize {
    if cfg_scale != 1.0 { 2 } else { 1 }
}
