//! Prompt packing: tags + conditioning slot + lyrics → multi-channel tokens.
//!
//! Layout of one lane (`P = PARALLEL_CHANNELS`, text in the last channel):
//!
//! ```text
//! row            ch 0..P-1 (audio)   ch P-1 (text)   mask
//! 0              empty               <bos>           0…0 1
//! …              empty               tag ids         0…0 1
//! n_tags-1       empty               <eos>           0…0 1
//! n_tags         empty               empty           0…0 1   ← conditioning slot
//! n_tags+1       empty               <bos>           0…0 1
//! …              empty               lyric ids       0…0 1
//! last           empty               <eos>           0…0 1
//! ```
//!
//! With guidance active every tensor carries two identical lanes.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};

use crate::config::{CONDITIONING_DIM, GenerationConfig, PARALLEL_CHANNELS, cfg_batch_size};
use crate::text::{TextTokenizer, read_text_or_file};
use crate::{Error, Result};

const TAG_OPEN: &str = "<tag>";
const TAG_CLOSE: &str = "</tag>";

/// What to sing and how it should sound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationInputs {
    /// Style tags, e.g. `"pop, upbeat"`, or a path to a file holding them.
    pub tags: String,
    /// Lyrics text, or a path to a file holding it.
    pub lyrics: String,
    /// Reference audio for timbre conditioning. Not supported by this pipeline.
    pub reference_audio: Option<PathBuf>,
}

impl GenerationInputs {
    pub fn new(tags: impl Into<String>, lyrics: impl Into<String>) -> Self {
        Self {
            tags: tags.into(),
            lyrics: lyrics.into(),
            reference_audio: None,
        }
    }
}

/// CFG-batched prompt ready for the prime step.
#[derive(Debug, Clone)]
pub struct PackedPrompt {
    /// `[batch, prompt_len, P]` (u32).
    pub tokens: Tensor,
    /// `[batch, prompt_len, P]` (u8, 1 = live).
    pub tokens_mask: Tensor,
    /// `[batch, CONDITIONING_DIM]`, all zeros.
    pub conditioning: Tensor,
    /// Conditioning row per lane.
    pub conditioning_starts: Vec<usize>,
    /// `[batch, prompt_len]` (u32).
    pub positions: Tensor,
    /// Wrapped tag ids (one lane).
    pub tag_ids: Vec<u32>,
    /// Wrapped lyric ids (one lane).
    pub lyric_ids: Vec<u32>,
}

impl PackedPrompt {
    pub fn batch_size(&self) -> usize {
        self.conditioning_starts.len()
    }

    pub fn prompt_len(&self) -> usize {
        self.tag_ids.len() + 1 + self.lyric_ids.len()
    }
}

/// Builds [`PackedPrompt`]s with a tokenizer and the checkpoint's special ids.
pub struct PromptPacker<'a, T: TextTokenizer + ?Sized> {
    tokenizer: &'a T,
    config: &'a GenerationConfig,
}

impl<'a, T: TextTokenizer + ?Sized> PromptPacker<'a, T> {
    pub fn new(tokenizer: &'a T, config: &'a GenerationConfig) -> Self {
        Self { tokenizer, config }
    }

    /// Pack `inputs` for a given guidance scale.
    ///
    /// `conditioning_dtype` should match the sequence model's precision.
    pub fn pack(
        &self,
        inputs: &GenerationInputs,
        cfg_scale: f64,
        conditioning_dtype: DType,
    ) -> Result<PackedPrompt> {
        if let Some(reference) = &inputs.reference_audio {
            return Err(Error::Unsupported(format!(
                "reference audio conditioning ({}) is not supported",
                reference.display()
            )));
        }

        let tags = wrap_tags(&read_text_or_file(&inputs.tags)?.to_lowercase());
        let tag_ids = self.encode_wrapped(&tags)?;

        let lyrics = read_text_or_file(&inputs.lyrics)?.to_lowercase();
        let lyric_ids = self.encode_wrapped(&lyrics)?;

        let batch = cfg_batch_size(cfg_scale);
        let conditioning_start = tag_ids.len();
        let prompt_len = tag_ids.len() + 1 + lyric_ids.len();
        tracing::debug!(
            tag_tokens = tag_ids.len(),
            lyric_tokens = lyric_ids.len(),
            prompt_len,
            batch,
            "packed prompt"
        );

        let dev = Device::Cpu;
        let mut tokens = vec![self.config.empty_id; prompt_len * PARALLEL_CHANNELS];
        let text_channel = PARALLEL_CHANNELS - 1;
        for (row, &id) in tag_ids.iter().enumerate() {
            tokens[row * PARALLEL_CHANNELS + text_channel] = id;
        }
        for (offset, &id) in lyric_ids.iter().enumerate() {
            let row = conditioning_start + 1 + offset;
            tokens[row * PARALLEL_CHANNELS + text_channel] = id;
        }
        let tokens = Tensor::from_vec(tokens, (prompt_len, PARALLEL_CHANNELS), &dev)?;

        let mut mask = vec![0u8; prompt_len * PARALLEL_CHANNELS];
        for row in 0..prompt_len {
            mask[row * PARALLEL_CHANNELS + text_channel] = 1;
        }
        let tokens_mask = Tensor::from_vec(mask, (prompt_len, PARALLEL_CHANNELS), &dev)?;

        let conditioning = Tensor::zeros(CONDITIONING_DIM, conditioning_dtype, &dev)?;
        let positions = Tensor::arange(0u32, prompt_len as u32, &dev)?;

        Ok(PackedPrompt {
            tokens: cfg_batch(&tokens, batch)?,
            tokens_mask: cfg_batch(&tokens_mask, batch)?,
            conditioning: cfg_batch(&conditioning, batch)?,
            conditioning_starts: vec![conditioning_start; batch],
            positions: cfg_batch(&positions, batch)?,
            tag_ids,
            lyric_ids,
        })
    }

    /// Tokenize and make sure the ids start with bos and end with eos.
    fn encode_wrapped(&self, text: &str) -> Result<Vec<u32>> {
        let ids = self.tokenizer.encode(text).map_err(|e| match e {
            Error::Tokenizer(inner) => {
                Error::InvalidInput(format!("cannot tokenize input: {inner}"))
            }
            other => other,
        })?;
        Ok(wrap_ids(ids, self.config.text_bos_id, self.config.text_eos_id))
    }
}

/// Surround tags with `<tag>`/`</tag>` unless already present.
pub fn wrap_tags(tags: &str) -> String {
    let mut wrapped = String::with_capacity(tags.len() + TAG_OPEN.len() + TAG_CLOSE.len());
    if !tags.starts_with(TAG_OPEN) {
        wrapped.push_str(TAG_OPEN);
    }
    wrapped.push_str(tags);
    if !tags.ends_with(TAG_CLOSE) {
        wrapped.push_str(TAG_CLOSE);
    }
    wrapped
}

/// Prepend `bos` / append `eos` unless they are already the first / last id.
pub fn wrap_ids(mut ids: Vec<u32>, bos: u32, eos: u32) -> Vec<u32> {
    if ids.first() != Some(&bos) {
        ids.insert(0, bos);
    }
    if ids.last() != Some(&eos) {
        ids.push(eos);
    }
    ids
}

/// Add a leading batch dimension, duplicated when guidance is active.
fn cfg_batch(tensor: &Tensor, batch: usize) -> Result<Tensor> {
    let tensor = tensor.unsqueeze(0)?;
    if batch == 1 {
        return Ok(tensor);
    }
    Ok(Tensor::cat(&[&tensor, &tensor], 0)?)
}
