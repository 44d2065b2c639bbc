//! Stub tokenizer, models and loaders shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};

use crate::config::{AUDIO_CHANNELS, GenerationConfig};
use crate::model::{CodecModel, FrameRequest, FrameSampler, ModelLoader, SequenceModel};
use crate::text::TextTokenizer;
use crate::{Error, Result};

/// One id per character; never emits bos/eos.
pub struct StubTokenizer;

impl TextTokenizer for StubTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(|c| c as u32).collect())
    }
}

/// What the stub sequence model was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SequenceLog {
    pub cache_batch: Vec<usize>,
    pub resets: usize,
    pub frame_calls: usize,
    pub token_dims: Vec<Vec<usize>>,
    /// First position of lane 0 per call.
    pub positions: Vec<usize>,
    pub conditioned: Vec<bool>,
}

/// Samples from flat logits; optionally emits the end-of-audio marker or fails.
pub struct StubSequenceModel {
    device: Device,
    vocab: usize,
    audio_eos_id: u32,
    stop_at_call: Option<usize>,
    fail_at_call: Option<usize>,
    cache: Option<usize>,
    log: Arc<Mutex<SequenceLog>>,
}

impl StubSequenceModel {
    fn build(stop_at_call: Option<usize>, fail_at_call: Option<usize>) -> Self {
        Self {
            device: Device::Cpu,
            vocab: 32,
            audio_eos_id: GenerationConfig::default().audio_eos_id,
            stop_at_call,
            fail_at_call,
            cache: None,
            log: Arc::default(),
        }
    }

    pub fn never_stops() -> Self {
        Self::build(None, None)
    }

    /// The call with index `calls` (0 = prime) returns the marker.
    pub fn stops_after(calls: usize) -> Self {
        Self::build(Some(calls), None)
    }

    pub fn fails_at(call: usize) -> Self {
        Self::build(None, Some(call))
    }

    pub fn log(&self) -> SequenceLog {
        self.log.lock().unwrap().clone()
    }
}

impl SequenceModel for StubSequenceModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn setup_caches(&mut self, batch_size: usize) -> Result<()> {
        self.cache = Some(batch_size);
        self.log.lock().unwrap().cache_batch.push(batch_size);
        Ok(())
    }

    fn reset_caches(&mut self) {
        self.cache = None;
        self.log.lock().unwrap().resets += 1;
    }

    fn generate_frame(
        &mut self,
        request: FrameRequest<'_>,
        sampler: &mut FrameSampler,
    ) -> Result<Tensor> {
        let batch = self
            .cache
            .ok_or_else(|| Error::InvalidInput("caches not set up".into()))?;
        let call = {
            let mut log = self.log.lock().unwrap();
            log.frame_calls += 1;
            log.token_dims.push(request.tokens.dims().to_vec());
            log.positions
                .push(request.input_pos.flatten_all()?.to_vec1::<u32>()?[0] as usize);
            log.conditioned.push(request.conditioning.is_some());
            log.frame_calls - 1
        };
        if request.tokens.dim(0)? != batch {
            return Err(Error::InvalidInput("batch does not match cache".into()));
        }
        if self.fail_at_call == Some(call) {
            return Err(Error::Candle(candle_core::Error::Msg("stub failure".into())));
        }
        if self.stop_at_call == Some(call) {
            return Ok(Tensor::full(self.audio_eos_id, (batch, AUDIO_CHANNELS), &self.device)?);
        }
        let logits = Tensor::zeros((batch, AUDIO_CHANNELS, self.vocab), DType::F32, &self.device)?;
        sampler.sample_frame(&logits)
    }
}

/// What the stub codec was asked to decode.
#[derive(Debug, Clone, Default)]
pub struct CodecLog {
    pub frame_dims: Vec<Vec<usize>>,
}

/// Produces 16 stereo samples per frame.
pub struct StubCodec {
    device: Device,
    fail: bool,
    log: Arc<Mutex<CodecLog>>,
}

impl Default for StubCodec {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            fail: false,
            log: Arc::default(),
        }
    }
}

impl StubCodec {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn log(&self) -> CodecLog {
        self.log.lock().unwrap().clone()
    }
}

impl CodecModel for StubCodec {
    fn device(&self) -> &Device {
        &self.device
    }

    fn detokenize(&self, frames: &Tensor) -> Result<Tensor> {
        self.log.lock().unwrap().frame_dims.push(frames.dims().to_vec());
        if self.fail {
            return Err(Error::Candle(candle_core::Error::Msg("codec failure".into())));
        }
        let n_frames = frames.dim(1)?;
        Ok((Tensor::ones((2, n_frames * 16), DType::F32, &self.device)? * 0.25)?)
    }
}

/// Builds models from a factory and counts every build.
pub struct CountingLoader<M> {
    factory: Box<dyn Fn() -> M + Send>,
    loads: Arc<AtomicUsize>,
    dtypes: Arc<Mutex<Vec<DType>>>,
}

impl<M> CountingLoader<M> {
    pub fn new(factory: impl Fn() -> M + Send + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            loads: Arc::default(),
            dtypes: Arc::default(),
        }
    }

    pub fn loads(&self) -> Arc<AtomicUsize> {
        self.loads.clone()
    }

    pub fn dtypes(&self) -> Arc<Mutex<Vec<DType>>> {
        self.dtypes.clone()
    }
}

impl<M> ModelLoader for CountingLoader<M> {
    type Model = M;

    fn load(&self, _path: &Path, _device: &Device, dtype: DType) -> Result<M> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.dtypes.lock().unwrap().push(dtype);
        Ok((self.factory)())
    }
}

/// Minimal word-level `tokenizer.json`.
pub const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"[UNK]": 0, "pop": 1, "la": 2, "upbeat": 3, ",": 4},
    "unk_token": "[UNK]"
  }
}"#;

/// Word-level `tokenizer.json` whose post-processor adds `<|bos|>` (5) and `<|eos|>` (6).
pub const BOS_EOS_TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 5, "content": "<|bos|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 6, "content": "<|eos|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": {
    "type": "TemplateProcessing",
    "single": [
      {"SpecialToken": {"id": "<|bos|>", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "<|eos|>", "type_id": 0}}
    ],
    "pair": [
      {"SpecialToken": {"id": "<|bos|>", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"Sequence": {"id": "B", "type_id": 1}},
      {"SpecialToken": {"id": "<|eos|>", "type_id": 1}}
    ],
    "special_tokens": {
      "<|bos|>": {"id": "<|bos|>", "ids": [5], "tokens": ["<|bos|>"]},
      "<|eos|>": {"id": "<|eos|>", "ids": [6], "tokens": ["<|eos|>"]}
    }
  },
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"[UNK]": 0, "pop": 1, "la": 2, "upbeat": 3, ",": 4, "<|bos|>": 5, "<|eos|>": 6},
    "unk_token": "[UNK]"
  }
}"#;

/// Create a complete checkpoint layout for version `3B` under `root`.
pub fn write_checkpoint(root: &Path) {
    write_checkpoint_with(root, TOKENIZER_JSON, &GenerationConfig::default());
}

/// Same layout with a custom tokenizer and generation config.
pub fn write_checkpoint_with(root: &Path, tokenizer_json: &str, config: &GenerationConfig) {
    std::fs::create_dir_all(root.join("HeartMuLa-oss-3B")).unwrap();
    std::fs::create_dir_all(root.join("HeartCodec-oss")).unwrap();
    std::fs::write(root.join("tokenizer.json"), tokenizer_json).unwrap();
    std::fs::write(
        root.join("gen_config.json"),
        serde_json::to_string(config).unwrap(),
    )
    .unwrap();
}
