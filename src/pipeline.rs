//! End-to-end lyrics + tags → audio pipeline.
//!
//! ```text
//! tags, lyrics ─▶ PromptPacker ─▶ FrameDecoder ─▶ synthesize ─▶ file
//!                                  (sequence)      (codec)
//! ```
//!
//! [`HeartMulaPipeline`] resolves the checkpoint layout, plans devices and
//! owns the [`Residency`] of both models. Each phase acquires its model
//! through a scoped call, so lazy release happens on failure paths too.

pub mod decode;
pub mod prompt;
pub mod synthesis;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokenizers::Tokenizer;

use crate::checkpoint::CheckpointPaths;
use crate::config::{GenerationConfig, GenerationParams};
use crate::device::{DeviceKind, DevicePlan, DeviceSpec, ModelRole, PrecisionSpec, plan};
use crate::model::{CodecModel, FrameSampler, ModelLoader, SamplingParams, SequenceModel};
use crate::residency::Residency;
use crate::text::{TextTokenizer, load_tokenizer};
use crate::{Error, Result};

pub use decode::{DecodedFrames, StopReason};
pub use prompt::{GenerationInputs, PackedPrompt, PromptPacker};
pub use synthesis::Waveform;

/// How to build a pipeline from a checkpoint root.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub device: DeviceSpec,
    pub precision: PrecisionSpec,
    /// Sequence model version, e.g. `3B`.
    pub version: String,
    /// Load each model only for the phase that needs it.
    pub lazy_load: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            device: DeviceSpec::Single(DeviceKind::Cpu),
            precision: PrecisionSpec::default(),
            version: "3B".to_string(),
            lazy_load: false,
        }
    }
}

/// What one successful generation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub stop_reason: StopReason,
    pub duration_ms: u64,
    pub sample_rate: u32,
    /// Seed actually used, drawn at random when the caller gave none.
    pub seed: u64,
}

/// Resident tokenizer and config plus the two models' residency.
pub struct HeartMulaPipeline<S: ModelLoader, C: ModelLoader, T = Tokenizer> {
    tokenizer: T,
    config: GenerationConfig,
    paths: CheckpointPaths,
    plan: DevicePlan,
    residency: Residency<S, C>,
}

impl<S: ModelLoader, C: ModelLoader> HeartMulaPipeline<S, C, Tokenizer> {
    /// Resolve `root`, plan devices, load the tokenizer and generation config.
    ///
    /// Nothing touches a device before the layout has been validated.
    /// Without lazy loading both models are loaded before this returns.
    pub fn from_pretrained(
        root: impl AsRef<Path>,
        options: &PipelineOptions,
        sequence_loader: S,
        codec_loader: C,
    ) -> Result<Self> {
        let paths = CheckpointPaths::resolve(root, &options.version)?;
        let plan = plan(options.device, options.precision, options.lazy_load);
        let tokenizer = load_tokenizer(&paths.tokenizer)?;
        let config = GenerationConfig::from_file(&paths.gen_config)?;
        Self::from_parts(tokenizer, config, paths, plan, sequence_loader, codec_loader)
    }
}

impl<S: ModelLoader, C: ModelLoader, T> HeartMulaPipeline<S, C, T> {
    /// Assemble a pipeline from already-resolved pieces.
    pub fn from_parts(
        tokenizer: T,
        config: GenerationConfig,
        paths: CheckpointPaths,
        plan: DevicePlan,
        sequence_loader: S,
        codec_loader: C,
    ) -> Result<Self> {
        let residency = Residency::new(
            &plan,
            sequence_loader,
            &paths.sequence_model,
            codec_loader,
            &paths.codec_model,
        )?;
        Ok(Self {
            tokenizer,
            config,
            paths,
            plan,
            residency,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn paths(&self) -> &CheckpointPaths {
        &self.paths
    }

    pub fn plan(&self) -> &DevicePlan {
        &self.plan
    }

    pub fn is_resident(&self, role: ModelRole) -> bool {
        self.residency.is_resident(role)
    }

    pub fn load_count(&self, role: ModelRole) -> usize {
        self.residency.load_count(role)
    }
}

impl<S, C, T> HeartMulaPipeline<S, C, T>
where
    S: ModelLoader,
    S::Model: SequenceModel,
    C: ModelLoader,
    C::Model: CodecModel,
    T: TextTokenizer,
{
    /// Pack, decode and synthesize; write the result to `params.save_path`.
    ///
    /// On any failure no file is left at `save_path`.
    pub fn generate(
        &mut self,
        inputs: &GenerationInputs,
        params: &GenerationParams,
    ) -> Result<GenerationSummary> {
        params.validate()?;
        let prompt = self.pack(inputs, params.cfg_scale)?;

        let seed = params.seed.unwrap_or_else(rand::random);
        let mut sampler = FrameSampler::new(
            seed,
            SamplingParams {
                temperature: params.temperature,
                top_k: params.topk,
                cfg_scale: params.cfg_scale,
            },
        );
        let max_frames = params.max_frames();
        tracing::info!(
            seed,
            max_frames,
            batch = prompt.batch_size(),
            prompt_len = prompt.prompt_len(),
            "generating"
        );

        let config = &self.config;
        let decoded = self.residency.with_sequence(|model| {
            decode::decode(model, config, &prompt, max_frames, &mut sampler)
        })?;
        if decoded.is_empty() {
            return Err(Error::InvalidInput(
                "the model ended the song before producing a frame".into(),
            ));
        }

        let path = params.save_path.as_path();
        let waveform = self
            .residency
            .with_codec(|codec| synthesis::synthesize(codec, &decoded.frames, path))?;

        Ok(GenerationSummary {
            path: params.save_path.clone(),
            frames: decoded.len(),
            stop_reason: decoded.stop_reason,
            duration_ms: waveform.duration_ms(),
            sample_rate: waveform.sample_rate,
            seed,
        })
    }

    /// Pack `inputs` for the sequence model's precision.
    pub fn pack(&self, inputs: &GenerationInputs, cfg_scale: f64) -> Result<PackedPrompt> {
        PromptPacker::new(&self.tokenizer, &self.config).pack(
            inputs,
            cfg_scale,
            self.plan.sequence.dtype,
        )
    }
}
