//! HeartMuLa prompt inspector.
//!
//! Resolves a checkpoint, plans devices and packs tags + lyrics exactly as
//! a generation would, without loading either model. Useful for checking
//! a checkpoint layout and prompt lengths on a machine without a GPU.
//!
//! # Output
//!
//! Prints a one-line JSON summary to stdout on success:
//!
//! ```json
//! {"version":"3B","prompt_len":42,"conditioning_index":17,"batch_size":2,...}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use clap::Parser;
use heartmula_rs::{
    checkpoint::CheckpointPaths,
    config::{GenerationConfig, GenerationParams, cfg_batch_size},
    device::{DeviceKind, DeviceSpec, PrecisionSpec, parse_dtype, plan},
    pipeline::{GenerationInputs, PromptPacker},
    text::load_tokenizer,
};

#[derive(Parser, Debug)]
#[command(
    name = "heartmula-prompt",
    about = "Pack a HeartMuLa prompt without loading models",
    long_about = "Resolve the checkpoint layout, plan devices and pack tags + lyrics.\n\
                  Prints a JSON summary line to stdout."
)]
struct Args {
    /// Checkpoint root holding HeartMuLa-oss-<version>/, HeartCodec-oss/,
    /// tokenizer.json and gen_config.json.
    #[arg(long, env = "HEARTLIB_MODEL_PATH")]
    model_path: std::path::PathBuf,

    /// Sequence model version, with or without the HeartMuLa-oss- prefix.
    #[arg(long, env = "HEARTLIB_HEARTMULA_VERSION", default_value = "3B")]
    version: String,

    /// Style tags, or a path to a file holding them.
    #[arg(long, short = 't')]
    tags: String,

    /// Lyrics, or a path to a file holding them.
    #[arg(long, short = 'l', default_value = "")]
    lyrics: String,

    /// Classifier-free guidance scale. 1.0 disables the unconditional lane.
    #[arg(long, default_value_t = 1.5)]
    cfg_scale: f64,

    /// Upper bound on generated audio in milliseconds.
    #[arg(long, default_value_t = 240_000)]
    max_audio_length_ms: u64,

    /// Device of the sequence model: cpu, cuda[:N] or metal[:N].
    #[arg(long, default_value = "cpu")]
    mula_device: String,

    /// Device of the codec model. Defaults to the sequence model's device.
    #[arg(long)]
    codec_device: Option<String>,

    /// Precision of the sequence model.
    #[arg(long, default_value = "bf16")]
    mula_dtype: String,

    /// Precision of the codec model.
    #[arg(long, default_value = "f32")]
    codec_dtype: String,

    /// Load each model only for the phase that needs it.
    #[arg(long)]
    lazy_load: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let params = GenerationParams {
        max_audio_length_ms: args.max_audio_length_ms,
        cfg_scale: args.cfg_scale,
        ..GenerationParams::default()
    };
    params.validate()?;

    let sequence_device: DeviceKind = args.mula_device.parse()?;
    let device = match &args.codec_device {
        Some(codec) => DeviceSpec::Split {
            sequence: sequence_device,
            codec: codec.parse()?,
        },
        None => DeviceSpec::Single(sequence_device),
    };
    let precision = PrecisionSpec::Split {
        sequence: parse_dtype(&args.mula_dtype)?,
        codec: parse_dtype(&args.codec_dtype)?,
    };

    let paths = CheckpointPaths::resolve(&args.model_path, &args.version)?;
    let plan = plan(device, precision, args.lazy_load);
    let tokenizer = load_tokenizer(&paths.tokenizer)?;
    let config = GenerationConfig::from_file(&paths.gen_config)?;

    let inputs = GenerationInputs::new(args.tags, args.lyrics);
    let prompt = PromptPacker::new(&tokenizer, &config).pack(
        &inputs,
        params.cfg_scale,
        plan.sequence.dtype,
    )?;

    let summary = serde_json::json!({
        "version": heartmula_rs::checkpoint::normalize_version(&args.version)?,
        "sequence_model": paths.sequence_model,
        "codec_model": paths.codec_model,
        "tag_tokens": prompt.tag_ids.len(),
        "lyric_tokens": prompt.lyric_ids.len(),
        "prompt_len": prompt.prompt_len(),
        "conditioning_index": prompt.conditioning_starts.first().copied().unwrap_or(0),
        "batch_size": cfg_batch_size(params.cfg_scale),
        "max_frames": params.max_frames(),
        "sequence_device": plan.sequence.device.to_string(),
        "sequence_dtype": format!("{:?}", plan.sequence.dtype),
        "codec_device": plan.codec.device.to_string(),
        "codec_dtype": format!("{:?}", plan.codec.dtype),
        "lazy_load": plan.lazy_load,
    });
    println!("{summary}");

    Ok(())
}
