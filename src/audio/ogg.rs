//! OGG/Vorbis audio encoding.

use std::num::{NonZeroU8, NonZeroU32};
use std::path::Path;

use crate::{Error, Result};

/// Encode interleaved samples as OGG/Vorbis.
pub fn write_ogg(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    let rate = NonZeroU32::new(sample_rate)
        .ok_or_else(|| Error::Audio("vorbis: sample rate must be non-zero".into()))?;
    let channels = u8::try_from(num_channels)
        .ok()
        .and_then(NonZeroU8::new)
        .ok_or_else(|| Error::Audio(format!("vorbis: unsupported channel count {num_channels}")))?;

    let file = std::fs::File::create(path.as_ref())?;
    let mut encoder = vorbis_rs::VorbisEncoderBuilder::new(rate, channels, file)
        .map_err(|e| Error::Audio(format!("vorbis init: {e}")))?
        .build()
        .map_err(|e| Error::Audio(format!("vorbis build: {e}")))?;

    let planar = deinterleave(samples, num_channels as usize);
    encoder
        .encode_audio_block(&planar)
        .map_err(|e| Error::Audio(format!("vorbis encode: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Audio(format!("vorbis finish: {e}")))?;
    Ok(())
}

/// Split `[L, R, L, R, ...]` into one buffer per channel.
fn deinterleave(samples: &[f32], num_channels: usize) -> Vec<Vec<f32>> {
    (0..num_channels)
        .map(|ch| samples.iter().skip(ch).step_by(num_channels).copied().collect())
        .collect()
}
