//! MP3 encoding via libmp3lame (`audio-mp3` feature).

use std::io::Write;
use std::path::Path;

use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

use crate::{Error, Result};

/// Encode interleaved mono or stereo samples as a 192 kbps MP3 file.
pub fn write_mp3(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    write_mp3_to(file, samples, sample_rate, num_channels)
}

/// Encode to any writer.
pub fn write_mp3_to<W: Write>(
    mut writer: W,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    if !matches!(num_channels, 1 | 2) {
        return Err(Error::Audio(format!(
            "mp3: only mono and stereo are supported, got {num_channels} channels"
        )));
    }
    let lame = |what: &str, e: &dyn std::fmt::Debug| Error::Audio(format!("mp3 {what}: {e:?}"));

    let mut encoder = Builder::new()
        .ok_or_else(|| Error::Audio("mp3: failed to create LAME encoder".into()))?
        .with_num_channels(num_channels as u8)
        .map_err(|e| lame("channels", &e))?
        .with_sample_rate(sample_rate)
        .map_err(|e| lame("sample rate", &e))?
        .with_brate(mp3lame_encoder::Bitrate::Kbps192)
        .map_err(|e| lame("bitrate", &e))?
        .with_quality(Quality::Best)
        .map_err(|e| lame("quality", &e))?
        .build()
        .map_err(|e| lame("build", &e))?;

    let frames = samples.len() / num_channels as usize;
    let mut buf = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(frames));

    let encoded = if num_channels == 1 {
        encoder.encode(MonoPcm(samples), buf.spare_capacity_mut())
    } else {
        encoder.encode(InterleavedPcm(samples), buf.spare_capacity_mut())
    }
    .map_err(|e| lame("encode", &e))?;
    // SAFETY: encode initialized exactly `encoded` bytes of spare capacity.
    unsafe { buf.set_len(encoded) };

    let flushed = encoder
        .flush::<FlushNoGap>(buf.spare_capacity_mut())
        .map_err(|e| lame("flush", &e))?;
    // SAFETY: flush initialized exactly `flushed` more bytes.
    unsafe { buf.set_len(buf.len() + flushed) };

    writer.write_all(&buf)?;
    Ok(())
}
