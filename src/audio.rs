//! Audio file output.
//!
//! The container is picked from the file extension:
//!
//! - `.wav`: 32-bit float PCM via `hound`
//! - `.ogg`: Vorbis via `vorbis_rs`
//! - `.mp3`: 192 kbps via LAME, behind the `audio-mp3` feature
//!
//! Files are encoded next to their destination and renamed into place, so
//! the destination path only ever holds a complete file.

#[cfg(feature = "audio-mp3")]
mod mp3;
mod ogg;
mod wav;

use std::path::Path;

pub use ogg::write_ogg;
pub use wav::{read_wav, write_wav};

use crate::{Error, Result};

/// Supported output containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Ogg,
    Mp3,
}

impl AudioFormat {
    /// Parse a file extension (without the dot, any case).
    pub fn parse(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(AudioFormat::Wav),
            "ogg" | "oga" => Some(AudioFormat::Ogg),
            "mp3" => Some(AudioFormat::Mp3),
            _ => None,
        }
    }

    /// Format implied by `path`'s extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::parse(ext).ok_or_else(|| {
            Error::Config(format!(
                "unsupported output format {ext:?} for {}; use .wav, .ogg or .mp3",
                path.display()
            ))
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

/// Encode interleaved samples to `path`, creating parent directories.
pub fn write_audio(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    let path = path.as_ref();
    let format = AudioFormat::from_path(path)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".heartmula-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile_in(parent)?;

    match format {
        AudioFormat::Wav => write_wav(staging.path(), samples, sample_rate, num_channels)?,
        AudioFormat::Ogg => write_ogg(staging.path(), samples, sample_rate, num_channels)?,
        #[cfg(feature = "audio-mp3")]
        AudioFormat::Mp3 => mp3::write_mp3(staging.path(), samples, sample_rate, num_channels)?,
        #[cfg(not(feature = "audio-mp3"))]
        AudioFormat::Mp3 => {
            return Err(Error::Config(
                "mp3 output requires the `audio-mp3` feature".into(),
            ));
        }
    }

    staging.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
