//! HeartMuLa lyrics-to-music generation in Rust.
//!
//! Generates a song from style tags and lyrics with two composed models: a
//! sequence model that predicts multi-channel audio tokens frame by frame,
//! and a codec model that turns those tokens into a 48 kHz waveform.
//!
//! ## Architecture
//!
//! ```text
//! tags + lyrics ─▶ tokenizer ─▶ packed prompt [B, L, 9]
//!                                   ↓
//!                 sequence model (autoregressive, CFG lanes)
//!                                   ↓
//!                 audio frames [8, n] ─▶ codec model ─▶ waveform ─▶ file
//! ```
//!
//! The concrete networks are supplied by the caller through the
//! [`model::SequenceModel`], [`model::CodecModel`] and [`model::ModelLoader`]
//! traits; this crate owns checkpoint layout, device planning, prompt
//! packing, the decode loop, model residency and audio output.
//!
//! ## Modules
//!
//! - [`checkpoint`]: checkpoint layout resolution and catalog
//! - [`device`]: device/precision planning
//! - [`pipeline`]: packer, decoder, synthesizer and the facade
//! - [`residency`]: lazy or eager model residency
//! - [`manager`]: serialized generation worker
//! - [`audio`]: WAV/OGG/MP3 output

pub mod audio;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod manager;
pub mod model;
pub mod pipeline;
pub mod residency;
pub mod text;

mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ErrorKind, Result};
