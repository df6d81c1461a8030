//! # Audio Ingestion
//!
//! Turns an uploaded file into the buffer the engine expects: 16 kHz, mono, `f32` in
//! `[-1.0, 1.0]`.
//!
//! ## Pipeline:
//! 1. **Decode** (`ingest`): RIFF/WAVE, 8/16/24-bit PCM or 32-bit float
//! 2. **Downmix**: average interleaved channels
//! 3. **Resample**: linear interpolation to 16 kHz
//! 4. **Enhance** (`processor`, optional): DC removal, normalization, smoothing

pub mod ingest;
pub mod processor;

use thiserror::Error;

pub use ingest::{decode, TARGET_SAMPLE_RATE};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported or corrupt WAV data: {0}")]
    Decode(#[from] std::io::Error),

    #[error("unsupported sample format: {0}")]
    Unsupported(String),

    #[error("audio contains no samples")]
    Empty,
}
