//! # Speaker Diarization
//!
//! Speaker labels come from an external `sona-diarize` process that reports who spoke when.
//! [`merge::assign_speakers`] then attaches at most one speaker to each transcript segment.
//!
//! Diarization is best-effort: any failure is logged and the transcript goes out unlabeled.

pub mod merge;
pub mod subprocess;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use merge::assign_speakers;
pub use subprocess::SubprocessDiarizer;

/// A time interval attributed to one speaker, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizationSegment {
    pub start: f64,
    pub end: f64,
    pub speaker_id: u32,
}

#[derive(Debug, Error)]
pub enum DiarizeError {
    #[error("sona-diarize binary not found")]
    BinaryNotFound,

    #[error("failed to write temporary audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("sona-diarize exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("invalid diarizer output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Produces speaker spans for a 16 kHz mono sample buffer.
pub trait Diarizer: Send + Sync {
    fn diarize(&self, model: &str, samples: &[f32]) -> Result<Vec<DiarizationSegment>, DiarizeError>;
}

/// Diarizer for tests that returns fixed spans or fails.
#[cfg(test)]
pub struct FixedDiarizer(pub Option<Vec<DiarizationSegment>>);

#[cfg(test)]
impl Diarizer for FixedDiarizer {
    fn diarize(&self, _model: &str, _samples: &[f32]) -> Result<Vec<DiarizationSegment>, DiarizeError> {
        self.0.clone().ok_or(DiarizeError::BinaryNotFound)
    }
}
