//! # Transcription Module
//!
//! Everything between "samples are decoded" and "segments are ready to render".
//!
//! ## Key Components:
//! - **Engine** (`engine`): the `SpeechEngine` seam and its whisper.cpp implementation
//! - **Model Manager** (`manager`): load/unload/status plus single-job admission on one lock
//! - **Orchestrator** (`orchestrator`): form fields to options, buffered vs streaming execution
//! - **Streaming** (`stream`): NDJSON event protocol and cooperative cancellation
//! - **Options** (`options`): decoding options, segments and results

pub mod engine;
pub mod manager;
pub mod options;
pub mod orchestrator;
pub mod stream;

pub use engine::{EngineError, WhisperLoader};
pub use manager::{AdmissionError, ModelManager};
pub use options::Segment;
pub use orchestrator::{
    run_buffered, run_streaming, DiarizationJob, JobContext, JobError, TranscriptionRequest,
};
pub use stream::AbortFlag;
