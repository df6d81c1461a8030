//! # Output Rendering
//!
//! Turns a finished transcript into one of the response representations a client can ask for
//! with `response_format`: `json`, `verbose_json`, `text`, `srt` or `vtt`.

pub mod format;

pub use format::{render, Rendered, ResponseFormat, Transcript};
