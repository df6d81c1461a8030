//! HTTP handlers for the model and transcription APIs.

pub mod models;
pub mod transcriptions;
