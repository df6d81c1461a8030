//! Response formats and the subtitle timestamp renderers.

use crate::transcription::options::{Segment, TranscribeResult};
use serde_json::{json, Value};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Representation requested through the `response_format` form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    VerboseJson,
    Text,
    Srt,
    Vtt,
}

impl ResponseFormat {
    /// Parse a form value. Anything unrecognized falls back to `json`.
    pub fn parse(value: &str) -> Self {
        match value {
            "verbose_json" => ResponseFormat::VerboseJson,
            "text" => ResponseFormat::Text,
            "srt" => ResponseFormat::Srt,
            "vtt" => ResponseFormat::Vtt,
            _ => ResponseFormat::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Json | ResponseFormat::VerboseJson => JSON_CONTENT_TYPE,
            ResponseFormat::Text | ResponseFormat::Srt | ResponseFormat::Vtt => TEXT_CONTENT_TYPE,
        }
    }
}

/// Segments of a finished job, optionally labeled with speakers.
///
/// `speakers` is either empty (no diarization) or parallel to `segments`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    pub speakers: Vec<Option<u32>>,
}

impl Transcript {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            speakers: Vec::new(),
        }
    }

    pub fn with_speakers(mut self, speakers: Vec<Option<u32>>) -> Self {
        self.speakers = speakers;
        self
    }

    pub fn speaker(&self, index: usize) -> Option<u32> {
        self.speakers.get(index).copied().flatten()
    }

    pub fn text(&self) -> String {
        TranscribeResult::new(self.segments.clone()).text()
    }
}

/// A rendered response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Json(Value),
    Text(String),
}

pub fn render(format: ResponseFormat, transcript: &Transcript) -> Rendered {
    match format {
        ResponseFormat::Json => Rendered::Json(json!({ "text": transcript.text() })),
        ResponseFormat::VerboseJson => Rendered::Json(verbose_json(transcript)),
        ResponseFormat::Text => Rendered::Text(transcript.text()),
        ResponseFormat::Srt => Rendered::Text(srt(&transcript.segments)),
        ResponseFormat::Vtt => Rendered::Text(vtt(&transcript.segments)),
    }
}

fn verbose_json(transcript: &Transcript) -> Value {
    let segments: Vec<Value> = transcript
        .segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let mut entry = json!({
                "start": segment.start_seconds(),
                "end": segment.end_seconds(),
                "text": segment.text,
            });
            if let Some(speaker) = transcript.speaker(i) {
                entry["speaker"] = json!(speaker);
            }
            entry
        })
        .collect();

    json!({
        "text": transcript.text(),
        "segments": segments,
    })
}

/// Split ticks into (hours, minutes, seconds, milliseconds).
fn clock(ticks: i64) -> (i64, i64, i64, i64) {
    let ms = ticks * 10;
    (ms / 3_600_000, (ms / 60_000) % 60, (ms / 1000) % 60, ms % 1000)
}

/// `HH:MM:SS,mmm`
pub fn srt_timestamp(ticks: i64) -> String {
    let (h, m, s, ms) = clock(ticks);
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// `HH:MM:SS.mmm`
pub fn vtt_timestamp(ticks: i64) -> String {
    let (h, m, s, ms) = clock(ticks);
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

pub fn srt(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                srt_timestamp(seg.start),
                srt_timestamp(seg.end),
                seg.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn vtt(segments: &[Segment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    let cues: Vec<String> = segments
        .iter()
        .map(|seg| {
            format!(
                "{} --> {}\n{}\n",
                vtt_timestamp(seg.start),
                vtt_timestamp(seg.end),
                seg.text.trim()
            )
        })
        .collect();
    out.push_str(&cues.join("\n"));
    out
}
