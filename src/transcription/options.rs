//! Decoding options and result types shared by the engine, the orchestrator and the
//! output formatters.

/// Number of timestamp ticks per second. Engine timestamps are 10 ms ticks.
pub const TICKS_PER_SECOND: f64 = 100.0;

/// Convert engine ticks (10 ms units) to seconds.
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND
}

/// A transcribed text segment with timestamps in ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub text: String,
}

impl Segment {
    pub fn new(start: i64, end: i64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn start_seconds(&self) -> f64 {
        ticks_to_seconds(self.start)
    }

    pub fn end_seconds(&self) -> f64 {
        ticks_to_seconds(self.end)
    }
}

/// Ordered output of one transcription run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscribeResult {
    pub segments: Vec<Segment>,
}

impl TranscribeResult {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Concatenated text of all segments, with no separator inserted.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Decoding strategy with its associated width. A width of 0 means "engine default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Greedy { best_of: i32 },
    BeamSearch { beam_size: i32 },
}

impl Default for SamplingMode {
    fn default() -> Self {
        SamplingMode::Greedy { best_of: 0 }
    }
}

/// Options for a single transcription run.
///
/// Every numeric zero is a "use the engine default" sentinel, never a literal request.
/// The engine adapter is the only place that decides what the default actually is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeOptions {
    /// Language code such as "en" or "he". Empty keeps the engine default; "auto" detects.
    pub language: String,
    pub detect_language: bool,
    pub translate: bool,
    pub n_threads: i32,
    /// Initial prompt / vocabulary hint.
    pub prompt: String,
    pub temperature: f32,
    pub max_text_ctx: i32,
    pub word_timestamps: bool,
    /// Maximum segment length in characters (0 = unlimited).
    pub max_segment_len: i32,
    pub sampling: SamplingMode,
    /// Let the engine print its own diagnostics.
    pub verbose: bool,
}
