//! # Speech Engine
//!
//! The acoustic engine is the one exclusive, stateful resource in the process. This module
//! defines the seam the rest of the server talks to:
//!
//! - [`SpeechEngine`]: a loaded model that turns 16 kHz mono samples into ordered segments,
//!   reporting progress and finished segments through [`EngineCallbacks`] and polling an abort
//!   callback at its own cadence.
//! - [`EngineLoader`]: builds a [`SpeechEngine`] from a model file.
//! - [`WhisperEngine`] / [`WhisperLoader`]: the whisper.cpp implementation via `whisper-rs`.
//!
//! Zero-valued options are resolved here and nowhere else: a zero means "leave whisper.cpp's
//! default alone", so the corresponding setter is simply not called.

use crate::transcription::options::{SamplingMode, Segment, TranscribeOptions};
use std::path::Path;
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// whisper.cpp's default `greedy.best_of`.
const DEFAULT_BEST_OF: i32 = 5;
/// whisper.cpp's default `beam_search.beam_size`.
const DEFAULT_BEAM_SIZE: i32 = 5;
/// whisper.cpp's default beam patience (-1 disables the patience heuristic).
const DEFAULT_PATIENCE: f32 = -1.0;

/// Errors raised by the engine or while constructing it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The model file could not be read or the engine rejected it.
    #[error("failed to load model from {path}: {reason}")]
    Init { path: String, reason: String },

    /// A job was admitted but no model is loaded.
    #[error("no model loaded")]
    NotLoaded,

    /// The inference pass itself failed (including a cooperative abort).
    #[error("{0}")]
    Inference(String),

    /// The engine panicked while loading or transcribing.
    #[error("engine task panicked: {0}")]
    Panicked(String),
}

/// Callbacks invoked by the engine while it decodes.
///
/// All callbacks run on the engine's thread, in the order the engine produces them.
/// They must be `'static` because whisper.cpp keeps them for the whole `full()` call.
#[derive(Default)]
pub struct EngineCallbacks {
    /// Decoding progress in percent (0..=100). Not necessarily monotonic.
    pub on_progress: Option<Box<dyn FnMut(i32) + Send>>,
    /// Called once per finalized segment.
    pub on_segment: Option<Box<dyn FnMut(Segment) + Send>>,
    /// Polled by the engine; returning `true` cancels the run.
    pub should_abort: Option<Box<dyn FnMut() -> bool + Send>>,
}

impl EngineCallbacks {
    /// Callbacks that only watch for an abort request.
    pub fn abort_only(should_abort: impl FnMut() -> bool + Send + 'static) -> Self {
        Self {
            should_abort: Some(Box::new(should_abort)),
            ..Self::default()
        }
    }
}

/// A loaded acoustic model.
///
/// Implementations take `&mut self` because the handle is exclusive: only the job holding the
/// admission permit may call it.
pub trait SpeechEngine: Send {
    fn transcribe(
        &mut self,
        samples: &[f32],
        options: &TranscribeOptions,
        callbacks: EngineCallbacks,
    ) -> Result<Vec<Segment>, EngineError>;
}

/// Builds engine handles from model files.
pub trait EngineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError>;
}

/// Production engine wrapping a `whisper_rs::WhisperContext`.
///
/// A fresh `WhisperState` is created for every run, so nothing from a previous job leaks into
/// the next one.
pub struct WhisperEngine {
    ctx: WhisperContext,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine").finish_non_exhaustive()
    }
}

/// Loads GGML models with the configured GPU preference.
#[derive(Debug, Clone)]
pub struct WhisperLoader {
    pub use_gpu: bool,
    pub gpu_device: i32,
}

impl EngineLoader for WhisperLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError> {
        let init_error = |reason: String| EngineError::Init {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(init_error("file not found".to_string()));
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| init_error("path contains non-UTF-8 characters".to_string()))?;

        let mut params = WhisperContextParameters::default();
        params.use_gpu = self.use_gpu;
        params.gpu_device = self.gpu_device;

        tracing::info!(
            model = %path.display(),
            use_gpu = self.use_gpu,
            gpu_device = self.gpu_device,
            "Initialising whisper context"
        );

        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| init_error(e.to_string()))?;

        Ok(Box::new(WhisperEngine { ctx }))
    }
}

/// Map the sampling mode onto whisper-rs, substituting engine defaults for zero widths.
fn sampling_strategy(mode: SamplingMode) -> SamplingStrategy {
    match mode {
        SamplingMode::Greedy { best_of } => SamplingStrategy::Greedy {
            best_of: if best_of > 0 { best_of } else { DEFAULT_BEST_OF },
        },
        SamplingMode::BeamSearch { beam_size } => SamplingStrategy::BeamSearch {
            beam_size: if beam_size > 0 { beam_size } else { DEFAULT_BEAM_SIZE },
            patience: DEFAULT_PATIENCE,
        },
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(
        &mut self,
        samples: &[f32],
        options: &TranscribeOptions,
        callbacks: EngineCallbacks,
    ) -> Result<Vec<Segment>, EngineError> {
        if samples.is_empty() {
            return Err(EngineError::Inference("audio contains no samples".to_string()));
        }

        let mut params = FullParams::new(sampling_strategy(options.sampling));
        params.set_print_special(options.verbose);
        params.set_print_progress(options.verbose);
        params.set_print_realtime(options.verbose);
        params.set_print_timestamps(options.verbose);

        // whisper.cpp understands "auto" natively
        if !options.language.is_empty() {
            params.set_language(Some(options.language.as_str()));
        }
        if options.detect_language {
            params.set_detect_language(true);
        }
        if options.translate {
            params.set_translate(true);
        }
        if options.n_threads > 0 {
            params.set_n_threads(options.n_threads);
        }
        if !options.prompt.is_empty() {
            params.set_initial_prompt(&options.prompt);
        }
        if options.temperature > 0.0 {
            params.set_temperature(options.temperature);
        }
        if options.max_text_ctx > 0 {
            params.set_n_max_text_ctx(options.max_text_ctx);
        }
        if options.word_timestamps {
            params.set_token_timestamps(true);
        }
        if options.max_segment_len > 0 {
            params.set_max_len(options.max_segment_len);
        }

        let EngineCallbacks {
            on_progress,
            on_segment,
            should_abort,
        } = callbacks;

        if let Some(mut on_progress) = on_progress {
            params.set_progress_callback_safe(move |progress: i32| on_progress(progress));
        }
        if let Some(mut on_segment) = on_segment {
            // A multibyte character may straddle two segments; keep the segment, replace the
            // broken bytes.
            params.set_segment_callback_safe_lossy(move |data: whisper_rs::SegmentCallbackData| {
                on_segment(Segment::new(
                    data.start_timestamp,
                    data.end_timestamp,
                    data.text,
                ))
            });
        }
        if let Some(mut should_abort) = should_abort {
            params.set_abort_callback_safe(move || should_abort());
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| EngineError::Inference(format!("failed to create state: {}", e)))?;

        state
            .full(params, samples)
            .map_err(|e| EngineError::Inference(format!("whisper: transcription failed: {}", e)))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let mut segments = Vec::with_capacity(n_segments.max(0) as usize);
        for i in 0..n_segments {
            let text = state
                .full_get_segment_bytes(i)
                .map(|bytes| segment_text(&bytes))
                .map_err(|e| EngineError::Inference(format!("segment {}: {}", i, e)))?;
            let start = state
                .full_get_segment_t0(i)
                .map_err(|e| EngineError::Inference(format!("segment {}: {}", i, e)))?;
            let end = state
                .full_get_segment_t1(i)
                .map_err(|e| EngineError::Inference(format!("segment {}: {}", i, e)))?;

            segments.push(Segment::new(start, end, text));
        }

        Ok(segments)
    }
}

/// Decode segment text, replacing invalid UTF-8 rather than failing the job.
fn segment_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// A scripted engine for tests: replays progress and segment events, polls the abort
/// callback between events, then returns the segments or a configured failure.
#[cfg(test)]
pub struct ScriptedEngine {
    pub progress: Vec<i32>,
    pub segments: Vec<Segment>,
    pub failure: Option<String>,
    /// Panic once progress has been replayed.
    pub panics: bool,
    /// Sleep between events so tests can observe a job in flight.
    pub delay: std::time::Duration,
}

#[cfg(test)]
impl ScriptedEngine {
    pub fn ok(segments: Vec<Segment>) -> Self {
        Self {
            progress: Vec::new(),
            segments,
            failure: None,
            panics: false,
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::ok(Vec::new())
        }
    }
}

#[cfg(test)]
impl SpeechEngine for ScriptedEngine {
    fn transcribe(
        &mut self,
        _samples: &[f32],
        _options: &TranscribeOptions,
        callbacks: EngineCallbacks,
    ) -> Result<Vec<Segment>, EngineError> {
        let EngineCallbacks {
            mut on_progress,
            mut on_segment,
            mut should_abort,
        } = callbacks;
        let mut aborted = move || should_abort.as_mut().map(|f| f()).unwrap_or(false);

        for &p in &self.progress {
            std::thread::sleep(self.delay);
            if aborted() {
                return Err(EngineError::Inference("aborted".to_string()));
            }
            if let Some(cb) = on_progress.as_mut() {
                cb(p);
            }
        }
        if self.panics {
            panic!("scripted engine crash");
        }
        for segment in &self.segments {
            std::thread::sleep(self.delay);
            if aborted() {
                return Err(EngineError::Inference("aborted".to_string()));
            }
            if let Some(cb) = on_segment.as_mut() {
                cb(segment.clone());
            }
        }

        match &self.failure {
            Some(message) => Err(EngineError::Inference(message.clone())),
            None => Ok(self.segments.clone()),
        }
    }
}

/// Loader for tests that hands out clones of a scripted engine, or fails.
#[cfg(test)]
pub struct ScriptedLoader {
    pub make: Box<dyn Fn() -> ScriptedEngine + Send + Sync>,
    pub fail: bool,
}

#[cfg(test)]
impl ScriptedLoader {
    pub fn new(make: impl Fn() -> ScriptedEngine + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            make: Box::new(|| ScriptedEngine::ok(Vec::new())),
            fail: true,
        }
    }
}

#[cfg(test)]
impl EngineLoader for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError> {
        if self.fail {
            return Err(EngineError::Init {
                path: path.display().to_string(),
                reason: "invalid model file".to_string(),
            });
        }
        Ok(Box::new((self.make)()))
    }
}
