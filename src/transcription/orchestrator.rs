//! # Transcription Orchestrator
//!
//! One options-building stage followed by two mutually exclusive ways of running the job:
//!
//! - [`run_buffered`]: the engine runs to completion and the caller renders one response body.
//! - [`run_streaming`]: engine callbacks feed an NDJSON body while the engine is still running.
//!
//! Both run the engine on tokio's blocking pool with the [`JobPermit`] moved into the task, so the
//! engine lock is held for exactly as long as the job runs. Outcome bookkeeping (logs and job
//! counters) happens inside that task too, so it is recorded even when the client is gone and
//! nobody awaits the result.

use crate::diarization::{assign_speakers, Diarizer};
use crate::output::{ResponseFormat, Transcript};
use crate::state::JobCounters;
use crate::transcription::engine::{EngineCallbacks, EngineError};
use crate::transcription::manager::JobPermit;
use crate::transcription::options::{SamplingMode, Segment, TranscribeOptions};
use crate::transcription::stream::{self, AbortFlag, EventStream};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Parse a boolean form value. Accepts `1 t T TRUE true True`; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "TRUE" | "true" | "True")
}

/// Parse an integer form value, falling back to the zero sentinel.
pub fn parse_i32(value: &str) -> i32 {
    value.parse().unwrap_or(0)
}

/// Parse a float form value, falling back to the zero sentinel.
pub fn parse_f32(value: &str) -> f32 {
    value.parse().unwrap_or(0.0)
}

/// Everything a transcription request asks for, minus the audio itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionRequest {
    pub options: TranscribeOptions,
    pub response_format: ResponseFormat,
    pub stream: bool,
    pub enhance_audio: bool,
    /// Diarization model path; enables speaker labels on the buffered path.
    pub diarize_model: Option<String>,
}

impl TranscriptionRequest {
    /// Build from multipart text fields. Missing or unparseable scalars become zero sentinels;
    /// nothing here fails the request.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |name: &str| fields.get(name).map(String::as_str).unwrap_or("");

        let sampling = if get("sampling_strategy") == "beam_search" {
            SamplingMode::BeamSearch {
                beam_size: parse_i32(get("beam_size")),
            }
        } else {
            SamplingMode::Greedy {
                best_of: parse_i32(get("best_of")),
            }
        };

        let options = TranscribeOptions {
            language: get("language").to_string(),
            detect_language: parse_bool(get("detect_language")),
            translate: parse_bool(get("translate")),
            n_threads: parse_i32(get("n_threads")),
            prompt: get("prompt").to_string(),
            temperature: parse_f32(get("temperature")),
            max_text_ctx: parse_i32(get("max_text_ctx")),
            word_timestamps: parse_bool(get("word_timestamps")),
            max_segment_len: parse_i32(get("max_segment_len")),
            sampling,
            verbose: false,
        };

        let diarize_model = Some(get("diarize_model").trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Self {
            options,
            response_format: ResponseFormat::parse(get("response_format")),
            stream: parse_bool(get("stream")),
            enhance_audio: parse_bool(get("enhance_audio")),
            diarize_model,
        }
    }
}

/// How a job ended, as seen by the HTTP layer.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("client disconnected")]
    Aborted,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Identity and bookkeeping shared by both execution paths.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: Uuid,
    pub counters: Arc<JobCounters>,
}

impl JobContext {
    pub fn new(counters: Arc<JobCounters>) -> Self {
        Self {
            id: Uuid::new_v4(),
            counters,
        }
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("job", job_id = %self.id)
    }

    /// Classify and record the engine outcome.
    ///
    /// A failure while the abort flag is set is the expected result of a disconnect and is only
    /// logged at debug level.
    fn finish<T>(
        &self,
        result: Result<T, EngineError>,
        abort: &AbortFlag,
        started: Instant,
    ) -> Result<T, JobError> {
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                self.counters.record_completed();
                tracing::info!(duration_ms, "Transcription completed");
                Ok(value)
            }
            Err(e) if abort.is_aborted() => {
                self.counters.record_aborted();
                tracing::debug!(duration_ms, error = %e, "Transcription aborted by client");
                Err(JobError::Aborted)
            }
            Err(e) => {
                self.counters.record_failed();
                tracing::error!(duration_ms, error = %e, "Transcription failed");
                Err(JobError::Engine(e))
            }
        }
    }
}

/// Speaker labelling for a buffered job.
#[derive(Clone)]
pub struct DiarizationJob {
    pub diarizer: Arc<dyn Diarizer>,
    pub model: String,
}

impl DiarizationJob {
    /// Per-segment speakers, or an empty list if the diarizer fails.
    fn speakers(&self, samples: &[f32], segments: &[Segment]) -> Vec<Option<u32>> {
        match self.diarizer.diarize(&self.model, samples) {
            Ok(spans) => {
                tracing::debug!(spans = spans.len(), "Diarization finished");
                assign_speakers(segments, &spans)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Diarization failed, returning transcript without speakers");
                Vec::new()
            }
        }
    }
}

/// Run a job to completion.
///
/// `abort` should be tied to client liveness by the caller (for example with
/// [`AbortFlag::on_drop`] held across the await); the engine polls it.
pub async fn run_buffered(
    ctx: JobContext,
    mut permit: JobPermit,
    samples: Vec<f32>,
    options: TranscribeOptions,
    diarization: Option<DiarizationJob>,
    abort: AbortFlag,
) -> Result<Transcript, JobError> {
    let span = ctx.span();

    let joined = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let started = Instant::now();
        tracing::info!(samples = samples.len(), "Starting buffered transcription");

        let engine_abort = abort.clone();
        let result = permit
            .transcribe(
                &samples,
                &options,
                EngineCallbacks::abort_only(move || engine_abort.is_aborted()),
            )
            .map(|segments| {
                let transcript = Transcript::new(segments);
                match &diarization {
                    Some(job) if !abort.is_aborted() => {
                        let speakers = job.speakers(&samples, &transcript.segments);
                        transcript.with_speakers(speakers)
                    }
                    _ => transcript,
                }
            });
        drop(permit);

        ctx.finish(result, &abort, started)
    })
    .await;

    joined.unwrap_or_else(|e| Err(JobError::Engine(EngineError::Panicked(e.to_string()))))
}

/// Start a job whose progress is streamed; returns the response body immediately.
///
/// The body owns the abort guard: when actix drops it (client gone), the engine is told to stop.
pub fn run_streaming(
    ctx: JobContext,
    mut permit: JobPermit,
    samples: Vec<f32>,
    options: TranscribeOptions,
) -> EventStream {
    let abort = AbortFlag::new();
    let (emitter, body) = stream::channel(abort.clone());
    let span = ctx.span();

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let started = Instant::now();
        tracing::info!(samples = samples.len(), "Starting streaming transcription");

        let result = permit.transcribe(&samples, &options, emitter.callbacks());
        // Free the engine before the terminal event so a client reacting to it is not refused.
        drop(permit);

        emitter.finish(&result);
        let _ = ctx.finish(result, &abort, started);
    });

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diarization::{DiarizationSegment, FixedDiarizer};
    use crate::transcription::engine::{ScriptedEngine, ScriptedLoader};
    use crate::transcription::manager::ModelManager;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn loaded(engine: impl Fn() -> ScriptedEngine + Send + Sync + 'static) -> ModelManager {
        let manager = ModelManager::new(Arc::new(ScriptedLoader::new(engine)));
        manager.load("/models/test.bin").await.unwrap();
        manager
    }

    #[test]
    fn test_parse_bool_matches_form_conventions() {
        for v in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(parse_bool(v), "{} should be true", v);
        }
        for v in ["", "0", "yes", "tRuE", "false", "on"] {
            assert!(!parse_bool(v), "{} should be false", v);
        }
    }

    #[test]
    fn test_fields_map_to_options() {
        let request = TranscriptionRequest::from_fields(&fields(&[
            ("language", "he"),
            ("translate", "true"),
            ("n_threads", "4"),
            ("temperature", "0.2"),
            ("prompt", "Kubernetes, gRPC"),
            ("sampling_strategy", "beam_search"),
            ("beam_size", "3"),
            ("response_format", "srt"),
            ("stream", "1"),
            ("enhance_audio", "T"),
        ]));

        assert_eq!(request.options.language, "he");
        assert!(request.options.translate);
        assert_eq!(request.options.n_threads, 4);
        assert_eq!(request.options.temperature, 0.2);
        assert_eq!(request.options.prompt, "Kubernetes, gRPC");
        assert_eq!(request.options.sampling, SamplingMode::BeamSearch { beam_size: 3 });
        assert_eq!(request.response_format, ResponseFormat::Srt);
        assert!(request.stream);
        assert!(request.enhance_audio);
        assert_eq!(request.diarize_model, None);
    }

    #[test]
    fn test_unparseable_scalars_become_sentinels() {
        let request = TranscriptionRequest::from_fields(&fields(&[
            ("n_threads", "lots"),
            ("temperature", "warm"),
            ("best_of", "-"),
            ("sampling_strategy", "nucleus"),
            ("response_format", "yaml"),
        ]));

        assert_eq!(request.options.n_threads, 0);
        assert_eq!(request.options.temperature, 0.0);
        assert_eq!(request.options.sampling, SamplingMode::Greedy { best_of: 0 });
        assert_eq!(request.response_format, ResponseFormat::Json);
        assert_eq!(request, TranscriptionRequest::from_fields(&HashMap::new()));
    }

    #[tokio::test]
    async fn test_buffered_returns_segments_and_releases_lock() {
        let manager = loaded(|| ScriptedEngine::ok(vec![Segment::new(0, 100, " one")])).await;
        let counters = Arc::new(JobCounters::default());

        let permit = manager.try_begin_job().unwrap();
        let transcript = run_buffered(
            JobContext::new(counters.clone()),
            permit,
            vec![0.0; 160],
            TranscribeOptions::default(),
            None,
            AbortFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(transcript.text(), " one");
        assert!(transcript.speakers.is_empty());
        assert_eq!(counters.snapshot().completed, 1);
        assert!(manager.try_begin_job().is_ok());
    }

    #[tokio::test]
    async fn test_buffered_failure_vs_abort() {
        let manager = loaded(|| ScriptedEngine::failing("bad audio")).await;
        let counters = Arc::new(JobCounters::default());

        let err = run_buffered(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
            None,
            AbortFlag::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Engine(EngineError::Inference(_))));

        let abort = AbortFlag::new();
        abort.abort();
        let err = run_buffered(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
            None,
            abort,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Aborted));

        let snapshot = counters.snapshot();
        assert_eq!((snapshot.failed, snapshot.aborted), (1, 1));
    }

    #[tokio::test]
    async fn test_buffered_attaches_speakers() {
        let manager = loaded(|| {
            ScriptedEngine::ok(vec![Segment::new(0, 150, " hi"), Segment::new(150, 300, " there")])
        })
        .await;

        let diarizer = FixedDiarizer(Some(vec![
            DiarizationSegment { start: 0.0, end: 1.4, speaker_id: 0 },
            DiarizationSegment { start: 1.4, end: 3.0, speaker_id: 1 },
        ]));
        let job = DiarizationJob {
            diarizer: Arc::new(diarizer),
            model: "diar.onnx".to_string(),
        };

        let transcript = run_buffered(
            JobContext::new(Arc::new(JobCounters::default())),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
            Some(job),
            AbortFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(transcript.speakers, vec![Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_failed_diarization_leaves_transcript_unlabeled() {
        let manager = loaded(|| ScriptedEngine::ok(vec![Segment::new(0, 150, " hi")])).await;
        let job = DiarizationJob {
            diarizer: Arc::new(FixedDiarizer(None)),
            model: "diar.onnx".to_string(),
        };

        let transcript = run_buffered(
            JobContext::new(Arc::new(JobCounters::default())),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
            Some(job),
            AbortFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(transcript.text(), " hi");
        assert_eq!(transcript.speaker(0), None);
    }

    #[tokio::test]
    async fn test_streaming_holds_lock_until_done() {
        let manager = loaded(|| ScriptedEngine {
            progress: vec![25, 75],
            delay: Duration::from_millis(20),
            ..ScriptedEngine::ok(vec![Segment::new(0, 100, " a"), Segment::new(100, 200, " b")])
        })
        .await;
        let counters = Arc::new(JobCounters::default());

        let body = run_streaming(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
        );
        assert!(manager.try_begin_job().is_err());

        let chunks: Vec<_> = body.map(|c| c.unwrap()).collect().await;
        let types: Vec<String> = chunks
            .iter()
            .map(|c| serde_json::from_slice::<serde_json::Value>(c).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["progress", "progress", "segment", "segment", "result"]);

        // Permit is dropped before the terminal event is sent
        assert!(manager.try_begin_job().is_ok());
    }

    #[tokio::test]
    async fn test_streaming_engine_panic_ends_with_error_event() {
        let manager = loaded(|| ScriptedEngine {
            progress: vec![10],
            panics: true,
            ..ScriptedEngine::ok(vec![Segment::new(0, 100, " a")])
        })
        .await;
        let counters = Arc::new(JobCounters::default());

        let body = run_streaming(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
        );
        let lines: Vec<serde_json::Value> = body
            .map(|c| serde_json::from_slice(&c.unwrap()).unwrap())
            .collect()
            .await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], serde_json::json!({"type": "progress", "progress": 10}));
        assert_eq!(lines[1]["type"], "error");
        assert!(lines[1]["message"].as_str().unwrap().contains("scripted engine crash"));

        // Counters are updated just after the terminal event
        for _ in 0..50 {
            if counters.snapshot().failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = counters.snapshot();
        assert_eq!((snapshot.completed, snapshot.failed, snapshot.aborted), (0, 1, 0));
        assert!(manager.try_begin_job().is_ok());
    }

    #[tokio::test]
    async fn test_buffered_engine_panic_is_counted_as_failure() {
        let manager = loaded(|| ScriptedEngine {
            panics: true,
            ..ScriptedEngine::ok(Vec::new())
        })
        .await;
        let counters = Arc::new(JobCounters::default());

        let err = run_buffered(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
            None,
            AbortFlag::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, JobError::Engine(EngineError::Panicked(_))));
        assert_eq!(counters.snapshot().failed, 1);
        // The model survives the crash
        assert!(manager.status().await.loaded);
    }

    #[tokio::test]
    async fn test_streaming_disconnect_aborts_engine() {
        let manager = loaded(|| ScriptedEngine {
            progress: vec![10, 20, 30, 40, 50],
            delay: Duration::from_millis(20),
            ..ScriptedEngine::ok(vec![Segment::new(0, 100, " a")])
        })
        .await;
        let counters = Arc::new(JobCounters::default());

        let mut body = run_streaming(
            JobContext::new(counters.clone()),
            manager.try_begin_job().unwrap(),
            vec![0.0; 160],
            TranscribeOptions::default(),
        );
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"{\"type\":\"progress\""));
        drop(body);

        // The engine notices at its next poll and the permit is released
        let mut freed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Ok(permit) = manager.try_begin_job() {
                drop(permit);
                freed = true;
                break;
            }
        }
        assert!(freed);
        // Bookkeeping runs right after the permit is dropped
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counters.snapshot().aborted, 1);
    }
}
