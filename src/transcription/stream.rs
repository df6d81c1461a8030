//! # Streaming Protocol
//!
//! Turns engine callbacks into a newline-delimited JSON body:
//!
//! ```text
//! {"type":"progress","progress":12}
//! {"type":"segment","start":0.0,"end":2.4,"text":" Hello there."}
//! {"type":"result","text":" Hello there."}
//! ```
//!
//! The engine runs on a blocking thread and pushes each event into an unbounded channel as soon
//! as it is produced. The HTTP body drains the channel, one event per chunk, so the transport
//! flushes every line on its own instead of batching at the end.
//!
//! ## Termination
//! - success: exactly one `result` event, after every `progress`/`segment` event
//! - failure: exactly one `error` event
//! - client gone: nothing more is written; whatever already went out stays on the wire
//!
//! ## Cancellation
//! [`AbortFlag`] is the cooperative cancellation token. The response body holds an
//! [`AbortOnDrop`] guard, so when actix drops the body because the client disconnected the flag
//! flips and the engine's abort callback picks it up at its next poll.

use crate::transcription::engine::{EngineCallbacks, EngineError};
use crate::transcription::options::{Segment, TranscribeResult};
use actix_web::web::Bytes;
use futures_util::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Content type of the streaming response.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One line of the streaming protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress { progress: i32 },
    Segment { start: f64, end: f64, text: String },
    Result { text: String },
    Error { message: String },
}

impl StreamEvent {
    pub fn segment(segment: &Segment) -> Self {
        StreamEvent::Segment {
            start: segment.start_seconds(),
            end: segment.end_seconds(),
            text: segment.text.clone(),
        }
    }

    /// Serialize as one NDJSON line, trailing newline included.
    pub fn to_line(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Shared cancellation flag. Cloning shares the same underlying bit.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Guard that sets the flag when dropped.
    pub fn on_drop(&self) -> AbortOnDrop {
        AbortOnDrop {
            flag: self.clone(),
            armed: true,
        }
    }
}

/// Sets its [`AbortFlag`] on drop unless disarmed first.
#[derive(Debug)]
pub struct AbortOnDrop {
    flag: AbortFlag,
    armed: bool,
}

impl AbortOnDrop {
    /// The request finished normally; dropping the guard is no longer a disconnect.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.abort();
        }
    }
}

/// Producer side: pushes events into the response body.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: UnboundedSender<Bytes>,
    abort: AbortFlag,
}

impl StreamEmitter {
    /// Queue one event. A closed receiver means the client is gone, which aborts the job.
    pub fn send(&self, event: StreamEvent) {
        if self.abort.is_aborted() {
            return;
        }

        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize stream event");
                return;
            }
        };

        if self.tx.send(line).is_err() {
            tracing::debug!("Stream receiver closed, aborting job");
            self.abort.abort();
        }
    }

    /// Engine callbacks that forward progress and segments and poll the abort flag.
    pub fn callbacks(&self) -> EngineCallbacks {
        let progress = self.clone();
        let segments = self.clone();
        let abort = self.abort.clone();

        EngineCallbacks {
            on_progress: Some(Box::new(move |p| {
                progress.send(StreamEvent::Progress { progress: p })
            })),
            on_segment: Some(Box::new(move |segment| {
                segments.send(StreamEvent::segment(&segment))
            })),
            should_abort: Some(Box::new(move || abort.is_aborted())),
        }
    }

    /// Write the terminal event for a finished engine call. Consumes the emitter so the
    /// channel closes once every callback clone is gone as well.
    pub fn finish(self, result: &Result<Vec<Segment>, EngineError>) {
        if self.abort.is_aborted() {
            return;
        }

        match result {
            Ok(segments) => self.send(StreamEvent::Result {
                text: TranscribeResult::new(segments.clone()).text(),
            }),
            Err(e) => self.send(StreamEvent::Error {
                message: e.to_string(),
            }),
        }
    }
}

/// Consumer side: the HTTP response body.
pub struct EventStream {
    inner: UnboundedReceiverStream<Bytes>,
    _abort_on_drop: AbortOnDrop,
}

impl Stream for EventStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|line| line.map(Ok))
    }
}

/// Create a connected emitter/body pair sharing `abort`.
pub fn channel(abort: AbortFlag) -> (StreamEmitter, EventStream) {
    let (tx, rx) = unbounded_channel();
    let body = EventStream {
        inner: UnboundedReceiverStream::new(rx),
        _abort_on_drop: abort.on_drop(),
    };
    (StreamEmitter { tx, abort }, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::{ScriptedEngine, SpeechEngine};
    use crate::transcription::options::TranscribeOptions;
    use futures_util::StreamExt;

    fn parse_lines(chunks: &[Bytes]) -> Vec<serde_json::Value> {
        chunks
            .iter()
            .map(|chunk| {
                assert!(chunk.ends_with(b"\n"), "every chunk is exactly one line");
                assert_eq!(chunk.iter().filter(|&&b| b == b'\n').count(), 1);
                serde_json::from_slice(chunk).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_event_wire_format() {
        let line = StreamEvent::segment(&Segment::new(150, 12345, " hi")).to_line().unwrap();
        assert_eq!(
            std::str::from_utf8(&line).unwrap(),
            "{\"type\":\"segment\",\"start\":1.5,\"end\":123.45,\"text\":\" hi\"}\n"
        );

        let line = StreamEvent::Progress { progress: 42 }.to_line().unwrap();
        assert_eq!(&line[..], b"{\"type\":\"progress\",\"progress\":42}\n");
    }

    #[tokio::test]
    async fn test_two_segments_then_one_result() {
        let (emitter, body) = channel(AbortFlag::new());
        let mut engine = ScriptedEngine {
            progress: vec![50],
            ..ScriptedEngine::ok(vec![Segment::new(0, 100, " Hello"), Segment::new(100, 200, " world.")])
        };

        let result = engine.transcribe(&[0.0; 16], &TranscribeOptions::default(), emitter.callbacks());
        emitter.finish(&result);

        let chunks: Vec<Bytes> = body.map(|chunk| chunk.unwrap()).collect().await;
        let events = parse_lines(&chunks);

        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["type"], "progress");
        assert_eq!(events[1]["type"], "segment");
        assert_eq!(events[1]["text"], " Hello");
        assert_eq!(events[2]["type"], "segment");
        assert_eq!(events[2]["start"], 1.0);
        assert_eq!(events[3], serde_json::json!({"type": "result", "text": " Hello world."}));
    }

    #[tokio::test]
    async fn test_failure_emits_single_error() {
        let (emitter, body) = channel(AbortFlag::new());
        let mut engine = ScriptedEngine::failing("decoder exploded");

        let result = engine.transcribe(&[0.0; 16], &TranscribeOptions::default(), emitter.callbacks());
        emitter.finish(&result);

        let chunks: Vec<Bytes> = body.map(|chunk| chunk.unwrap()).collect().await;
        let events = parse_lines(&chunks);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[0]["message"], "decoder exploded");
    }

    #[tokio::test]
    async fn test_dropped_body_aborts_and_silences() {
        let abort = AbortFlag::new();
        let (emitter, body) = channel(abort.clone());

        emitter.send(StreamEvent::Progress { progress: 1 });
        drop(body);
        assert!(abort.is_aborted());

        let mut engine = ScriptedEngine::ok(vec![Segment::new(0, 100, " a")]);
        let result = engine.transcribe(&[0.0; 16], &TranscribeOptions::default(), emitter.callbacks());
        assert!(result.is_err());

        // No panic, nothing to write to
        emitter.finish(&result);
    }

    #[test]
    fn test_disarmed_guard_leaves_flag_clear() {
        let abort = AbortFlag::new();
        abort.on_drop().disarm();
        assert!(!abort.is_aborted());

        drop(abort.on_drop());
        assert!(abort.is_aborted());
    }
}
