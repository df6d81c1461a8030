//! # Model Lifecycle and Admission
//!
//! [`ModelManager`] owns the single engine handle. One `tokio::sync::Mutex` guards it, and the
//! same lock serves two purposes:
//!
//! - **Lifecycle**: `load` and `unload` wait for the lock, so a model swap queues behind a running
//!   transcription instead of interleaving with it.
//! - **Admission**: `try_begin_job` never waits. If the lock is taken the caller gets
//!   [`AdmissionError::Busy`] immediately; otherwise it receives a [`JobPermit`] that holds the
//!   lock until the permit is dropped.
//!
//! The permit owns its guard (`OwnedMutexGuard`), so it can move into `spawn_blocking` together
//! with the job and the lock is released exactly when the job finishes.

use crate::transcription::engine::{EngineCallbacks, EngineError, EngineLoader, SpeechEngine};
use crate::transcription::options::{Segment, TranscribeOptions};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Raised when a job cannot be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("another transcription is in progress")]
    Busy,
}

/// The loaded engine together with its display name.
struct LoadedModel {
    engine: Box<dyn SpeechEngine>,
    name: String,
}

/// State behind the shared lock.
#[derive(Default)]
pub struct ModelSlot {
    loaded: Option<LoadedModel>,
}

impl ModelSlot {
    fn name(&self) -> Option<&str> {
        self.loaded.as_ref().map(|m| m.name.as_str())
    }
}

/// Snapshot returned by [`ModelManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub name: Option<String>,
}

/// Display name for a model file: its file name, or the whole path if it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct ModelManager {
    slot: Arc<Mutex<ModelSlot>>,
    loader: Arc<dyn EngineLoader>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager").finish_non_exhaustive()
    }
}

impl ModelManager {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ModelSlot::default())),
            loader,
        }
    }

    /// Replace the loaded model with the one at `path`.
    ///
    /// The previous handle is released before the new one is built, so a failed load always
    /// leaves the manager unloaded.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<String, EngineError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut slot = self.slot.clone().lock_owned().await;

        if let Some(previous) = slot.loaded.take() {
            tracing::info!(model = %previous.name, "Releasing previously loaded model");
            drop(previous);
        }

        let loader = self.loader.clone();
        let started = std::time::Instant::now();

        // Model construction reads hundreds of MB; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || -> Result<String, EngineError> {
            let engine = loader.load(&path)?;
            let name = display_name(&path);
            slot.loaded = Some(LoadedModel {
                engine,
                name: name.clone(),
            });
            Ok(name)
        })
        .await
        .map_err(|e| EngineError::Panicked(e.to_string()))?;

        match &result {
            Ok(name) => tracing::info!(
                model = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                "Model loaded"
            ),
            Err(e) => tracing::error!(error = %e, "Model load failed"),
        }

        result
    }

    /// Release the loaded model. Unloading when nothing is loaded is not an error.
    pub async fn unload(&self) {
        let mut slot = self.slot.lock().await;
        match slot.loaded.take() {
            Some(previous) => tracing::info!(model = %previous.name, "Model unloaded"),
            None => tracing::debug!("Unload requested with no model loaded"),
        }
    }

    /// Whether a model is loaded, and its name. Waits behind a running job.
    pub async fn status(&self) -> ModelStatus {
        let slot = self.slot.lock().await;
        ModelStatus {
            loaded: slot.loaded.is_some(),
            name: slot.name().map(str::to_string),
        }
    }

    /// Claim the engine for one job without waiting.
    ///
    /// Whether a model is actually loaded is checked on the permit, after admission.
    pub fn try_begin_job(&self) -> Result<JobPermit, AdmissionError> {
        self.slot
            .clone()
            .try_lock_owned()
            .map(|guard| JobPermit { guard })
            .map_err(|_| AdmissionError::Busy)
    }
}

/// Exclusive right to run one transcription. Dropping it releases the engine.
pub struct JobPermit {
    guard: OwnedMutexGuard<ModelSlot>,
}

impl std::fmt::Debug for JobPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPermit")
            .field("model", &self.guard.name())
            .finish()
    }
}

impl JobPermit {
    /// Name of the loaded model, or `NotLoaded`.
    pub fn require_model(&self) -> Result<&str, EngineError> {
        self.guard.name().ok_or(EngineError::NotLoaded)
    }

    /// Run the engine. Blocking; call from a blocking thread.
    ///
    /// A panic inside the engine is reported as [`EngineError::Panicked`] so the caller still
    /// reaches its terminal bookkeeping.
    pub fn transcribe(
        &mut self,
        samples: &[f32],
        options: &TranscribeOptions,
        callbacks: EngineCallbacks,
    ) -> Result<Vec<Segment>, EngineError> {
        let model = self.guard.loaded.as_mut().ok_or(EngineError::NotLoaded)?;
        panic::catch_unwind(AssertUnwindSafe(|| {
            model.engine.transcribe(samples, options, callbacks)
        }))
        .unwrap_or_else(|payload| Err(EngineError::Panicked(panic_message(payload.as_ref()))))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::{ScriptedEngine, ScriptedLoader};
    use std::time::Duration;

    fn manager() -> ModelManager {
        ModelManager::new(Arc::new(ScriptedLoader::new(|| {
            ScriptedEngine::ok(vec![Segment::new(0, 100, " hi")])
        })))
    }

    #[tokio::test]
    async fn test_load_sets_display_name() {
        let manager = manager();
        let name = manager.load("/models/ggml-base.en.bin").await.unwrap();
        assert_eq!(name, "ggml-base.en.bin");

        let status = manager.status().await;
        assert!(status.loaded);
        assert_eq!(status.name.as_deref(), Some("ggml-base.en.bin"));
    }

    #[tokio::test]
    async fn test_unload_is_idempotent() {
        let manager = manager();
        manager.load("/models/a.bin").await.unwrap();
        manager.unload().await;
        manager.unload().await;
        assert!(!manager.status().await.loaded);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_unloaded() {
        let good = manager();
        good.load("/models/a.bin").await.unwrap();

        // Same slot semantics, failing loader
        let manager = ModelManager {
            slot: good.slot.clone(),
            loader: Arc::new(ScriptedLoader::failing()),
        };
        let err = manager.load("/models/broken.bin").await.unwrap_err();
        assert!(matches!(err, EngineError::Init { .. }));
        assert_eq!(
            manager.status().await,
            ModelStatus {
                loaded: false,
                name: None
            }
        );
    }

    #[tokio::test]
    async fn test_second_job_is_busy_regardless_of_model() {
        let manager = manager();
        let first = manager.try_begin_job().unwrap();
        assert_eq!(manager.try_begin_job().unwrap_err(), AdmissionError::Busy);
        drop(first);
        assert!(manager.try_begin_job().is_ok());
    }

    #[tokio::test]
    async fn test_permit_without_model_reports_not_loaded() {
        let manager = manager();
        let mut permit = manager.try_begin_job().unwrap();
        assert!(matches!(permit.require_model(), Err(EngineError::NotLoaded)));
        let result = permit.transcribe(&[0.0], &TranscribeOptions::default(), EngineCallbacks::default());
        assert!(matches!(result, Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_permit_runs_loaded_engine() {
        let manager = manager();
        manager.load("/models/a.bin").await.unwrap();
        let mut permit = manager.try_begin_job().unwrap();
        assert_eq!(permit.require_model().unwrap(), "a.bin");
        let segments = permit
            .transcribe(&[0.0; 8], &TranscribeOptions::default(), EngineCallbacks::default())
            .unwrap();
        assert_eq!(segments, vec![Segment::new(0, 100, " hi")]);
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_error() {
        let manager = ModelManager::new(Arc::new(ScriptedLoader::new(|| ScriptedEngine {
            panics: true,
            ..ScriptedEngine::ok(Vec::new())
        })));
        manager.load("/models/a.bin").await.unwrap();

        let mut permit = manager.try_begin_job().unwrap();
        let result = permit.transcribe(&[0.0; 8], &TranscribeOptions::default(), EngineCallbacks::default());
        match result {
            Err(EngineError::Panicked(message)) => assert_eq!(message, "scripted engine crash"),
            other => panic!("expected a panic error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_waits_for_running_job() {
        let manager = Arc::new(manager());
        let permit = manager.try_begin_job().unwrap();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.load("/models/b.bin").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        drop(permit);
        let name = pending.await.unwrap().unwrap();
        assert_eq!(name, "b.bin");
    }
}
