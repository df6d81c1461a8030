//! Runs the external `sona-diarize` binary.
//!
//! The samples are written to a temporary 16-bit PCM WAV and the binary is invoked as
//! `sona-diarize <model> <audio.wav>`. It prints a JSON array of
//! `{"start","end","speaker_id"}` objects on stdout and diagnostics on stderr.

use crate::audio::ingest::TARGET_SAMPLE_RATE;
use crate::diarization::{DiarizationSegment, DiarizeError, Diarizer};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

const BINARY_NAME: &str = "sona-diarize";
const PATH_OVERRIDE_VAR: &str = "SONA_DIARIZE_PATH";

#[derive(Debug, Clone, Default)]
pub struct SubprocessDiarizer {
    /// Explicit binary location from configuration, tried before any lookup.
    binary_path: Option<PathBuf>,
}

impl SubprocessDiarizer {
    pub fn new(binary_path: Option<PathBuf>) -> Self {
        Self { binary_path }
    }

    /// Find the binary.
    ///
    /// Order: configured path, `PATH`, `SONA_DIARIZE_PATH`, then next to the running executable.
    /// A configured or env path that does not exist is reported and skipped.
    pub fn locate(&self) -> Result<PathBuf, DiarizeError> {
        if let Some(path) = &self.binary_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            tracing::warn!(path = %path.display(), "Configured diarizer not found, continuing search");
        }

        if let Some(path) = search_path(BINARY_NAME) {
            return Ok(path);
        }

        if let Ok(env_path) = env::var(PATH_OVERRIDE_VAR) {
            if !env_path.is_empty() {
                let path = PathBuf::from(&env_path);
                if path.is_file() {
                    return Ok(path);
                }
                tracing::warn!(
                    path = %env_path,
                    "{} set but not found, continuing search",
                    PATH_OVERRIDE_VAR
                );
            }
        }

        if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
            for name in [BINARY_NAME, "sona-diarize.exe"] {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(DiarizeError::BinaryNotFound)
    }
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Write mono samples as 16-bit PCM WAV at the engine sample rate.
pub fn write_wav(samples: &[f32], out: &mut (impl Write + std::io::Seek)) -> std::io::Result<()> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, TARGET_SAMPLE_RATE, 16);
    wav::write(header, &wav::BitDepth::Sixteen(pcm), out)?;
    out.flush()
}

impl Diarizer for SubprocessDiarizer {
    fn diarize(&self, model: &str, samples: &[f32]) -> Result<Vec<DiarizationSegment>, DiarizeError> {
        let binary = self.locate()?;

        let mut audio = tempfile::Builder::new()
            .prefix("sona-diarize-")
            .suffix(".wav")
            .tempfile()?;
        write_wav(samples, audio.as_file_mut())?;

        tracing::debug!(binary = %binary.display(), model, "Running diarizer");

        let output = Command::new(&binary).arg(model).arg(audio.path()).output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(DiarizeError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "Diarizer diagnostics");
        }

        let spans: Vec<DiarizationSegment> = serde_json::from_slice(&output.stdout)?;
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_binary_is_preferred() {
        let binary = tempfile::NamedTempFile::new().unwrap();
        let diarizer = SubprocessDiarizer::new(Some(binary.path().to_path_buf()));
        assert_eq!(diarizer.locate().unwrap(), binary.path());
    }

    #[test]
    fn test_written_wav_reads_back() {
        let mut buf = std::io::Cursor::new(Vec::new());
        write_wav(&[0.0, 0.5, -0.5, 1.0], &mut buf).unwrap();

        buf.set_position(0);
        let (header, data) = wav::read(&mut buf).unwrap();
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, TARGET_SAMPLE_RATE);
        match data {
            wav::BitDepth::Sixteen(pcm) => assert_eq!(pcm, vec![0, 16383, -16383, 32767]),
            _ => panic!("expected 16-bit samples"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_binary_and_parses_spans() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-diarize");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             test -f \"$2\" || exit 3\n\
             echo '[{\"start\":0.0,\"end\":1.5,\"speaker_id\":0},{\"start\":1.5,\"end\":3.0,\"speaker_id\":1}]'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let diarizer = SubprocessDiarizer::new(Some(script));
        let spans = diarizer.diarize("model.onnx", &[0.0; 1600]).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].speaker_id, 1);
        assert_eq!(spans[1].start, 1.5);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken-diarize");
        std::fs::write(&script, "#!/bin/sh\necho 'model missing' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = SubprocessDiarizer::new(Some(script))
            .diarize("model.onnx", &[0.0; 160])
            .unwrap_err();
        match err {
            DiarizeError::Failed { stderr, .. } => assert_eq!(stderr, "model missing"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
