use std::path::PathBuf;

use crate::ffmpeg::FfmpegError;
use crate::process::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{engine} failed (exit code {exit_code:?}): {stderr}")]
    ExternalEngineFailure {
        engine: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{engine} timed out after {elapsed_ms}ms")]
    Timeout { engine: String, elapsed_ms: u64 },

    #[error("Expected artifact is missing or empty: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Audio is silent ({dbfs:.1} dBFS): {}", .path.display())]
    AudioSilent { path: PathBuf, dbfs: f64 },

    #[error("Failed to inspect media: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Attach the engine name to a subprocess failure.
    pub fn from_process(engine: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { elapsed_ms } => Self::Timeout {
                engine: engine.to_string(),
                elapsed_ms,
            },
            ProcessError::NotFound(program) => Self::ExternalEngineFailure {
                engine: engine.to_string(),
                exit_code: None,
                stderr: format!("program not found: {program}"),
            },
            ProcessError::IoError(e) => Self::ExternalEngineFailure {
                engine: engine.to_string(),
                exit_code: None,
                stderr: e.to_string(),
            },
        }
    }
}

impl From<FfmpegError> for CoreError {
    fn from(err: FfmpegError) -> Self {
        match err {
            FfmpegError::NotFound(e) => Self::ExternalEngineFailure {
                engine: "ffmpeg".to_string(),
                exit_code: None,
                stderr: e.to_string(),
            },
            FfmpegError::ExecutionFailed { exit_code, stderr } => Self::ExternalEngineFailure {
                engine: "ffmpeg".to_string(),
                exit_code,
                stderr,
            },
            FfmpegError::Timeout { elapsed_ms } => Self::Timeout {
                engine: "ffmpeg".to_string(),
                elapsed_ms,
            },
            FfmpegError::ParseError(msg) => Self::Probe(msg),
            FfmpegError::IoError(e) => Self::Io(e),
            FfmpegError::MediaNotFound(path) => Self::ArtifactMissing(PathBuf::from(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_keeps_engine_name() {
        let err = CoreError::from_process("piper", ProcessError::Timeout { elapsed_ms: 1500 });
        assert_eq!(err.to_string(), "piper timed out after 1500ms");
    }

    #[test]
    fn missing_program_is_engine_failure() {
        let err = CoreError::from_process("manim", ProcessError::NotFound("manim".into()));
        assert!(matches!(
            err,
            CoreError::ExternalEngineFailure { exit_code: None, .. }
        ));
    }

    #[test]
    fn ffmpeg_exit_code_is_preserved() {
        let err: CoreError = FfmpegError::ExecutionFailed {
            exit_code: Some(1),
            stderr: "Invalid data found".into(),
        }
        .into();
        match err {
            CoreError::ExternalEngineFailure {
                engine, exit_code, ..
            } => {
                assert_eq!(engine, "ffmpeg");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ffmpeg_timeout_is_timeout() {
        let err: CoreError = FfmpegError::Timeout { elapsed_ms: 900 }.into();
        assert!(matches!(err, CoreError::Timeout { ref engine, elapsed_ms: 900 } if engine == "ffmpeg"));
    }

    #[test]
    fn display_audio_silent() {
        let err = CoreError::AudioSilent {
            path: PathBuf::from("output.wav"),
            dbfs: -60.0,
        };
        assert_eq!(err.to_string(), "Audio is silent (-60.0 dBFS): output.wav");
    }
}
