//! Narration: text in, synthesized speech file out.
//!
//! [`Narrator`] rejects blank text, runs a [`SpeechSynthesizer`] into a
//! temporary sibling of the output path and moves the result into place only
//! after the engine succeeded. [`Narrator::validate`] decodes the artifact and
//! fails on missing, empty or silent audio.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::audio::{self, DEFAULT_SILENCE_THRESHOLD_DBFS};
use crate::config::{NarrationConfig, SpeechEngineKind, DEFAULT_ENGINE_TIMEOUT_SECS};
use crate::error::CoreError;
use crate::process::{self, ProcessInput};

/// Placeholder replaced with the output file path in engine arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced with the narration text in engine arguments.
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// A generated narration file. Owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of [`Narrator::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioReport {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub dbfs: f64,
}

/// An external speech synthesis capability.
pub trait SpeechSynthesizer: Send + Sync {
    /// Engine name used in errors and logs.
    fn name(&self) -> &str;

    /// Synthesize `text` into an audio file at `output`, returning once the
    /// engine has exited.
    fn synthesize(
        &self,
        text: &str,
        output: &Path,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// A speech engine driven through its command line.
///
/// Arguments may contain [`OUTPUT_PLACEHOLDER`] and [`TEXT_PLACEHOLDER`].
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    name: String,
    program: String,
    args: Vec<String>,
    text_on_stdin: bool,
    timeout: Duration,
}

impl CommandSynthesizer {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        text_on_stdin: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            text_on_stdin,
            timeout,
        }
    }

    /// Piper: reads text from stdin, writes WAV to `--output_file`.
    pub fn piper(program: &str, model: &str, timeout: Duration) -> Self {
        Self::new(
            "piper",
            program,
            vec![
                "--model".into(),
                model.into(),
                "--output_file".into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
            true,
            timeout,
        )
    }

    /// eSpeak NG: text as the final argument, WAV via `-w`.
    pub fn espeak(program: &str, timeout: Duration) -> Self {
        Self::new(
            "espeak",
            program,
            vec![
                "-w".into(),
                OUTPUT_PLACEHOLDER.into(),
                "--".into(),
                TEXT_PLACEHOLDER.into(),
            ],
            false,
            timeout,
        )
    }

    pub fn from_config(config: &NarrationConfig) -> Self {
        match config.engine {
            SpeechEngineKind::Piper => Self::piper(&config.program, &config.model, config.timeout),
            SpeechEngineKind::Espeak => Self::espeak(&config.program, config.timeout),
        }
    }

    /// Engine arguments with placeholders filled in.
    pub fn render_args(&self, text: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(OUTPUT_PLACEHOLDER, &output)
                    .replace(TEXT_PLACEHOLDER, text)
            })
            .collect()
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), CoreError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.render_args(text, output));

        let mut input = ProcessInput::new(self.timeout);
        if self.text_on_stdin {
            input = input.with_stdin(text);
        }

        let result = process::run_command(&mut cmd, input)
            .await
            .map_err(|e| CoreError::from_process(&self.name, e))?;

        if !result.success() {
            return Err(CoreError::ExternalEngineFailure {
                engine: self.name.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// The narration component.
pub struct Narrator<S = CommandSynthesizer> {
    synthesizer: S,
    output_path: PathBuf,
    silence_threshold_dbfs: f64,
    probe_timeout: Duration,
}

impl Narrator<CommandSynthesizer> {
    pub fn from_config(config: &NarrationConfig) -> Self {
        Self::new(
            CommandSynthesizer::from_config(config),
            config.output_path.clone(),
        )
        .with_silence_threshold(config.silence_threshold_dbfs)
        .with_probe_timeout(config.timeout)
    }
}

impl<S: SpeechSynthesizer> Narrator<S> {
    pub fn new(synthesizer: S, output_path: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            output_path: output_path.into(),
            silence_threshold_dbfs: DEFAULT_SILENCE_THRESHOLD_DBFS,
            probe_timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
        }
    }

    pub fn with_silence_threshold(mut self, dbfs: f64) -> Self {
        self.silence_threshold_dbfs = dbfs;
        self
    }

    /// Bound on the ffprobe/ffmpeg calls [`validate`](Self::validate) makes
    /// for non-WAV audio.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Synthesize `text` to the configured output path.
    ///
    /// A previous file at that path is replaced only when the engine
    /// succeeds.
    pub async fn generate(&self, text: &str) -> Result<AudioArtifact, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "narration text must not be empty".to_string(),
            ));
        }

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let partial = partial_path(&self.output_path);
        tracing::info!(
            engine = self.synthesizer.name(),
            output = %self.output_path.display(),
            chars = text.chars().count(),
            "Synthesizing narration",
        );

        if let Err(e) = self.synthesizer.synthesize(text, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            tracing::error!(engine = self.synthesizer.name(), error = %e, "Narration failed");
            return Err(e);
        }

        let size_bytes = match tokio::fs::metadata(&partial).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(CoreError::ArtifactMissing(self.output_path.clone()));
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &self.output_path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            tracing::error!(
                output = %self.output_path.display(),
                error = %e,
                "Could not move narration into place",
            );
            return Err(e.into());
        }

        tracing::info!(
            output = %self.output_path.display(),
            size_bytes,
            "Narration written",
        );

        Ok(AudioArtifact {
            path: self.output_path.clone(),
            size_bytes,
        })
    }

    /// Decode `artifact` and check it is present, non-empty and audible.
    pub async fn validate(&self, artifact: &AudioArtifact) -> Result<AudioReport, CoreError> {
        match tokio::fs::metadata(&artifact.path).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(CoreError::ArtifactMissing(artifact.path.clone())),
        }

        let stats = audio::analyze(&artifact.path, self.probe_timeout).await?;
        if stats.duration_secs <= 0.0 || audio::is_silent(stats.dbfs, self.silence_threshold_dbfs)
        {
            return Err(CoreError::AudioSilent {
                path: artifact.path.clone(),
                dbfs: stats.dbfs,
            });
        }

        Ok(AudioReport {
            path: artifact.path.clone(),
            duration_secs: stats.duration_secs,
            dbfs: stats.dbfs,
        })
    }

    /// [`generate`](Self::generate) followed by [`validate`](Self::validate).
    pub async fn generate_validated(
        &self,
        text: &str,
    ) -> Result<(AudioArtifact, AudioReport), CoreError> {
        let artifact = self.generate(text).await?;
        let report = self.validate(&artifact).await?;
        Ok((artifact, report))
    }
}

/// Temporary sibling of `path` that keeps its extension.
fn partial_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "narration".to_string());
    let name = match path.extension() {
        Some(ext) => format!(".{stem}.{}.partial.{}", uuid::Uuid::new_v4(), ext.to_string_lossy()),
        None => format!(".{stem}.{}.partial", uuid::Uuid::new_v4()),
    };
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
