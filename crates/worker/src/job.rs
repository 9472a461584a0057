//! Narrate-then-render jobs.
//!
//! A job names an optional narration text and an optional scene. The
//! narration is synthesized and validated first; the scene is then rendered
//! with the narration merged into its soundtrack.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voxreel_core::narration::{AudioArtifact, AudioReport, Narrator, SpeechSynthesizer};
use voxreel_core::rendering::{Renderer, SceneRequest, VideoArtifact};

/// A job as read from its JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub scene: Option<SceneRequest>,
}

/// Outcome of [`run_job`], printed as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub audio: Option<AudioArtifact>,
    pub audio_report: Option<AudioReport>,
    pub video: Option<VideoArtifact>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Parse a job from JSON text.
pub fn parse_job(json: &str) -> anyhow::Result<Job> {
    let job: Job = serde_json::from_str(json).context("invalid job JSON")?;
    if job.narration.is_none() && job.scene.is_none() {
        anyhow::bail!("job has neither narration nor scene");
    }
    Ok(job)
}

/// Read and parse a job file.
pub async fn load_job(path: &Path) -> anyhow::Result<Job> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    parse_job(&json)
}

/// Run `job` to completion.
pub async fn run_job<S: SpeechSynthesizer>(
    job: &Job,
    narrator: &Narrator<S>,
    renderer: &Renderer,
) -> anyhow::Result<JobReport> {
    let started_at = Utc::now();

    let (audio, audio_report) = match &job.narration {
        Some(text) => {
            let (artifact, report) = narrator
                .generate_validated(text)
                .await
                .context("narration failed")?;
            tracing::info!(
                audio = %artifact.path.display(),
                duration_secs = report.duration_secs,
                dbfs = report.dbfs,
                "Narration ready",
            );
            (Some(artifact), Some(report))
        }
        None => (None, None),
    };

    let video = match &job.scene {
        Some(scene) => {
            let audio_path = audio.as_ref().map(|a| a.path.as_path());
            let video = renderer
                .render(scene, audio_path)
                .await
                .context("rendering failed")?;
            tracing::info!(video = %video.path.display(), "Video ready");
            Some(video)
        }
        None => None,
    };

    Ok(JobReport {
        audio,
        audio_report,
        video,
        started_at,
        finished_at: Utc::now(),
    })
}
