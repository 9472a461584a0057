//! Scene rendering: script in, video out, narration optionally merged.
//!
//! [`Renderer::render`] persists the scene code to a fixed script file, runs
//! the renderer in the configured working directory and waits for it to
//! exit, then returns the path of the produced video. When an audio file is
//! given it replaces the video's soundtrack.
//!
//! On any failure after the script was written, the script and any partial
//! video for the scene are removed. Successful renders keep both.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RenderConfig;
use crate::error::CoreError;
use crate::ffmpeg::{self, AudioFit};
use crate::process::{self, ProcessInput};

/// Engine name reported in errors.
const ENGINE: &str = "renderer";

/// Directory the renderer keeps per-animation fragments in.
const PARTIAL_MOVIE_DIR: &str = "partial_movie_files";

/// Allowance for coarse filesystem timestamps when telling this run's
/// output from an earlier one.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// `class Name(Base, ...):` at the start of a line.
static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*class[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(([^)]*)\)[ \t]*:")
        .expect("valid regex")
});

/// A scene to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRequest {
    /// Fallback location (relative to the working directory) checked when
    /// the renderer's media tree holds no video for the scene.
    pub output_file: String,
    /// Source of the scene in the renderer's scripting dialect.
    #[serde(alias = "manim_code")]
    pub scene_code: String,
    /// Scene class to render. Detected from the code when absent.
    #[serde(default)]
    pub scene_name: Option<String>,
}

impl SceneRequest {
    pub fn new(output_file: impl Into<String>, scene_code: impl Into<String>) -> Self {
        Self {
            output_file: output_file.into(),
            scene_code: scene_code.into(),
            scene_name: None,
        }
    }

    /// Explicit scene name, else the first `*Scene` subclass in the code.
    pub fn resolved_scene_name(&self) -> Option<String> {
        self.scene_name
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| detect_scene_name(&self.scene_code))
    }
}

/// A rendered video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub scene_name: Option<String>,
    /// Whether a narration track was merged in.
    pub has_audio: bool,
}

/// Name of the first class in `code` deriving from a `*Scene` base.
pub fn detect_scene_name(code: &str) -> Option<String> {
    CLASS_RE
        .captures_iter(code)
        .find(|caps| {
            caps[2]
                .split(',')
                .any(|base| base.trim().rsplit('.').next().is_some_and(|b| b.ends_with("Scene")))
        })
        .map(|caps| caps[1].to_string())
}

/// The rendering component.
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// `<media>/videos/<script-stem>/<quality>`.
    pub fn quality_dir(&self) -> PathBuf {
        self.config
            .media_root()
            .join("videos")
            .join(self.config.script_stem())
            .join(self.config.quality.dir_name())
    }

    /// Where the renderer writes the video for `scene`.
    pub fn expected_video_path(&self, scene: &str) -> PathBuf {
        self.quality_dir().join(format!("{scene}.mp4"))
    }

    /// Renderer arguments, relative to the working directory.
    pub fn render_args(&self, scene: Option<&str>) -> Vec<String> {
        let mut args = self.config.program_args.clone();
        args.push(self.config.quality.flag().to_string());
        args.push("--media_dir".to_string());
        args.push(self.config.media_dir.to_string_lossy().into_owned());
        args.push(self.config.script_name.clone());
        if let Some(scene) = scene {
            args.push(scene.to_string());
        }
        args
    }

    /// Render `request`, merging `audio` into the result when given.
    pub async fn render(
        &self,
        request: &SceneRequest,
        audio: Option<&Path>,
    ) -> Result<VideoArtifact, CoreError> {
        if let Some(audio) = audio {
            if !audio.exists() {
                return Err(CoreError::ArtifactMissing(audio.to_path_buf()));
            }
        }
        if request.scene_code.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "scene code must not be empty".to_string(),
            ));
        }

        let scene = request.resolved_scene_name();
        let script = self.config.script_path();

        // A video left over from an earlier run must not pass for this one.
        if let Some(scene) = &scene {
            let _ = tokio::fs::remove_file(self.expected_video_path(scene)).await;
        }
        let _ = tokio::fs::remove_file(self.config.work_dir.join(&request.output_file)).await;

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        tokio::fs::write(&script, &request.scene_code).await?;
        let not_before = SystemTime::now()
            .checked_sub(MTIME_SLACK)
            .unwrap_or(UNIX_EPOCH);

        tracing::info!(
            script = %script.display(),
            scene = scene.as_deref().unwrap_or("<undetected>"),
            quality = self.config.quality.dir_name(),
            with_audio = audio.is_some(),
            "Rendering scene",
        );

        match self
            .render_inner(request, scene.as_deref(), audio, not_before)
            .await
        {
            Ok(artifact) => {
                tracing::info!(
                    video = %artifact.path.display(),
                    size_bytes = artifact.size_bytes,
                    has_audio = artifact.has_audio,
                    "Scene rendered",
                );
                Ok(artifact)
            }
            Err(e) => {
                tracing::error!(error = %e, "Render failed, cleaning up");
                self.clean_up(scene.as_deref()).await;
                Err(e)
            }
        }
    }

    async fn render_inner(
        &self,
        request: &SceneRequest,
        scene: Option<&str>,
        audio: Option<&Path>,
        not_before: SystemTime,
    ) -> Result<VideoArtifact, CoreError> {
        let mut cmd = tokio::process::Command::new(&self.config.program);
        cmd.args(self.render_args(scene));
        let input = ProcessInput::new(self.config.timeout)
            .with_working_directory(self.config.work_dir.clone());

        let output = process::run_command(&mut cmd, input)
            .await
            .map_err(|e| CoreError::from_process(ENGINE, e))?;
        if !output.success() {
            return Err(CoreError::ExternalEngineFailure {
                engine: ENGINE.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let video = self.locate_video(request, scene, not_before).await?;

        let has_audio = match audio {
            Some(audio) => {
                self.merge_narration(&video, audio).await?;
                true
            }
            None => false,
        };

        let size_bytes = tokio::fs::metadata(&video).await?.len();
        Ok(VideoArtifact {
            path: video,
            size_bytes,
            scene_name: scene.map(str::to_string),
            has_audio,
        })
    }

    /// Find the video the renderer produced.
    ///
    /// Checks the expected path, then searches the script's media tree,
    /// then falls back to `output_file` in the working directory. Files last
    /// modified before `not_before` are ignored.
    pub async fn locate_video(
        &self,
        request: &SceneRequest,
        scene: Option<&str>,
        not_before: SystemTime,
    ) -> Result<PathBuf, CoreError> {
        if let Some(scene) = scene {
            let expected = self.expected_video_path(scene);
            if is_fresh(&expected, not_before).await {
                return Ok(expected);
            }
        }

        let script_tree = self
            .config
            .media_root()
            .join("videos")
            .join(self.config.script_stem());
        let file_name = scene.map(|s| format!("{s}.mp4"));
        let found = find_newest_mp4(&script_tree, file_name.as_deref(), not_before).await?;
        if let Some(found) = found {
            tracing::debug!(video = %found.display(), "Video found outside the expected path");
            return Ok(found);
        }

        let fallback = self.config.work_dir.join(&request.output_file);
        if is_fresh(&fallback, not_before).await {
            return Ok(fallback);
        }

        Err(CoreError::ArtifactMissing(match scene {
            Some(scene) => self.expected_video_path(scene),
            None => fallback,
        }))
    }

    /// Replace the soundtrack of `video` with `audio`, in place.
    async fn merge_narration(&self, video: &Path, audio: &Path) -> Result<(), CoreError> {
        let video_probe = ffmpeg::probe_media(video, self.config.timeout).await?;
        let audio_probe = ffmpeg::probe_media(audio, self.config.timeout).await?;
        let video_secs = ffmpeg::parse_video_duration(&video_probe)
            .unwrap_or_else(|| ffmpeg::parse_duration(&video_probe));
        let audio_secs = ffmpeg::parse_audio_duration(&audio_probe)
            .unwrap_or_else(|| ffmpeg::parse_duration(&audio_probe));
        let fit = AudioFit::for_durations(video_secs, audio_secs);

        tracing::info!(
            video = %video.display(),
            audio = %audio.display(),
            video_secs,
            audio_secs,
            fit = ?fit,
            "Merging narration",
        );

        let merged = muxing_path(video);
        let result = ffmpeg::merge_audio(video, audio, &merged, fit, self.config.timeout).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&merged).await;
            return Err(e.into());
        }
        replace_video(&merged, video).await
    }

    /// Remove the script and any partial output for `scene`.
    async fn clean_up(&self, scene: Option<&str>) {
        let _ = tokio::fs::remove_file(self.config.script_path()).await;
        if let Some(scene) = scene {
            let _ = tokio::fs::remove_file(self.expected_video_path(scene)).await;
            let _ = tokio::fs::remove_dir_all(
                self.quality_dir().join(PARTIAL_MOVIE_DIR).join(scene),
            )
            .await;
        }
    }
}

/// Move `merged` over `video`, discarding `merged` if that fails.
async fn replace_video(merged: &Path, video: &Path) -> Result<(), CoreError> {
    if let Err(e) = tokio::fs::rename(merged, video).await {
        let _ = tokio::fs::remove_file(merged).await;
        return Err(e.into());
    }
    Ok(())
}

/// Temporary sibling for the merged video.
fn muxing_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    video.with_file_name(format!(".{stem}.{}.muxing.mp4", uuid::Uuid::new_v4()))
}

fn modified_since(meta: &std::fs::Metadata, not_before: SystemTime) -> bool {
    meta.modified().is_ok_and(|t| t >= not_before)
}

/// Non-empty regular file modified at or after `not_before`.
async fn is_fresh(path: &Path, not_before: SystemTime) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.is_file() && m.len() > 0 && modified_since(&m, not_before))
}

/// Newest non-empty `.mp4` under `root` (optionally with an exact file
/// name) modified at or after `not_before`, skipping partial fragments.
async fn find_newest_mp4(
    root: &Path,
    file_name: Option<&str>,
    not_before: SystemTime,
) -> Result<Option<PathBuf>, CoreError> {
    let mut stack = vec![root.to_path_buf()];
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                if entry.file_name() != PARTIAL_MOVIE_DIR {
                    stack.push(path);
                }
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            let matches = match file_name {
                Some(wanted) => name == wanted,
                None => name.ends_with(".mp4") && !name.starts_with('.'),
            };
            if !matches || meta.len() == 0 || !modified_since(&meta, not_before) {
                continue;
            }

            let modified = meta.modified().unwrap_or(UNIX_EPOCH);
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }
    }

    Ok(newest.map(|(_, path)| path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
