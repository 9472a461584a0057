//! FFmpeg/FFprobe command utilities.
//!
//! Probing (durations, stream layout), loudness measurement and the
//! audio-into-video merge used by the rendering component.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::process::{self, ProcessError, ProcessInput};

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffprobe/ffmpeg timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("media file not found: {0}")]
    MediaNotFound(String),
}

impl From<ProcessError> for FfmpegError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(program) => Self::NotFound(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                program,
            )),
            ProcessError::Timeout { elapsed_ms } => Self::Timeout { elapsed_ms },
            ProcessError::IoError(e) => Self::IoError(e),
        }
    }
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// How [`merge_audio`] reconciles the narration and video lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioFit {
    /// Lengths agree; both streams are used as they are.
    Matched,
    /// Narration is longer: hold the last video frame for this many seconds.
    HoldLastFrame(f64),
    /// Narration is shorter: pad it with silence to this total length.
    PadAudio(f64),
}

impl AudioFit {
    /// Durations closer than this are treated as equal.
    const TOLERANCE_SECS: f64 = 0.001;

    pub fn for_durations(video_secs: f64, audio_secs: f64) -> Self {
        let gap = audio_secs - video_secs;
        if gap > Self::TOLERANCE_SECS {
            Self::HoldLastFrame(gap)
        } else if gap < -Self::TOLERANCE_SECS {
            Self::PadAudio(video_secs)
        } else {
            Self::Matched
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_media(path: &Path, timeout: Duration) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::MediaNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let mut cmd = tokio::process::Command::new("ffprobe");
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);

    let output = process::run_command(&mut cmd, ProcessInput::new(timeout)).await?;
    if !output.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    serde_json::from_str::<FfprobeOutput>(&output.stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {}", output.stdout)))
}

/// Measure the mean loudness of a media file's audio in dBFS.
///
/// Uses ffmpeg's `volumedetect` filter. Digital silence is reported as
/// `f64::NEG_INFINITY`.
pub async fn mean_volume(path: &Path, timeout: Duration) -> Result<f64, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::MediaNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-nostats", "-i"])
        .arg(path)
        .args(["-af", "volumedetect", "-f", "null", "-"]);

    let output = process::run_command(&mut cmd, ProcessInput::new(timeout)).await?;
    if !output.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    parse_mean_volume(&output.stderr).ok_or_else(|| {
        FfmpegError::ParseError(format!("no mean_volume in output: {}", output.stderr))
    })
}

/// Merge `audio` into `video`, writing the result to `output`.
///
/// The video's own audio (if any) is dropped. `fit` decides whether the
/// video is extended or the audio padded so the soundtrack covers the video
/// without being cut.
pub async fn merge_audio(
    video: &Path,
    audio: &Path,
    output: &Path,
    fit: AudioFit,
    timeout: Duration,
) -> Result<(), FfmpegError> {
    for path in [video, audio] {
        if !path.exists() {
            return Err(FfmpegError::MediaNotFound(
                path.to_string_lossy().to_string(),
            ));
        }
    }

    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.args(merge_args(video, audio, output, fit));

    let result = process::run_command(&mut cmd, ProcessInput::new(timeout)).await?;
    if !result.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }

    Ok(())
}

/// Build the ffmpeg argument list for [`merge_audio`].
pub fn merge_args(
    video: &Path,
    audio: &Path,
    output: &Path,
    fit: AudioFit,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), video.into(), "-i".into()];
    args.push(audio.into());
    args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));

    match fit {
        AudioFit::HoldLastFrame(secs) => {
            args.push("-vf".into());
            args.push(format!("tpad=stop_mode=clone:stop_duration={secs:.3}").into());
            args.extend(["-c:v", "libx264", "-pix_fmt", "yuv420p"].map(OsString::from));
        }
        AudioFit::PadAudio(total_secs) => {
            args.push("-af".into());
            args.push(format!("apad=whole_dur={total_secs:.3}").into());
            args.extend(["-c:v", "copy"].map(OsString::from));
        }
        AudioFit::Matched => args.extend(["-c:v", "copy"].map(OsString::from)),
    }

    args.extend(["-c:a", "aac", "-b:a", "192k"].map(OsString::from));
    args.push(output.into());
    args
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn first_stream<'a>(probe: &'a FfprobeOutput, codec_type: &str) -> Option<&'a FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some(codec_type))
}

fn parse_secs(value: Option<&String>) -> Option<f64> {
    value.and_then(|d| d.parse::<f64>().ok())
}

/// Parse the container duration in seconds from ffprobe output.
///
/// Falls back to the first video stream, then the first audio stream.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    parse_secs(probe.format.duration.as_ref())
        .or_else(|| first_stream(probe, "video").and_then(|s| parse_secs(s.duration.as_ref())))
        .or_else(|| first_stream(probe, "audio").and_then(|s| parse_secs(s.duration.as_ref())))
        .unwrap_or(0.0)
}

/// Duration of the first audio stream, if the file has one.
pub fn parse_audio_duration(probe: &FfprobeOutput) -> Option<f64> {
    let stream = first_stream(probe, "audio")?;
    parse_secs(stream.duration.as_ref()).or_else(|| parse_secs(probe.format.duration.as_ref()))
}

/// Duration of the first video stream, if the file has one.
pub fn parse_video_duration(probe: &FfprobeOutput) -> Option<f64> {
    let stream = first_stream(probe, "video")?;
    parse_secs(stream.duration.as_ref()).or_else(|| parse_secs(probe.format.duration.as_ref()))
}

/// Extract the `mean_volume` value from `volumedetect` stderr output.
pub fn parse_mean_volume(stderr: &str) -> Option<f64> {
    let line = stderr.lines().find(|l| l.contains("mean_volume:"))?;
    let value = line.split("mean_volume:").nth(1)?.trim();
    let value = value.trim_end_matches("dB").trim();
    if value == "-inf" {
        return Some(f64::NEG_INFINITY);
    }
    value.parse::<f64>().ok()
}
