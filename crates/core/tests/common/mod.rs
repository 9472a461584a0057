//! Shared helpers for core integration tests: fixture audio and fake engines.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use voxreel_core::config::RenderConfig;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Write a mono 16-bit 440 Hz tone of `secs` seconds.
pub fn write_tone_wav(path: &Path, secs: f64, amplitude: i16) {
    let sample_rate = 22_050u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    let total = (secs * sample_rate as f64) as usize;
    for i in 0..total {
        let t = i as f64 / sample_rate as f64;
        let s = (2.0 * std::f64::consts::PI * 440.0 * t).sin() * amplitude as f64;
        writer.write_sample(s as i16).expect("write sample");
    }
    writer.finalize().expect("finalize");
}

/// Write an executable-by-bash script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/bash\n{body}")).expect("write script");
    path
}

/// A stand-in for Piper: drains stdin and copies `fixture` to `--output_file`.
pub fn fake_piper(dir: &Path, fixture: &Path) -> PathBuf {
    write_script(
        dir,
        "fake_piper.sh",
        &format!(
            r#"
OUT=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output_file) OUT="$2"; shift 2 ;;
    *) shift ;;
  esac
done
TEXT=$(cat)
if [ -z "$TEXT" ]; then echo "no text on stdin" >&2; exit 1; fi
cp "{fixture}" "$OUT"
"#,
            fixture = fixture.display()
        ),
    )
}

/// A stand-in for the scene renderer.
///
/// Fails like the real engine when the requested scene class is not in the
/// script. With `real_video` it encodes a solid-colour clip lasting the first
/// `wait(N)` in the script using ffmpeg; otherwise it writes placeholder bytes.
pub fn fake_renderer(dir: &Path, real_video: bool) -> PathBuf {
    let produce = if real_video {
        r#"ffmpeg -y -loglevel error -f lavfi -i "color=c=blue:s=160x120:r=15:d=$DURATION" -c:v mpeg4 "$OUT/$SCENE.mp4""#
    } else {
        r#"printf 'fake-mp4-data' > "$OUT/$SCENE.mp4""#
    };
    write_script(
        dir,
        "fake_renderer.sh",
        &format!(
            r#"
set -e
MEDIA=media
QUALITY_DIR=480p15
POSITIONAL=()
while [ $# -gt 0 ]; do
  case "$1" in
    --media_dir) MEDIA="$2"; shift 2 ;;
    -ql) QUALITY_DIR=480p15; shift ;;
    -qm) QUALITY_DIR=720p30; shift ;;
    -qh) QUALITY_DIR=1080p60; shift ;;
    *) POSITIONAL+=("$1"); shift ;;
  esac
done
SCRIPT="${{POSITIONAL[0]}}"
SCENE="${{POSITIONAL[1]:-}}"
if [ -z "$SCENE" ] || ! grep -Eq "^[[:space:]]*class[[:space:]]+$SCENE\(" "$SCRIPT"; then
  echo "SyntaxError: no scene could be loaded from $SCRIPT" >&2
  exit 1
fi
DURATION=$(grep -Eo 'wait\([0-9]+\)' "$SCRIPT" | grep -Eo '[0-9]+' | head -n 1 || true)
DURATION=${{DURATION:-1}}
STEM=$(basename "$SCRIPT" .py)
OUT="$MEDIA/videos/$STEM/$QUALITY_DIR"
mkdir -p "$OUT/partial_movie_files/$SCENE"
{produce}
"#
        ),
    )
}

/// Render configuration running `fake_renderer` inside `work_dir`.
pub fn render_config(work_dir: &Path, renderer_script: &Path) -> RenderConfig {
    RenderConfig {
        program: "bash".to_string(),
        program_args: vec![renderer_script.to_string_lossy().into_owned()],
        work_dir: work_dir.to_path_buf(),
        timeout: TEST_TIMEOUT,
        ..RenderConfig::default()
    }
}

/// All non-empty `.mp4` files under `root`, ignoring partial fragments.
pub fn mp4_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                if !path.ends_with("partial_movie_files") {
                    stack.push(path);
                }
            } else if path.extension().is_some_and(|e| e == "mp4") {
                found.push(path);
            }
        }
    }
    found
}

fn has_binary(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("-version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Whether `ffmpeg` and `ffprobe` are on `PATH`.
pub fn ffmpeg_available() -> bool {
    has_binary("ffmpeg") && has_binary("ffprobe")
}

/// Whether the local ffmpeg can encode with `encoder`.
pub fn ffmpeg_has_encoder(encoder: &str) -> bool {
    std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .is_ok_and(|o| String::from_utf8_lossy(&o.stdout).contains(encoder))
}
