//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::DEFAULT_SILENCE_THRESHOLD_DBFS;
use crate::error::CoreError;

/// Default subprocess timeout for every external engine.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
/// Default narration output path.
pub const DEFAULT_NARRATION_OUTPUT: &str = "output.wav";
/// Default Piper voice model.
pub const DEFAULT_PIPER_MODEL: &str = "en_US-lessac-medium.onnx";
/// Default name of the persisted scene script.
pub const DEFAULT_SCRIPT_NAME: &str = "generated_video.py";

/// Supported speech synthesis engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngineKind {
    Piper,
    Espeak,
}

impl SpeechEngineKind {
    pub fn default_program(self) -> &'static str {
        match self {
            Self::Piper => "piper",
            Self::Espeak => "espeak-ng",
        }
    }
}

impl FromStr for SpeechEngineKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piper" => Ok(Self::Piper),
            "espeak" | "espeak-ng" => Ok(Self::Espeak),
            other => Err(CoreError::InvalidInput(format!(
                "Unknown TTS engine '{other}'. Must be one of: piper, espeak"
            ))),
        }
    }
}

/// Render quality presets of the scene engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Production,
    FourK,
}

impl Quality {
    /// Command-line flag selecting this preset.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Low => "-ql",
            Self::Medium => "-qm",
            Self::High => "-qh",
            Self::Production => "-qp",
            Self::FourK => "-qk",
        }
    }

    /// Directory the engine writes this preset's videos into.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Low => "480p15",
            Self::Medium => "720p30",
            Self::High => "1080p60",
            Self::Production => "1440p60",
            Self::FourK => "2160p60",
        }
    }
}

impl FromStr for Quality {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Self::Low),
            "medium" | "m" => Ok(Self::Medium),
            "high" | "h" => Ok(Self::High),
            "production" | "p" => Ok(Self::Production),
            "fourk" | "4k" | "k" => Ok(Self::FourK),
            other => Err(CoreError::InvalidInput(format!(
                "Unknown render quality '{other}'. Must be one of: low, medium, high, production, fourk"
            ))),
        }
    }
}

/// Narration component configuration.
#[derive(Debug, Clone)]
pub struct NarrationConfig {
    pub engine: SpeechEngineKind,
    /// Engine binary (defaults per engine).
    pub program: String,
    /// Voice model passed to Piper. Ignored by eSpeak.
    pub model: String,
    /// Where the audio artifact is written.
    pub output_path: PathBuf,
    /// Loudness at or below this is treated as silence by `validate`.
    pub silence_threshold_dbfs: f64,
    pub timeout: Duration,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            engine: SpeechEngineKind::Piper,
            program: SpeechEngineKind::Piper.default_program().to_string(),
            model: DEFAULT_PIPER_MODEL.to_string(),
            output_path: PathBuf::from(DEFAULT_NARRATION_OUTPUT),
            silence_threshold_dbfs: DEFAULT_SILENCE_THRESHOLD_DBFS,
            timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
        }
    }
}

impl NarrationConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `TTS_ENGINE`             | `piper`                    |
    /// | `TTS_PROGRAM`            | engine default             |
    /// | `TTS_MODEL`              | `en_US-lessac-medium.onnx` |
    /// | `NARRATION_OUTPUT`       | `output.wav`               |
    /// | `SILENCE_THRESHOLD_DBFS` | `-35`                      |
    /// | `ENGINE_TIMEOUT_SECS`    | `600`                      |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let engine = match lookup("TTS_ENGINE") {
            Some(v) => v.parse()?,
            None => defaults.engine,
        };
        let program = lookup("TTS_PROGRAM").unwrap_or_else(|| engine.default_program().into());
        let model = lookup("TTS_MODEL").unwrap_or(defaults.model);
        let output_path = lookup("NARRATION_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_path);
        let silence_threshold_dbfs = parse_var(
            &lookup,
            "SILENCE_THRESHOLD_DBFS",
            defaults.silence_threshold_dbfs,
        )?;
        let timeout = Duration::from_secs(parse_var(
            &lookup,
            "ENGINE_TIMEOUT_SECS",
            DEFAULT_ENGINE_TIMEOUT_SECS,
        )?);

        Ok(Self {
            engine,
            program,
            model,
            output_path,
            silence_threshold_dbfs,
            timeout,
        })
    }
}

/// Rendering component configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Renderer binary.
    pub program: String,
    /// Arguments placed before the render arguments, e.g. `["-m", "manim"]`
    /// when `program` is a Python interpreter.
    pub program_args: Vec<String>,
    pub quality: Quality,
    /// Directory the script is written to and the engine runs in.
    pub work_dir: PathBuf,
    /// Media root, relative to `work_dir` unless absolute.
    pub media_dir: PathBuf,
    /// File name of the persisted scene script.
    pub script_name: String,
    pub timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: "manim".to_string(),
            program_args: Vec::new(),
            quality: Quality::Low,
            work_dir: PathBuf::from("."),
            media_dir: PathBuf::from("media"),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
            timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
        }
    }
}

impl RenderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default              |
    /// |-----------------------|----------------------|
    /// | `RENDER_PROGRAM`      | `manim`              |
    /// | `RENDER_PROGRAM_ARGS` | (none, space-split)  |
    /// | `RENDER_QUALITY`      | `low`                |
    /// | `RENDER_WORK_DIR`     | `.`                  |
    /// | `RENDER_MEDIA_DIR`    | `media`              |
    /// | `RENDER_SCRIPT_NAME`  | `generated_video.py` |
    /// | `ENGINE_TIMEOUT_SECS` | `600`                |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let program = lookup("RENDER_PROGRAM").unwrap_or(defaults.program);
        let program_args = lookup("RENDER_PROGRAM_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let quality = match lookup("RENDER_QUALITY") {
            Some(v) => v.parse()?,
            None => defaults.quality,
        };
        let work_dir = lookup("RENDER_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);
        let media_dir = lookup("RENDER_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.media_dir);
        let script_name = lookup("RENDER_SCRIPT_NAME").unwrap_or(defaults.script_name);
        if script_name.is_empty() || script_name.contains('/') || !script_name.ends_with(".py") {
            return Err(CoreError::InvalidInput(format!(
                "RENDER_SCRIPT_NAME must be a bare .py file name, got '{script_name}'"
            )));
        }
        let timeout = Duration::from_secs(parse_var(
            &lookup,
            "ENGINE_TIMEOUT_SECS",
            DEFAULT_ENGINE_TIMEOUT_SECS,
        )?);

        Ok(Self {
            program,
            program_args,
            quality,
            work_dir,
            media_dir,
            script_name,
            timeout,
        })
    }

    /// Absolute-or-work-dir-relative media root.
    pub fn media_root(&self) -> PathBuf {
        if self.media_dir.is_absolute() {
            self.media_dir.clone()
        } else {
            self.work_dir.join(&self.media_dir)
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.work_dir.join(&self.script_name)
    }

    /// Script file name without the `.py` extension.
    pub fn script_stem(&self) -> &str {
        self.script_name
            .strip_suffix(".py")
            .unwrap_or(&self.script_name)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            CoreError::InvalidInput(format!("{key} has an invalid value: '{raw}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn narration_defaults() {
        let config = NarrationConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.engine, SpeechEngineKind::Piper);
        assert_eq!(config.program, "piper");
        assert_eq!(config.output_path, PathBuf::from("output.wav"));
        assert_eq!(config.silence_threshold_dbfs, -35.0);
        assert_eq!(config.timeout, Duration::from_secs(600));
    }

    #[test]
    fn espeak_uses_its_own_program() {
        let config = NarrationConfig::from_lookup(lookup(&[("TTS_ENGINE", "espeak")]))
            .expect("config");
        assert_eq!(config.engine, SpeechEngineKind::Espeak);
        assert_eq!(config.program, "espeak-ng");
    }

    #[test]
    fn unknown_engine_rejected() {
        let result = NarrationConfig::from_lookup(lookup(&[("TTS_ENGINE", "festival")]));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn bad_timeout_rejected() {
        let result = RenderConfig::from_lookup(lookup(&[("ENGINE_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn render_overrides() {
        let config = RenderConfig::from_lookup(lookup(&[
            ("RENDER_PROGRAM", "python3"),
            ("RENDER_PROGRAM_ARGS", "-m manim"),
            ("RENDER_QUALITY", "high"),
            ("RENDER_WORK_DIR", "/tmp/render"),
            ("ENGINE_TIMEOUT_SECS", "30"),
        ]))
        .expect("config");
        assert_eq!(config.program, "python3");
        assert_eq!(config.program_args, vec!["-m", "manim"]);
        assert_eq!(config.quality, Quality::High);
        assert_eq!(config.media_root(), PathBuf::from("/tmp/render/media"));
        assert_eq!(config.script_path(), PathBuf::from("/tmp/render/generated_video.py"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn script_name_must_be_python_file() {
        let result = RenderConfig::from_lookup(lookup(&[("RENDER_SCRIPT_NAME", "../x.py")]));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
        let result = RenderConfig::from_lookup(lookup(&[("RENDER_SCRIPT_NAME", "scene.txt")]));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn script_stem_strips_extension() {
        assert_eq!(RenderConfig::default().script_stem(), "generated_video");
    }

    #[test]
    fn quality_flags_and_dirs() {
        assert_eq!(Quality::Low.flag(), "-ql");
        assert_eq!(Quality::Low.dir_name(), "480p15");
        assert_eq!("4k".parse::<Quality>().expect("quality"), Quality::FourK);
        assert_eq!(Quality::FourK.dir_name(), "2160p60");
        assert!("ultra".parse::<Quality>().is_err());
    }
}
