//! Audio inspection: duration and loudness of generated narration.
//!
//! WAV files are decoded in-process with `hound`; anything else goes through
//! ffprobe/ffmpeg.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::ffmpeg;

/// Loudness at or below this level (dBFS) is treated as silence.
pub const DEFAULT_SILENCE_THRESHOLD_DBFS: f64 = -35.0;

/// Measured properties of an audio file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioStats {
    pub duration_secs: f64,
    /// RMS level relative to full scale. `-inf` for digital silence.
    pub dbfs: f64,
}

/// Whether `dbfs` is indistinguishable from silence at `threshold`.
pub fn is_silent(dbfs: f64, threshold: f64) -> bool {
    // NaN and -inf both count as silent.
    dbfs.is_nan() || dbfs <= threshold
}

/// RMS level in dBFS of samples normalized to `[-1.0, 1.0]`.
pub fn rms_dbfs<I>(samples: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum_sq, count) = samples
        .into_iter()
        .fold((0.0f64, 0u64), |(sum, n), s| (sum + s * s, n + 1));
    if count == 0 || sum_sq == 0.0 {
        return f64::NEG_INFINITY;
    }
    let rms = (sum_sq / count as f64).sqrt();
    20.0 * rms.log10()
}

/// Decode a WAV file and measure its duration and loudness.
pub fn analyze_wav(path: &Path) -> Result<AudioStats, CoreError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| CoreError::Probe(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();

    let duration_secs = if spec.sample_rate == 0 {
        0.0
    } else {
        f64::from(reader.duration()) / f64::from(spec.sample_rate)
    };

    let dbfs = match spec.sample_format {
        hound::SampleFormat::Float => {
            let samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            let samples = samples.map_err(|e| CoreError::Probe(e.to_string()))?;
            rms_dbfs(samples.into_iter().map(f64::from))
        }
        hound::SampleFormat::Int => {
            let full_scale = f64::from(1u32 << (spec.bits_per_sample.saturating_sub(1)));
            let samples: Result<Vec<i32>, _> = reader.samples::<i32>().collect();
            let samples = samples.map_err(|e| CoreError::Probe(e.to_string()))?;
            rms_dbfs(samples.into_iter().map(|s| f64::from(s) / full_scale))
        }
    };

    Ok(AudioStats {
        duration_secs,
        dbfs,
    })
}

/// Measure any audio file: WAV in-process, other formats via ffmpeg.
///
/// `timeout` bounds each ffprobe/ffmpeg call.
pub async fn analyze(path: &Path, timeout: Duration) -> Result<AudioStats, CoreError> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    if is_wav {
        let owned = path.to_path_buf();
        return tokio::task::spawn_blocking(move || analyze_wav(&owned))
            .await
            .map_err(|e| CoreError::Probe(e.to_string()))?;
    }

    let probe = ffmpeg::probe_media(path, timeout).await?;
    let duration_secs = ffmpeg::parse_audio_duration(&probe).ok_or_else(|| {
        CoreError::Probe(format!("{} has no audio stream", path.display()))
    })?;
    let dbfs = ffmpeg::mean_volume(path, timeout).await?;

    Ok(AudioStats {
        duration_secs,
        dbfs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn full_scale_square_wave_is_zero_dbfs() {
        let dbfs = rms_dbfs([1.0, -1.0, 1.0, -1.0]);
        assert!(dbfs.abs() < 1e-9);
    }

    #[test]
    fn half_amplitude_is_about_minus_six() {
        let dbfs = rms_dbfs([0.5, -0.5]);
        assert!((dbfs + 6.0206).abs() < 0.001);
    }

    #[test]
    fn empty_and_zero_are_negative_infinity() {
        assert_eq!(rms_dbfs(Vec::<f64>::new()), f64::NEG_INFINITY);
        assert_eq!(rms_dbfs([0.0, 0.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn silence_threshold() {
        assert!(is_silent(f64::NEG_INFINITY, DEFAULT_SILENCE_THRESHOLD_DBFS));
        assert!(is_silent(-35.0, DEFAULT_SILENCE_THRESHOLD_DBFS));
        assert!(is_silent(f64::NAN, DEFAULT_SILENCE_THRESHOLD_DBFS));
        assert!(!is_silent(-20.0, DEFAULT_SILENCE_THRESHOLD_DBFS));
    }

    #[test]
    fn analyze_tone_wav() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..16_000)
            .map(|i| {
                let t = i as f64 / 16_000.0;
                ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 16_000.0) as i16
            })
            .collect();
        write_wav(&path, &samples, 16_000);

        let stats = analyze_wav(&path).expect("analyze");
        assert!((stats.duration_secs - 1.0).abs() < 1e-6);
        // Sine at ~0.49 of full scale: about -9.2 dBFS.
        assert!(stats.dbfs > -10.0 && stats.dbfs < -8.0, "dbfs = {}", stats.dbfs);
    }

    #[test]
    fn analyze_silent_wav() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("silence.wav");
        write_wav(&path, &[0; 8_000], 8_000);

        let stats = analyze_wav(&path).expect("analyze");
        assert!((stats.duration_secs - 1.0).abs() < 1e-6);
        assert_eq!(stats.dbfs, f64::NEG_INFINITY);
    }

    #[tokio::test]
    async fn analyze_decodes_wav_without_ffmpeg() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tone.WAV");
        write_wav(&path, &[8_000, -8_000].repeat(4_000), 8_000);

        let stats = analyze(&path, Duration::from_secs(5)).await.expect("analyze");
        assert!((stats.duration_secs - 1.0).abs() < 1e-6);
        assert!(stats.dbfs > -13.0 && stats.dbfs < -11.0, "dbfs = {}", stats.dbfs);
    }

    #[test]
    fn analyze_rejects_non_wav_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not a riff file").expect("write");
        assert!(matches!(analyze_wav(&path), Err(CoreError::Probe(_))));
    }
}
