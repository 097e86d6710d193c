//! Loudness analysis of decoded audio
//!
//! **Purpose:** Measure integrated loudness (BS.1770 gated), sample peak and
//! true peak of an interleaved f32 buffer.
//!
//! **Levels:**
//! - Integrated loudness: channels averaged to mono, then metered by `ebur128`
//! - Sample peak: largest absolute sample over all channels
//! - True peak: largest absolute value of each channel oversampled 4x with a
//!   Hann-windowed sinc interpolator; never reported below the sample peak
//!
//! Silence is not an error: levels come back as `-inf`. Non-finite levels
//! serialize as JSON `null` and read back as `-inf`.

use crate::error::{Error, Result};
use ebur128::{EbuR128, Mode};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Oversampling factor for true-peak estimation
const OVERSAMPLE: usize = 4;

/// Interpolator half-length in input samples
const HALF_TAPS: usize = 6;

/// Measured levels of one rendered file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    /// Integrated loudness (LUFS)
    #[serde(with = "finite_or_null")]
    pub integrated_lufs: f64,

    /// Sample peak (dBFS)
    #[serde(with = "finite_or_null")]
    pub sample_peak_dbfs: f64,

    /// Estimated true peak (dBTP)
    #[serde(with = "finite_or_null")]
    pub true_peak_dbtp: f64,

    /// Duration in seconds
    pub duration_s: f64,

    pub sample_rate: u32,

    pub channel_count: usize,
}

/// Serde adapter mapping non-finite levels to `null` and `null` back to `-inf`
pub mod finite_or_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

/// Linear amplitude to decibels; zero maps to `-inf`
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

/// Analyze an interleaved buffer.
///
/// # Errors
/// - [`Error::EmptyAudio`] if the buffer holds no complete frame
/// - [`Error::Meter`] if the loudness meter rejects the format
pub fn analyze(samples: &[f32], channels: usize, sample_rate: u32) -> Result<LoudnessMeasurement> {
    if samples.is_empty() {
        return Err(Error::EmptyAudio);
    }
    if channels == 0 || sample_rate == 0 {
        return Err(Error::Meter(format!(
            "invalid stream format: {} channels at {} Hz",
            channels, sample_rate
        )));
    }
    let frames = samples.len() / channels;
    if frames == 0 {
        return Err(Error::EmptyAudio);
    }
    let samples = &samples[..frames * channels];

    let integrated_lufs = integrated_loudness(samples, channels, sample_rate)?;
    let sample_peak = sample_peak(samples);
    let true_peak = (0..channels)
        .map(|ch| {
            let channel: Vec<f32> = samples.iter().skip(ch).step_by(channels).copied().collect();
            oversampled_peak(&channel)
        })
        .fold(sample_peak, f64::max);

    Ok(LoudnessMeasurement {
        integrated_lufs,
        sample_peak_dbfs: amplitude_to_db(sample_peak),
        true_peak_dbtp: amplitude_to_db(true_peak),
        duration_s: frames as f64 / sample_rate as f64,
        sample_rate,
        channel_count: channels,
    })
}

fn integrated_loudness(samples: &[f32], channels: usize, sample_rate: u32) -> Result<f64> {
    let mono: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    let mut meter =
        EbuR128::new(1, sample_rate, Mode::I).map_err(|e| Error::Meter(format!("{:?}", e)))?;
    meter
        .add_frames_f32(&mono)
        .map_err(|e| Error::Meter(format!("{:?}", e)))?;
    let lufs = meter
        .loudness_global()
        .map_err(|e| Error::Meter(format!("{:?}", e)))?;

    // Fully gated programme (silence, or shorter than one block)
    if lufs.is_nan() {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(lufs)
}

fn sample_peak(samples: &[f32]) -> f64 {
    samples
        .iter()
        .map(|s| (*s as f64).abs())
        .fold(0.0, f64::max)
}

/// Polyphase coefficients: `COEFFS[p][j]` weights input `n + j - (HALF_TAPS - 1)`
/// for output position `n + p / OVERSAMPLE`.
fn interpolation_coefficients() -> Vec<Vec<f64>> {
    (0..OVERSAMPLE)
        .map(|phase| {
            let frac = phase as f64 / OVERSAMPLE as f64;
            (0..2 * HALF_TAPS)
                .map(|j| {
                    let offset = j as f64 - (HALF_TAPS as f64 - 1.0);
                    windowed_sinc(frac - offset)
                })
                .collect()
        })
        .collect()
}

fn windowed_sinc(x: f64) -> f64 {
    let half = HALF_TAPS as f64;
    if x.abs() >= half {
        return 0.0;
    }
    let sinc = if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) };
    let hann = 0.5 * (1.0 + (PI * x / half).cos());
    sinc * hann
}

/// Peak absolute value of one channel after 4x interpolation
fn oversampled_peak(channel: &[f32]) -> f64 {
    let coeffs = interpolation_coefficients();
    let len = channel.len() as isize;
    let mut peak = 0.0f64;

    for n in 0..len {
        peak = peak.max((channel[n as usize] as f64).abs());
        for taps in coeffs.iter().skip(1) {
            let mut acc = 0.0;
            for (j, c) in taps.iter().enumerate() {
                let idx = n + j as isize - (HALF_TAPS as isize - 1);
                if (0..len).contains(&idx) {
                    acc += channel[idx as usize] as f64 * c;
                }
            }
            peak = peak.max(acc.abs());
        }
    }
    peak
}
