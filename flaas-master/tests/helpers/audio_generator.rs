//! Deterministic WAV files for analyzer tests

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Stereo 16-bit sine at `amplitude` (0.0-1.0) of full scale
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let frames = (sample_rate as u64 * duration_ms) / 1000;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let sample = (amplitude * (2.0 * PI * frequency_hz * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }

    writer.finalize()
}

/// Stereo 16-bit silence
pub fn generate_silent_wav<P: AsRef<Path>>(path: P, sample_rate: u32, duration_ms: u64) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let samples = (sample_rate as u64 * duration_ms) / 1000 * 2;
    for _ in 0..samples {
        writer.write_sample(0i16)?;
    }

    writer.finalize()
}

/// Interleaved f32 sine, for feeding the analyzer directly
pub fn sine_samples(sample_rate: u32, channels: usize, seconds: f32, frequency_hz: f32, amplitude: f32) -> Vec<f32> {
    let frames = (sample_rate as f32 * seconds) as usize;
    let mut out = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        let v = amplitude * (2.0 * PI * frequency_hz * n as f32 / sample_rate as f32).sin();
        for _ in 0..channels {
            out.push(v);
        }
    }
    out
}
