//! Audio file reading using symphonia
//!
//! Decodes the whole file into interleaved f32 samples at the file's native
//! rate and channel count. No resampling or downmix happens here; the
//! analyzer decides how channels are combined.

use crate::analysis::{analyze, LoudnessMeasurement};
use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Fully decoded audio
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Decode an audio file
pub fn read_audio(path: &Path) -> Result<AudioBuffer> {
    let decode_err = |detail: String| Error::Decode {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(format!("unsupported format: {:?}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| decode_err("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("unsupported codec: {:?}", e)))?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(format!("{:?}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = %path.display(), error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(decode_err(format!("{:?}", e))),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    let audio = AudioBuffer {
        samples,
        channels,
        sample_rate,
    };
    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = audio.frames(),
        "Decoded audio file"
    );
    Ok(audio)
}

/// Decode and analyze an audio file
pub fn analyze_file(path: &Path) -> Result<LoudnessMeasurement> {
    let audio = read_audio(path)?;
    analyze(&audio.samples, audio.channels, audio.sample_rate)
}

/// Measures a rendered file
pub trait Meter: Send + Sync {
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement>;
}

/// [`Meter`] that decodes the file and runs the analyzer
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMeter;

impl Meter for FileMeter {
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement> {
        analyze_file(path)
    }
}
