//! WAV file I/O in the device's 24-bit-in-32-bit sample convention.
//!
//! The pedal stores packed 24-bit PCM, so the whole pipeline carries
//! samples as 32-bit integers whose useful range is the top 24 bits
//! (`0xXXXXXX00`). Reading scales every supported source format into that
//! range; writing emits the 32-bit values as-is.
//!
//! Only 44.1 kHz input is accepted: the device knows no other rate and
//! resampling is out of scope.

use std::fmt;
use std::path::Path;

use crate::protocol::SAMPLE_RATE;

/// 24-bit full scale, the ceiling for float sources.
const FLOAT_FULL_SCALE: f32 = 8_388_607.0;

// ── Error type ──

#[derive(Debug)]
pub enum WavError {
    CannotOpen(String),
    InvalidRiff(String),
    UnsupportedSampleRate(u32),
    UnsupportedFormat(String),
}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavError::CannotOpen(e) => write!(f, "Cannot open file: {e}"),
            WavError::InvalidRiff(e) => write!(f, "Invalid WAV file: {e}"),
            WavError::UnsupportedSampleRate(rate) => {
                write!(f, "Unsupported sample rate {rate} Hz (only 44100 Hz)")
            }
            WavError::UnsupportedFormat(e) => write!(f, "Unsupported WAV format: {e}"),
        }
    }
}

impl std::error::Error for WavError {}

pub type Result<T> = std::result::Result<T, WavError>;

fn from_hound(e: hound::Error) -> WavError {
    match e {
        hound::Error::IoError(e) => WavError::CannotOpen(e.to_string()),
        hound::Error::FormatError(msg) => WavError::InvalidRiff(msg.into()),
        hound::Error::Unsupported => WavError::UnsupportedFormat("unsupported encoding".into()),
        e => WavError::InvalidRiff(e.to_string()),
    }
}

// ── Source formats ──

/// The PCM encodings we accept, resolved once from the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Pcm16,
    Pcm24,
    Pcm32,
    Float32,
}

impl SourceFormat {
    fn detect(spec: &hound::WavSpec) -> Result<Self> {
        match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => Ok(SourceFormat::Pcm16),
            (hound::SampleFormat::Int, 24) => Ok(SourceFormat::Pcm24),
            (hound::SampleFormat::Int, 32) => Ok(SourceFormat::Pcm32),
            (hound::SampleFormat::Float, 32) => Ok(SourceFormat::Float32),
            (format, bits) => Err(WavError::UnsupportedFormat(format!(
                "{bits}-bit {format:?} samples"
            ))),
        }
    }
}

/// Scale one integer source sample into the internal range.
///
/// 16-bit shifts by 8, not 16: full scale must land on the 24-bit maximum
/// the encoder later packs, not the 32-bit one.
fn scale_int(format: SourceFormat, v: i32) -> i32 {
    match format {
        SourceFormat::Pcm16 => v << 8,
        // 24-bit arrives sign-extended, 32-bit passes through.
        SourceFormat::Pcm24 | SourceFormat::Pcm32 => v,
        SourceFormat::Float32 => unreachable!("float handled separately"),
    }
}

fn scale_float(v: f32) -> i32 {
    (v.clamp(-1.0, 1.0) * FLOAT_FULL_SCALE) as i32
}

/// Equal-power mono-to-stereo: attenuate by 3 dB, duplicate across L/R.
fn mono_to_stereo(samples: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (f64::from(s) * std::f64::consts::FRAC_1_SQRT_2).round() as i32;
        out.push(scaled);
        out.push(scaled);
    }
    out
}

// ── Read / write ──

/// Read a WAV file into 32-bit interleaved stereo at 44.1 kHz.
///
/// Accepts 16/24/32-bit integer and 32-bit float PCM, mono or stereo.
/// Any sample rate other than 44100 Hz is rejected.
pub fn read_wav(path: &Path) -> Result<Vec<i32>> {
    let mut reader = hound::WavReader::open(path).map_err(from_hound)?;
    let spec = reader.spec();

    if spec.sample_rate != SAMPLE_RATE {
        return Err(WavError::UnsupportedSampleRate(spec.sample_rate));
    }
    if spec.channels == 0 || spec.channels > 2 {
        return Err(WavError::UnsupportedFormat(format!(
            "{} channels",
            spec.channels
        )));
    }
    let format = SourceFormat::detect(&spec)?;

    let samples: Vec<i32> = match format {
        SourceFormat::Float32 => reader
            .samples::<f32>()
            .map(|s| s.map(scale_float).map_err(from_hound))
            .collect::<Result<_>>()?,
        int_format => reader
            .samples::<i32>()
            .map(|s| s.map(|v| scale_int(int_format, v)).map_err(from_hound))
            .collect::<Result<_>>()?,
    };

    if spec.channels == 1 {
        Ok(mono_to_stereo(&samples))
    } else {
        Ok(samples)
    }
}

/// Write 32-bit interleaved stereo samples as a 44.1 kHz / 2 ch / 32-bit
/// PCM WAV file.
pub fn write_wav(path: &Path, samples: &[i32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(from_hound)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(from_hound)?;
    }
    writer.finalize().map_err(from_hound)
}
