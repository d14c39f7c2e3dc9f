//! Audio loading and signal conditioning.

use crate::error::{AudioError, Result};
use crate::traits::Processor;
use hound::{SampleFormat, WavReader, WavSpec};
use rubato::{FftFixedIn, Resampler};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Sample rate the feature extraction and the models are built for (44.1kHz)
pub const SAMPLE_RATE: u32 = 44100;

/// Default attenuation in dB
const DEFAULT_ATT: f32 = 0.0;

/// Input block size for the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Signal conditioning options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SignalConfig {
    /// Normalize the signal to a peak amplitude of 1
    #[arg(long)]
    pub norm: bool,

    /// Attenuate the signal by this many dB
    #[arg(long, default_value_t = DEFAULT_ATT, value_name = "DB")]
    pub att: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            norm: false,
            att: DEFAULT_ATT,
        }
    }
}

/// Mono audio samples with their sample rate.
#[derive(Clone, Debug)]
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Signal {
    /// Duration of the signal in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Load audio from a WAV file.
///
/// Returns interleaved samples scaled to [-1, 1] and the WAV specification.
///
/// # Errors
///
/// Returns error if file cannot be read or has unsupported format.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<hound::Result<_>>()?
        }
    };

    Ok((samples, spec))
}

/// Average interleaved channels into a single channel.
pub fn downmix(samples: &[f32], channels: u16) -> Result<Vec<f32>> {
    match channels {
        0 => Err(AudioError::InvalidChannels(channels).into()),
        1 => Ok(samples.to_vec()),
        n => Ok(samples
            .chunks(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect()),
    }
}

/// Resample a single channel from `source_rate` to `target_rate`.
///
/// The resampler delay is removed, so the output has
/// `round(len * target_rate / source_rate)` samples aligned with the input.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        1,
        1,
    )?;

    let expected =
        (samples.len() as f64 * target_rate as f64 / source_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let mut output = vec![vec![0.0f32; resampler.output_frames_max()]; 1];
    let mut resampled = Vec::with_capacity(expected + delay);
    let mut chunk = vec![0.0f32; RESAMPLE_CHUNK];
    let mut position = 0;

    // Zero-padded blocks past the end flush the delay line.
    while resampled.len() < expected + delay {
        chunk.fill(0.0);
        if position < samples.len() {
            let end = (position + RESAMPLE_CHUNK).min(samples.len());
            chunk[..end - position].copy_from_slice(&samples[position..end]);
        }
        position += RESAMPLE_CHUNK;

        let input = [chunk.as_slice()];
        let (_, written) = resampler.process_into_buffer(&input, &mut output, None)?;
        resampled.extend_from_slice(&output[0][..written]);
    }

    resampled.drain(..delay);
    resampled.truncate(expected);

    Ok(resampled)
}

/// Decodes a file into a conditioned mono signal at [`SAMPLE_RATE`].
#[derive(Clone, Debug)]
pub struct SignalProcessor {
    config: SignalConfig,
}

impl SignalProcessor {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Apply normalization and attenuation in place.
    fn condition(&self, samples: &mut [f32]) {
        if self.config.norm {
            let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
            if peak > 0.0 {
                samples.iter_mut().for_each(|s| *s /= peak);
            }
        }

        if self.config.att != 0.0 {
            let gain = 10.0f32.powf(-self.config.att / 20.0);
            samples.iter_mut().for_each(|s| *s *= gain);
        }
    }
}

impl Processor for SignalProcessor {
    type Input = PathBuf;
    type Output = Signal;

    fn process(&mut self, path: PathBuf) -> Result<Signal> {
        let (samples, spec) = load_audio(&path)?;

        tracing::debug!(
            path = %path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            bits_per_sample = spec.bits_per_sample,
            format = ?spec.sample_format,
            "wav spec"
        );

        let mono = downmix(&samples, spec.channels)?;
        let mut samples = resample(&mono, spec.sample_rate, SAMPLE_RATE)?;
        self.condition(&mut samples);

        Ok(Signal {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }
}
