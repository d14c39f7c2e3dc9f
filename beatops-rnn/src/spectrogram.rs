//! Framing, STFT and the stacked spectrogram features.
//!
//! Features for one frame size are the log-compressed, filtered magnitude
//! spectrogram next to its positive frame difference. Frame sizes are stacked
//! side by side, so all of them share the same frame rate.

use crate::audio::{SAMPLE_RATE, Signal};
use crate::error::{ConfigError, Result};
use crate::filterbank::{FilterConfig, LogFilterbank};
use crate::traits::Processor;
use ndarray::{Array2, ArrayView2, Axis, s};
use rustfft::{FftPlanner, num_complex::Complex};
use serde::Serialize;
use std::f32::consts::PI;

/// Default frame rate in frames per second
const DEFAULT_FPS: f32 = 100.0;

/// Default frame sizes in samples
const DEFAULT_FRAME_SIZES: [usize; 3] = [1024, 2048, 4096];

/// Default log multiplier
const DEFAULT_MUL: f32 = 1.0;

/// Default value added before taking the logarithm
const DEFAULT_ADD: f32 = 1.0;

/// Default window ratio for the difference distance
const DEFAULT_DIFF_RATIO: f32 = 0.5;

/// Framing options.
#[derive(clap::Args, Clone, Debug, PartialEq, Serialize)]
pub struct FramingConfig {
    /// Frame rate in frames per second
    #[arg(long, default_value_t = DEFAULT_FPS)]
    pub fps: f32,

    /// Frame sizes in samples (repeat or separate with commas)
    #[arg(
        long = "frame-size",
        value_name = "SAMPLES",
        value_delimiter = ',',
        default_values_t = DEFAULT_FRAME_SIZES
    )]
    pub frame_sizes: Vec<usize>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            frame_sizes: DEFAULT_FRAME_SIZES.to_vec(),
        }
    }
}

impl FramingConfig {
    /// Hop size in samples; fractional when the sample rate is not a multiple of fps.
    pub fn hop_size(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.fps as f64
    }
}

/// Logarithmic magnitude compression options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LogConfig {
    /// Multiply the magnitudes by this factor before taking the logarithm
    #[arg(long, default_value_t = DEFAULT_MUL)]
    pub mul: f32,

    /// Add this value before taking the logarithm
    #[arg(long, default_value_t = DEFAULT_ADD)]
    pub add: f32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            mul: DEFAULT_MUL,
            add: DEFAULT_ADD,
        }
    }
}

/// Spectrogram difference options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DiffConfig {
    /// Window magnitude ratio that sets the distance between differenced frames
    #[arg(long = "diff-ratio", default_value_t = DEFAULT_DIFF_RATIO)]
    pub diff_ratio: f32,

    /// Keep negative differences instead of clipping them to zero
    #[arg(long = "no-positive-diffs", action = clap::ArgAction::SetFalse)]
    pub positive_diffs: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            diff_ratio: DEFAULT_DIFF_RATIO,
            positive_diffs: true,
        }
    }
}

/// Create a symmetric Hann window.
pub fn hann_window(window_length: usize) -> Vec<f32> {
    if window_length < 2 {
        return vec![1.0; window_length];
    }

    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (window_length as f32 - 1.0)).cos())
        .collect()
}

/// Number of frames covering `num_samples` at the given hop size.
pub fn num_frames(num_samples: usize, hop_size: f64) -> usize {
    (num_samples as f64 / hop_size).ceil() as usize
}

/// Compute the STFT magnitude spectrogram.
///
/// Frame `i` is centred on sample `floor(i * hop_size)`; samples outside the
/// signal are zero. Returns `(num_frames, frame_size / 2)` magnitudes.
pub fn magnitude_spectrogram(samples: &[f32], frame_size: usize, hop_size: f64) -> Array2<f32> {
    let window = hann_window(frame_size);
    let frames = num_frames(samples.len(), hop_size);
    let mut spectrogram = Array2::<f32>::zeros((frames, frame_size / 2));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame_size);
    let mut buffer = vec![Complex::new(0.0, 0.0); frame_size];

    for (frame_idx, mut row) in spectrogram.outer_iter_mut().enumerate() {
        let start = (frame_idx as f64 * hop_size).floor() as isize - (frame_size / 2) as isize;

        for (i, (slot, w)) in buffer.iter_mut().zip(window.iter()).enumerate() {
            let position = start + i as isize;
            let sample = usize::try_from(position)
                .ok()
                .and_then(|p| samples.get(p))
                .copied()
                .unwrap_or(0.0);
            *slot = Complex::new(sample * w, 0.0);
        }

        fft.process(&mut buffer);

        for (magnitude, bin) in row.iter_mut().zip(buffer.iter()) {
            *magnitude = bin.norm();
        }
    }

    spectrogram
}

/// Distance in frames between the frames subtracted by [`difference`].
///
/// Derived from the first window sample exceeding `diff_ratio` of the window
/// maximum; at least one frame.
pub fn diff_frames(diff_ratio: f32, frame_size: usize, hop_size: f64) -> usize {
    let window = hann_window(frame_size);
    let max = window.iter().copied().fold(0.0f32, f32::max);
    let sample = window
        .iter()
        .position(|&w| w > diff_ratio * max)
        .unwrap_or(0);
    let diff_samples = frame_size as f64 / 2.0 - sample as f64;

    ((diff_samples / hop_size).round() as usize).max(1)
}

/// Frame difference `spec[t] - spec[t - frames]`, zero for the first `frames` rows.
pub fn difference(spectrogram: ArrayView2<'_, f32>, frames: usize, positive: bool) -> Array2<f32> {
    let mut diff = Array2::<f32>::zeros(spectrogram.raw_dim());
    let num_frames = spectrogram.nrows();

    if frames < num_frames {
        let mut tail = diff.slice_mut(s![frames.., ..]);
        tail.assign(&spectrogram.slice(s![frames.., ..]));
        tail -= &spectrogram.slice(s![..num_frames - frames, ..]);
    }

    if positive {
        diff.mapv_inplace(|v| v.max(0.0));
    }

    diff
}

/// Per frame size state: filterbank and difference distance.
#[derive(Clone, Debug)]
struct FrameSizeStage {
    frame_size: usize,
    filterbank: LogFilterbank,
    diff_frames: usize,
}

/// Turns a signal into the stacked `(frames, features)` feature matrix.
#[derive(Clone, Debug)]
pub struct StackedSpectrogramProcessor {
    hop_size: f64,
    sample_rate: u32,
    log: LogConfig,
    positive_diffs: bool,
    stages: Vec<FrameSizeStage>,
}

impl StackedSpectrogramProcessor {
    /// Build filterbanks and difference distances for every frame size.
    pub fn new(
        framing: &FramingConfig,
        filter: &FilterConfig,
        log: LogConfig,
        diff: DiffConfig,
    ) -> Result<Self> {
        if framing.frame_sizes.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "frame-size",
                reason: "at least one frame size is required".to_string(),
            }
            .into());
        }

        let sample_rate = SAMPLE_RATE;
        let hop_size = framing.hop_size(sample_rate);

        let stages = framing
            .frame_sizes
            .iter()
            .map(|&frame_size| -> Result<FrameSizeStage> {
                Ok(FrameSizeStage {
                    frame_size,
                    filterbank: LogFilterbank::new(filter, frame_size, sample_rate)?,
                    diff_frames: diff_frames(diff.diff_ratio, frame_size, hop_size),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hop_size,
            sample_rate,
            log,
            positive_diffs: diff.positive_diffs,
            stages,
        })
    }

    /// Total number of features per frame.
    pub fn num_features(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| 2 * stage.filterbank.num_bands())
            .sum()
    }

    fn stage_features(&self, stage: &FrameSizeStage, samples: &[f32]) -> Array2<f32> {
        let spectrogram = magnitude_spectrogram(samples, stage.frame_size, self.hop_size);
        let filtered = spectrogram.dot(&stage.filterbank.matrix);
        let LogConfig { mul, add } = self.log;
        let log = filtered.mapv(|x| (mul * x + add).log10());
        let diff = difference(log.view(), stage.diff_frames, self.positive_diffs);

        tracing::trace!(
            frame_size = stage.frame_size,
            frames = log.nrows(),
            bands = log.ncols(),
            diff_frames = stage.diff_frames,
            "spectrogram computed"
        );

        let mut features = Array2::<f32>::zeros((log.nrows(), 2 * log.ncols()));
        features.slice_mut(s![.., ..log.ncols()]).assign(&log);
        features.slice_mut(s![.., log.ncols()..]).assign(&diff);
        features
    }
}

impl Processor for StackedSpectrogramProcessor {
    type Input = Signal;
    type Output = Array2<f32>;

    fn process(&mut self, signal: Signal) -> Result<Array2<f32>> {
        if signal.sample_rate != self.sample_rate {
            return Err(ConfigError::InvalidValue {
                name: "sample_rate",
                reason: format!(
                    "expected {}Hz signal, got {}Hz",
                    self.sample_rate, signal.sample_rate
                ),
            }
            .into());
        }

        let parts: Vec<Array2<f32>> = self
            .stages
            .iter()
            .map(|stage| self.stage_features(stage, &signal.samples))
            .collect();
        let views: Vec<ArrayView2<'_, f32>> = parts.iter().map(|part| part.view()).collect();
        let features = ndarray::concatenate(Axis(1), &views)?;

        tracing::debug!(
            frames = features.nrows(),
            features = features.ncols(),
            "features stacked"
        );

        Ok(features)
    }
}
