//! Tempo estimation from beat activations.
//!
//! A histogram over beat intervals (in frames) is built either with a bank of
//! resonating comb filters or with the autocorrelation of the smoothed
//! activation; its maximum is the dominant interval.

use crate::error::Result;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_stats::QuantileExt;
use serde::Serialize;
use std::f32::consts::PI;
use std::ops::RangeInclusive;

const DEFAULT_MIN_BPM: f32 = 40.0;
const DEFAULT_MAX_BPM: f32 = 240.0;
const DEFAULT_ACT_SMOOTH: f32 = 0.09;
const DEFAULT_HIST_SMOOTH: usize = 7;
const DEFAULT_ALPHA: f32 = 0.79;

/// Tempo histogram construction method.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoMethod {
    /// Resonating comb filter bank
    Comb,
    /// Autocorrelation
    Acf,
}

/// Tempo estimation options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TempoConfig {
    /// Method used to build the tempo histogram
    #[arg(long, value_enum, default_value_t = TempoMethod::Comb)]
    pub method: TempoMethod,

    /// Minimum tempo in beats per minute
    #[arg(long = "min-bpm", default_value_t = DEFAULT_MIN_BPM)]
    pub min_bpm: f32,

    /// Maximum tempo in beats per minute
    #[arg(long = "max-bpm", default_value_t = DEFAULT_MAX_BPM)]
    pub max_bpm: f32,

    /// Smooth the activations over this many seconds before building the histogram
    #[arg(long = "act-smooth", default_value_t = DEFAULT_ACT_SMOOTH, value_name = "SECS")]
    pub act_smooth: f32,

    /// Smooth the tempo histogram over this many bins
    #[arg(long = "hist-smooth", default_value_t = DEFAULT_HIST_SMOOTH, value_name = "BINS")]
    pub hist_smooth: usize,

    /// Feedback gain of the comb filters
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            method: TempoMethod::Comb,
            min_bpm: DEFAULT_MIN_BPM,
            max_bpm: DEFAULT_MAX_BPM,
            act_smooth: DEFAULT_ACT_SMOOTH,
            hist_smooth: DEFAULT_HIST_SMOOTH,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Create a symmetric Hamming window.
pub fn hamming_window(window_length: usize) -> Vec<f32> {
    if window_length < 2 {
        return vec![1.0; window_length];
    }

    (0..window_length)
        .map(|i| 0.54 - 0.46 * ((2.0 * PI * i as f32) / (window_length as f32 - 1.0)).cos())
        .collect()
}

/// Convolve `signal` with a Hamming kernel of `kernel_len`, keeping the input length.
pub fn smooth(signal: ArrayView1<'_, f32>, kernel_len: usize) -> Array1<f32> {
    if kernel_len <= 1 || signal.is_empty() {
        return signal.to_owned();
    }

    let kernel = hamming_window(kernel_len);
    let centre = (kernel_len - 1) / 2;
    let len = signal.len();

    Array1::from_shape_fn(len, |n| {
        kernel
            .iter()
            .enumerate()
            .filter_map(|(k, w)| {
                (n + centre)
                    .checked_sub(k)
                    .filter(|&j| j < len)
                    .map(|j| signal[j] * w)
            })
            .sum()
    })
}

/// Histogram over intervals using feedback comb filters `y[n] = x[n] + alpha * y[n - tau]`.
///
/// Every frame adds its maximum filter output to the bin of the winning interval.
fn comb_histogram(activations: ArrayView1<'_, f32>, taus: &[usize], alpha: f32) -> Array1<f32> {
    let len = activations.len();
    let mut filtered = Array2::<f32>::zeros((len, taus.len()));

    for (bin, &tau) in taus.iter().enumerate() {
        let mut column = filtered.column_mut(bin);
        for n in 0..len {
            let feedback = if n >= tau { alpha * column[n - tau] } else { 0.0 };
            column[n] = activations[n] + feedback;
        }
    }

    let mut histogram = Array1::<f32>::zeros(taus.len());
    for row in filtered.rows() {
        let max = row.iter().copied().fold(f32::MIN, f32::max);
        for (bin, &value) in row.iter().enumerate() {
            if value == max {
                histogram[bin] += value;
            }
        }
    }

    histogram
}

/// Histogram over intervals using the autocorrelation of the activations.
fn acf_histogram(activations: ArrayView1<'_, f32>, taus: &[usize]) -> Array1<f32> {
    let len = activations.len();

    taus.iter()
        .map(|&tau| {
            (tau..len)
                .map(|n| activations[n] * activations[n - tau])
                .sum::<f32>()
        })
        .collect()
}

/// Estimates the dominant beat interval of an activation function.
#[derive(Clone, Copy, Debug)]
pub struct TempoEstimator {
    config: TempoConfig,
    fps: f32,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig, fps: f32) -> Self {
        Self { config, fps }
    }

    /// Interval range in frames for the configured tempo range.
    pub fn intervals(&self) -> RangeInclusive<usize> {
        let min = ((60.0 * self.fps / self.config.max_bpm).floor() as usize).max(1);
        let max = (60.0 * self.fps / self.config.min_bpm).ceil() as usize;
        min..=max
    }

    /// Smoothed interval histogram with the interval of its first bin.
    ///
    /// Intervals are limited to the activation length; `None` when no
    /// interval of the configured range fits.
    pub fn histogram(&self, activations: ArrayView1<'_, f32>) -> Option<(Array1<f32>, usize)> {
        let range = self.intervals();
        let max_tau = (*range.end()).min(activations.len().saturating_sub(1));
        let taus: Vec<usize> = (*range.start()..=max_tau).collect();
        let &min_tau = taus.first()?;

        let kernel = (self.config.act_smooth * self.fps).round() as usize;
        let smoothed = smooth(activations, kernel);

        let histogram = match self.config.method {
            TempoMethod::Comb => comb_histogram(smoothed.view(), &taus, self.config.alpha),
            TempoMethod::Acf => acf_histogram(smoothed.view(), &taus),
        };

        Some((smooth(histogram.view(), self.config.hist_smooth), min_tau))
    }

    /// Dominant beat interval in frames.
    pub fn dominant_interval(&self, activations: ArrayView1<'_, f32>) -> Result<Option<usize>> {
        let Some((histogram, min_tau)) = self.histogram(activations) else {
            return Ok(None);
        };

        let bin = histogram.argmax()?;
        tracing::trace!(interval = min_tau + bin, "dominant interval");

        Ok(Some(min_tau + bin))
    }

    /// Tempo in beats per minute of a beat interval in frames.
    pub fn bpm(&self, interval: usize) -> f32 {
        60.0 * self.fps / interval as f32
    }
}
