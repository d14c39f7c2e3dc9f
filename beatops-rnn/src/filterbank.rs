//! Logarithmically spaced triangular filterbank.

use crate::error::{ConfigError, Result};
use ndarray::Array2;
use serde::Serialize;

/// Default number of bands per octave
const DEFAULT_BANDS: usize = 3;

/// Default lowest filter frequency in Hz
const DEFAULT_FMIN: f32 = 30.0;

/// Default highest filter frequency in Hz
const DEFAULT_FMAX: f32 = 17000.0;

/// Tuning reference the band frequencies are aligned to
const REFERENCE_FREQUENCY: f32 = 440.0;

/// Filterbank options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FilterConfig {
    /// Number of filter bands per octave
    #[arg(long, default_value_t = DEFAULT_BANDS)]
    pub bands: usize,

    /// Lowest frequency of the filterbank in Hz
    #[arg(long, default_value_t = DEFAULT_FMIN, value_name = "HZ")]
    pub fmin: f32,

    /// Highest frequency of the filterbank in Hz
    #[arg(long, default_value_t = DEFAULT_FMAX, value_name = "HZ")]
    pub fmax: f32,

    /// Do not normalize the filters to unit area
    #[arg(long = "no-norm-filters", action = clap::ArgAction::SetFalse)]
    pub norm_filters: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS,
            fmin: DEFAULT_FMIN,
            fmax: DEFAULT_FMAX,
            norm_filters: true,
        }
    }
}

/// Filterbank matrix mapping FFT bins to logarithmic bands.
#[derive(Clone, Debug)]
pub struct LogFilterbank {
    /// Shape (num_bins, num_bands)
    pub matrix: Array2<f32>,
}

impl LogFilterbank {
    /// Build the filterbank for spectra of `frame_size` samples at `sample_rate`.
    ///
    /// The spectrum is expected to hold `frame_size / 2` bins.
    pub fn new(config: &FilterConfig, frame_size: usize, sample_rate: u32) -> Result<Self> {
        let num_bins = frame_size / 2;
        let bin_width = sample_rate as f32 / frame_size as f32;

        let frequencies = log_frequencies(config.bands, config.fmin, config.fmax);
        let bins = frequencies_to_bins(&frequencies, bin_width, num_bins);
        let matrix = triangular_filters(&bins, num_bins, config.norm_filters);

        if matrix.ncols() == 0 {
            return Err(ConfigError::InvalidValue {
                name: "filterbank",
                reason: format!(
                    "no bands between {} Hz and {} Hz for frame size {frame_size}",
                    config.fmin, config.fmax
                ),
            }
            .into());
        }

        tracing::trace!(frame_size, bands = matrix.ncols(), "filterbank built");

        Ok(Self { matrix })
    }

    pub fn num_bands(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Frequencies spaced `bands` per octave around 440Hz, limited to `[fmin, fmax]`.
pub fn log_frequencies(bands: usize, fmin: f32, fmax: f32) -> Vec<f32> {
    let bands = bands as f32;
    let left = ((fmin / REFERENCE_FREQUENCY).log2() * bands).floor() as i32;
    let right = ((fmax / REFERENCE_FREQUENCY).log2() * bands).ceil() as i32;

    (left..right)
        .map(|k| REFERENCE_FREQUENCY * 2.0f32.powf(k as f32 / bands))
        .filter(|f| (fmin..=fmax).contains(f))
        .collect()
}

/// Map frequencies to the nearest FFT bins, dropping duplicates.
pub fn frequencies_to_bins(frequencies: &[f32], bin_width: f32, num_bins: usize) -> Vec<usize> {
    let mut bins: Vec<usize> = frequencies
        .iter()
        .map(|f| ((f / bin_width).round() as usize).min(num_bins.saturating_sub(1)))
        .collect();
    bins.dedup();
    bins
}

/// Overlapping triangular filters over consecutive `(start, center, stop)` bin triples.
///
/// Returns a `(num_bins, bins.len() - 2)` matrix. A filter spanning fewer than
/// two bins collapses onto its start bin.
pub fn triangular_filters(bins: &[usize], num_bins: usize, norm: bool) -> Array2<f32> {
    let num_bands = bins.len().saturating_sub(2);
    let mut filterbank = Array2::<f32>::zeros((num_bins, num_bands));

    for (band, triple) in bins.windows(3).enumerate() {
        let (start, mut center, mut stop) = (triple[0], triple[1], triple[2]);
        if stop - start < 2 {
            center = start;
            stop = start + 1;
        }

        let mut filter = filterbank.column_mut(band);

        for i in start..center {
            filter[i] = (i - start) as f32 / (center - start) as f32;
        }
        for i in center..stop.min(num_bins) {
            filter[i] = 1.0 - (i - center) as f32 / (stop - center) as f32;
        }

        if norm {
            let area = filter.sum();
            if area > 0.0 {
                filter.mapv_inplace(|v| v / area);
            }
        }
    }

    filterbank
}
