//! Beat position detection from beat activations.

use crate::activations::Activations;
use crate::error::Result;
use crate::tempo::{TempoConfig, TempoEstimator, hamming_window};
use crate::traits::Processor;
use ndarray::{Array1, ArrayView1};
use serde::Serialize;

const DEFAULT_LOOK_ASIDE: f32 = 0.2;

/// Beat detection options.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BeatConfig {
    /// Search this fraction of the beat interval to each side of a predicted beat
    #[arg(long = "look-aside", default_value_t = DEFAULT_LOOK_ASIDE, value_name = "FRACTION")]
    pub look_aside: f32,

    /// Re-estimate the tempo in a window of this many seconds around every beat
    #[arg(long = "look-ahead", value_name = "SECS")]
    pub look_ahead: Option<f32>,

    /// Ignore activations before the first and after the last value reaching this threshold
    #[arg(long, default_value_t = 0.0)]
    pub threshold: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            look_aside: DEFAULT_LOOK_ASIDE,
            look_ahead: None,
            threshold: 0.0,
        }
    }
}

/// Follow a beat grid of `interval` frames starting at `start`.
///
/// Each predicted position moves to the maximum of the Hamming-weighted
/// activations in a window centred on it, spanning `half` frames before it
/// and `half - 1` after it. Positions outside the activation range are kept
/// so alternative starts remain comparable.
fn track(
    activations: ArrayView1<'_, f32>,
    start: usize,
    interval: usize,
    window: &[f32],
) -> Vec<isize> {
    let len = activations.len() as isize;
    let half = (window.len() / 2) as isize;
    let mut positions: Vec<isize> = Vec::new();
    let mut position = start as isize;

    loop {
        let mut best = (0usize, f32::MIN);
        for (k, &weight) in window.iter().enumerate() {
            let idx = position - half + k as isize;
            let value = if (0..len).contains(&idx) {
                activations[idx as usize] * weight
            } else {
                0.0
            };
            if value > best.1 {
                best = (k, value);
            }
        }

        if best.0 > 0 {
            position += best.0 as isize - half;
        }
        if let Some(&last) = positions.last() {
            position = position.max(last + 1);
        }
        positions.push(position);

        if position + (interval as isize) < len {
            position += interval as isize;
        } else {
            break;
        }
    }

    positions
}

/// Detect beat frames in `activations` given the dominant `interval` in frames.
///
/// Every start offset within the first interval is tracked; the track with the
/// largest summed activation wins (the first one on ties).
pub fn detect_beats(
    activations: ArrayView1<'_, f32>,
    interval: usize,
    look_aside: f32,
) -> Vec<usize> {
    let len = activations.len();
    if len == 0 || interval == 0 {
        return Vec::new();
    }

    let half = ((interval as f32 * look_aside) as usize).max(1);
    let window = hamming_window(2 * half);

    let score = |positions: &[isize]| -> f32 {
        positions
            .iter()
            .filter(|&&p| p >= 0 && (p as usize) < len)
            .map(|&p| activations[p as usize])
            .sum()
    };

    let mut best: Option<(f32, Vec<isize>)> = None;
    for start in 0..interval.min(len) {
        let positions = track(activations, start, interval, &window);
        let sum = score(&positions);
        if best.as_ref().is_none_or(|(best_sum, _)| sum > *best_sum) {
            best = Some((sum, positions));
        }
    }

    best.map(|(_, positions)| {
        positions
            .into_iter()
            .filter(|&p| p >= 0 && (p as usize) < len)
            .map(|p| p as usize)
            .collect()
    })
    .unwrap_or_default()
}

/// Range of frames between the first and last activation reaching `threshold`.
///
/// A non-positive threshold keeps every frame; `None` when nothing reaches it.
fn active_range(activations: ArrayView1<'_, f32>, threshold: f32) -> Option<(usize, usize)> {
    if threshold <= 0.0 {
        return Some((0, activations.len()));
    }

    let first = activations.iter().position(|&v| v >= threshold)?;
    let last = activations.iter().rposition(|&v| v >= threshold)?;

    Some((first, last + 1))
}

/// Turns beat activations into beat times in seconds.
pub struct BeatDetectionProcessor {
    tempo: TempoConfig,
    beats: BeatConfig,
}

impl BeatDetectionProcessor {
    pub fn new(tempo: TempoConfig, beats: BeatConfig) -> Self {
        Self { tempo, beats }
    }

    /// Beat frames relative to `activations`, re-estimating the tempo in a
    /// sliding window of `look_ahead` seconds around the current position.
    fn detect_with_look_ahead(
        &self,
        activations: ArrayView1<'_, f32>,
        estimator: &TempoEstimator,
        look_ahead: f32,
        fps: f32,
    ) -> Result<Vec<usize>> {
        let len = activations.len() as isize;
        let frames = ((look_ahead * fps).round() as isize).max(1);
        let window = hamming_window(2 * frames as usize);

        let mut beats: Vec<usize> = Vec::new();
        let mut position: isize = 0;

        while position < len {
            let start = position - frames;
            let local: Array1<f32> = window
                .iter()
                .enumerate()
                .map(|(k, &weight)| {
                    let idx = start + k as isize;
                    if (0..len).contains(&idx) {
                        activations[idx as usize] * weight
                    } else {
                        0.0
                    }
                })
                .collect();

            let Some(interval) = estimator.dominant_interval(local.view())? else {
                break;
            };

            let closest = detect_beats(local.view(), interval, self.beats.look_aside)
                .into_iter()
                .map(|frame| start + frame as isize)
                .min_by_key(|&frame| (frame - position).abs());
            let Some(closest) = closest else {
                break;
            };

            let after_last = beats.last().is_none_or(|&last| closest > last as isize);
            if (0..len).contains(&closest) && after_last {
                beats.push(closest as usize);
            }

            position = (closest + interval as isize).max(position + 1);
        }

        Ok(beats)
    }
}

impl Processor for BeatDetectionProcessor {
    type Input = Activations;
    type Output = Vec<f64>;

    fn process(&mut self, activations: Activations) -> Result<Vec<f64>> {
        let fps = activations.fps;

        let Some((first, end)) = active_range(activations.data.view(), self.beats.threshold) else {
            tracing::debug!(threshold = self.beats.threshold, "no activation above threshold");
            return Ok(Vec::new());
        };
        let trimmed = activations.data.slice(ndarray::s![first..end]);

        let estimator = TempoEstimator::new(self.tempo, fps);
        let frames = match self.beats.look_ahead {
            Some(look_ahead) => {
                self.detect_with_look_ahead(trimmed, &estimator, look_ahead, fps)?
            }
            None => match estimator.dominant_interval(trimmed)? {
                Some(interval) => {
                    tracing::debug!(bpm = estimator.bpm(interval), "tempo estimated");
                    detect_beats(trimmed, interval, self.beats.look_aside)
                }
                None => Vec::new(),
            },
        };

        tracing::debug!(beats = frames.len(), "beats detected");

        Ok(frames
            .into_iter()
            .map(|frame| (frame + first) as f64 / fps as f64)
            .collect())
    }
}
