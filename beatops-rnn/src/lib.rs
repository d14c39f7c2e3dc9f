//! beatops-rnn: beat tracking with recurrent neural networks.
//!
//! The crate provides the processing stages of a beat tracker, each built from
//! its own configuration struct and chained through the [`traits::Processor`]
//! trait:
//!
//! - [`audio::SignalProcessor`]: WAV file to a mono 44.1kHz signal
//! - [`spectrogram::StackedSpectrogramProcessor`]: signal to stacked log-filtered
//!   spectrogram and difference features
//! - [`rnn::RnnProcessor`]: features to one activation per model (ONNX)
//! - [`beats::BeatDetectionProcessor`]: averaged activations to beat times
//!
//! Activations can be persisted and reloaded with [`activations`], beat times
//! are written with [`events`].
//!
//! # Quick Start
//!
//! ```ignore
//! use beatops_rnn::audio::{SignalConfig, SignalProcessor};
//! use beatops_rnn::spectrogram::StackedSpectrogramProcessor;
//! use beatops_rnn::rnn::{RnnConfig, RnnProcessor, average_predictions};
//! use beatops_rnn::activations::Activations;
//! use beatops_rnn::beats::BeatDetectionProcessor;
//! use beatops_rnn::traits::Processor;
//! use ort::session::Session;
//!
//! let signal = SignalProcessor::new(SignalConfig::default()).process("track.wav".into())?;
//! let features = StackedSpectrogramProcessor::new(
//!     &Default::default(), &Default::default(), Default::default(), Default::default(),
//! )?
//! .process(signal)?;
//!
//! let models = RnnConfig::default().resolve_model_files()?;
//! let mut rnn = RnnProcessor::from_files(&models, Session::builder()?)?;
//! let activations = Activations::new(average_predictions(rnn.process(features)?)?, 100.0);
//!
//! let beats = BeatDetectionProcessor::new(Default::default(), Default::default())
//!     .process(activations)?;
//! ```

pub mod activations;
pub mod audio;
pub mod beats;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod filterbank;
pub mod rnn;
pub mod spectrogram;
pub mod tempo;
pub mod traits;
