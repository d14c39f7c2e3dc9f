//! Processing pipeline assembled from the resolved configuration.
//!
//! A [`Pipeline`] holds exactly one input stage and one output stage. The
//! stages are chosen once when the pipeline is built and reused for every
//! input file.

use crate::config::{AudioConfig, Config, InputMode, OutputMode};
use beatops_rnn::activations::{Activations, ActivationsFormat, ActivationsReader};
use beatops_rnn::audio::SignalProcessor;
use beatops_rnn::beats::BeatDetectionProcessor;
use beatops_rnn::events::write_events;
use beatops_rnn::rnn::{OnnxModel, RnnConfig, RnnProcessor, average_predictions};
use beatops_rnn::spectrogram::StackedSpectrogramProcessor;
use beatops_rnn::traits::{ActivationModel, Processor};
use eyre::Result;
#[allow(unused_imports)]
use ort::execution_providers::*;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Stages that turn an input file into activations.
pub enum InputStage<M> {
    FromAudio {
        signal: SignalProcessor,
        features: StackedSpectrogramProcessor,
        rnn: RnnProcessor<M>,
        fps: f32,
    },
    FromActivationFile(ActivationsReader),
}

impl<M: ActivationModel> InputStage<M> {
    fn process(&mut self, path: &Path) -> Result<Activations> {
        match self {
            Self::FromAudio {
                signal,
                features,
                rnn,
                fps,
            } => {
                let signal = signal.process(path.to_path_buf())?;
                tracing::debug!(duration = signal.duration_secs(), "signal decoded");

                let features = features.process(signal)?;
                tracing::debug!(
                    frames = features.nrows(),
                    features = features.ncols(),
                    "features stacked"
                );

                let predictions = rnn.process(features)?;
                let data = average_predictions(predictions)?;

                Ok(Activations::new(data, *fps))
            }
            Self::FromActivationFile(reader) => Ok(reader.process(path.to_path_buf())?),
        }
    }
}

/// Stage that turns activations into the written artifact.
pub enum OutputStage {
    ToActivationFile(ActivationsFormat),
    ToBeatTimestamps(BeatDetectionProcessor),
}

impl OutputStage {
    fn process(&mut self, activations: Activations) -> Result<Artifact> {
        match self {
            Self::ToActivationFile(format) => Ok(Artifact::Activations {
                activations,
                format: format.clone(),
            }),
            Self::ToBeatTimestamps(detector) => Ok(Artifact::Beats(detector.process(activations)?)),
        }
    }
}

/// Result of running the pipeline on one input, ready to be written.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    Activations {
        activations: Activations,
        format: ActivationsFormat,
    },
    /// Beat times in seconds
    Beats(Vec<f64>),
}

impl Artifact {
    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        match self {
            Self::Activations {
                activations,
                format,
            } => format.write(activations, writer)?,
            Self::Beats(beats) => write_events(beats, writer)?,
        }
        Ok(())
    }
}

/// One input stage followed by one output stage.
pub struct Pipeline<M> {
    input: InputStage<M>,
    output: OutputStage,
}

impl Pipeline<OnnxModel> {
    /// Build the pipeline, loading the ONNX models when audio is processed.
    ///
    /// Model files are resolved before any session is created, so a missing
    /// model fails without touching the runtime or any input.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::build(config, |rnn| {
            let files = rnn.resolve_model_files()?;

            let s = Instant::now();
            let processor = RnnProcessor::from_files(&files, session_builder()?)?;
            tracing::info!(
                models = processor.num_models(),
                duration = %format!("{:.2}s", s.elapsed().as_secs_f32()),
                "models loaded"
            );

            Ok(processor)
        })
    }
}

impl<M: ActivationModel> Pipeline<M> {
    /// Build the pipeline with already loaded models.
    pub fn with_models(config: &Config, models: Vec<M>) -> Result<Self> {
        Self::build(config, |_| Ok(RnnProcessor::new(models)?))
    }

    fn build(
        config: &Config,
        load_models: impl FnOnce(&RnnConfig) -> Result<RnnProcessor<M>>,
    ) -> Result<Self> {
        let input = match &config.input {
            InputMode::FromAudio(audio) => input_from_audio(audio, load_models)?,
            InputMode::FromActivationFile { format, fps } => {
                InputStage::FromActivationFile(ActivationsReader::new(format.clone(), *fps))
            }
        };

        let output = match &config.output {
            OutputMode::ToActivationFile { format } => {
                OutputStage::ToActivationFile(format.clone())
            }
            OutputMode::ToBeatTimestamps { tempo, beats } => {
                OutputStage::ToBeatTimestamps(BeatDetectionProcessor::new(*tempo, *beats))
            }
        };

        Ok(Self { input, output })
    }

    /// Run both stages on one input file.
    pub fn process(&mut self, path: &Path) -> Result<Artifact> {
        let activations = self.input.process(path)?;
        self.output.process(activations)
    }

    pub fn input(&self) -> &InputStage<M> {
        &self.input
    }

    pub fn output(&self) -> &OutputStage {
        &self.output
    }
}

fn input_from_audio<M: ActivationModel>(
    audio: &AudioConfig,
    load_models: impl FnOnce(&RnnConfig) -> Result<RnnProcessor<M>>,
) -> Result<InputStage<M>> {
    let rnn = load_models(&audio.rnn)?;
    let features =
        StackedSpectrogramProcessor::new(&audio.framing, &audio.filter, audio.log, audio.diff)?;
    tracing::debug!(features = features.num_features(), "feature extraction ready");

    Ok(InputStage::FromAudio {
        signal: SignalProcessor::new(audio.signal),
        features,
        rnn,
        fps: audio.framing.fps,
    })
}

/// Build session config with execution providers configured by Cargo features.
///
/// The first available provider is used; CPU is always available as fallback.
///
/// # Execution Providers
///
/// Enabled via Cargo features:
/// - `cuda` - NVIDIA CUDA
/// - `tensorrt` - NVIDIA TensorRT
/// - `openvino` - Intel OpenVINO
/// - `directml` - DirectML (Windows)
/// - `coreml` - CoreML (macOS)
fn session_builder() -> Result<SessionBuilder> {
    Ok(Session::builder()?.with_execution_providers([
        #[cfg(feature = "cuda")]
        CUDAExecutionProvider::default().build(),
        #[cfg(feature = "tensorrt")]
        TensorRTExecutionProvider::default().build(),
        #[cfg(feature = "openvino")]
        OpenVINOExecutionProvider::default()
            .with_device_type("HETERO:GPU,CPU")
            .with_cache_dir(".cache/ort")
            .build(),
        #[cfg(feature = "directml")]
        DirectMLExecutionProvider::default().build(),
        #[cfg(feature = "coreml")]
        CoreMLExecutionProvider::default().build(),
    ])?)
}
