//! Recurrent network inference over stacked spectrogram features.

use crate::error::{ConfigError, FormatError, ModelError, Result};
use crate::traits::{ActivationModel, Processor};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ort::inputs;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::Tensor;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default pattern for the beat tracking ensemble
pub const DEFAULT_MODEL_PATTERN: &str = "beats_blstm_[1-8].onnx";

/// Environment variable overriding the default models directory
pub const MODELS_DIR_ENV: &str = "BEATOPS_MODELS_DIR";

/// Model selection options.
#[derive(clap::Args, Clone, Debug, PartialEq, Serialize)]
pub struct RnnConfig {
    /// Model file to use; repeat for an ensemble (skips the pattern search)
    #[arg(long = "nn-file", value_name = "PATH")]
    pub nn_files: Vec<PathBuf>,

    /// Model directory [default: $BEATOPS_MODELS_DIR or <data dir>/beatops/models]
    #[arg(long = "models-dir", value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Glob pattern matching model files inside the models directory
    #[arg(long = "nn-pattern", value_name = "GLOB", default_value = DEFAULT_MODEL_PATTERN)]
    pub nn_pattern: String,
}

impl Default for RnnConfig {
    fn default() -> Self {
        Self {
            nn_files: Vec::new(),
            models_dir: None,
            nn_pattern: DEFAULT_MODEL_PATTERN.to_string(),
        }
    }
}

impl RnnConfig {
    /// Directory searched by [`RnnConfig::resolve_model_files`].
    pub fn models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .or_else(|| std::env::var_os(MODELS_DIR_ENV).map(PathBuf::from))
            .or_else(|| dirs::data_dir().map(|dir| dir.join("beatops").join("models")))
            .unwrap_or_else(|| PathBuf::from("models"))
    }

    /// Resolve the model files: explicit files, or pattern matches sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ModelNotFound`] when an explicit file is missing or
    /// nothing matches the pattern.
    pub fn resolve_model_files(&self) -> Result<Vec<PathBuf>> {
        if !self.nn_files.is_empty() {
            if let Some(missing) = self.nn_files.iter().find(|path| !path.is_file()) {
                return Err(ConfigError::ModelNotFound {
                    pattern: missing.display().to_string(),
                }
                .into());
            }
            return Ok(self.nn_files.clone());
        }

        let dir = self.models_dir();
        let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy()))
            .join(&self.nn_pattern)
            .to_string_lossy()
            .into_owned();

        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ConfigError::ModelNotFound { pattern }.into());
        }

        tracing::debug!(count = files.len(), dir = %dir.display(), "model files found");

        Ok(files)
    }
}

/// ONNX beat activation model.
///
/// Input is `[1, frames, features]`; the first output holds `frames × classes`
/// values whose last class column is the beat activation.
pub struct OnnxModel {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    /// Load a model file with the given session configuration.
    pub fn from_file(path: &Path, session_builder: SessionBuilder) -> Result<Self> {
        let session = session_builder.commit_from_file(path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| ModelError::MissingInput {
                path: path.display().to_string(),
            })?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| ModelError::MissingOutput {
                path: path.display().to_string(),
            })?;

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl ActivationModel for OnnxModel {
    fn predict(&mut self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        let frames = features.nrows();
        if frames == 0 {
            return Ok(Array1::zeros(0));
        }

        let input = Tensor::from_array(features.to_owned().insert_axis(Axis(0)))?;
        let outputs = self
            .session
            .run(inputs!(self.input_name.as_str() => input))?;

        let values: Vec<f32> = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();

        beat_column(values, frames)
    }
}

/// Select the last class column of a flat `frames × classes` output.
fn beat_column(values: Vec<f32>, frames: usize) -> Result<Array1<f32>> {
    if frames == 0 || values.is_empty() || values.len() % frames != 0 {
        return Err(FormatError::ShapeMismatch {
            expected: frames,
            got: values.len(),
        }
        .into());
    }

    let classes = values.len() / frames;
    let output = Array2::from_shape_vec((frames, classes), values)?;

    Ok(output.column(classes - 1).to_owned())
}

/// Runs every model of an ensemble over the same features.
pub struct RnnProcessor<M> {
    models: Vec<M>,
}

impl<M: ActivationModel> RnnProcessor<M> {
    pub fn new(models: Vec<M>) -> Result<Self> {
        if models.is_empty() {
            return Err(ModelError::NoModels.into());
        }
        Ok(Self { models })
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }
}

impl RnnProcessor<OnnxModel> {
    /// Load the given model files, sharing one session configuration.
    pub fn from_files(files: &[PathBuf], session_builder: SessionBuilder) -> Result<Self> {
        let models = files
            .iter()
            .map(|path| {
                tracing::info!(path = %path.display(), "loading model");
                OnnxModel::from_file(path, session_builder.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(models)
    }
}

impl<M: ActivationModel> Processor for RnnProcessor<M> {
    type Input = Array2<f32>;
    type Output = Vec<Array1<f32>>;

    fn process(&mut self, features: Array2<f32>) -> Result<Vec<Array1<f32>>> {
        self.models
            .iter_mut()
            .enumerate()
            .map(|(i, model)| {
                tracing::debug!(model = i + 1, frames = features.nrows(), "running model");
                model.predict(features.view())
            })
            .collect()
    }
}

/// Element-wise mean of the per-model predictions.
///
/// # Errors
///
/// Returns [`ModelError::NoModels`] for an empty list and
/// [`FormatError::ShapeMismatch`] when the predictions differ in length.
pub fn average_predictions(predictions: Vec<Array1<f32>>) -> Result<Array1<f32>> {
    let mut predictions = predictions.into_iter();
    let mut sum = predictions.next().ok_or(ModelError::NoModels)?;
    let mut count = 1.0f32;

    for prediction in predictions {
        if prediction.len() != sum.len() {
            return Err(FormatError::ShapeMismatch {
                expected: sum.len(),
                got: prediction.len(),
            }
            .into());
        }
        sum += &prediction;
        count += 1.0;
    }

    Ok(sum / count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::array;

    /// Predicts the row mean scaled by a per-model factor.
    struct RowMean(f32);

    impl ActivationModel for RowMean {
        fn predict(&mut self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
            Ok(features
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(features.nrows()))
                * self.0)
        }
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"onnx").unwrap();
    }

    #[test]
    fn averages_predictions() {
        let avg = average_predictions(vec![array![0.0, 1.0, 0.5], array![1.0, 0.0, 0.5]]).unwrap();

        assert_eq!(avg, array![0.5, 0.5, 0.5]);
    }

    #[test]
    fn single_prediction_is_unchanged() {
        let avg = average_predictions(vec![array![0.2, 0.4]]).unwrap();

        assert_eq!(avg, array![0.2, 0.4]);
    }

    #[test]
    fn averaging_rejects_mismatched_lengths() {
        let result = average_predictions(vec![array![0.0, 1.0], array![1.0]]);

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::ShapeMismatch {
                expected: 2,
                got: 1
            }))
        ));
    }

    #[test]
    fn averaging_rejects_empty_ensemble() {
        let result = average_predictions(Vec::new());

        assert!(matches!(result, Err(Error::Model(ModelError::NoModels))));
    }

    #[test]
    fn ensemble_runs_every_model() {
        let mut rnn = RnnProcessor::new(vec![RowMean(1.0), RowMean(3.0)]).unwrap();
        let features = array![[1.0f32, 3.0], [0.0, 0.0]];

        let predictions = rnn.process(features).unwrap();

        assert_eq!(rnn.num_models(), 2);
        assert_eq!(predictions, vec![array![2.0, 0.0], array![6.0, 0.0]]);
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(RnnProcessor::<RowMean>::new(Vec::new()).is_err());
    }

    #[test]
    fn pattern_selects_numbered_models() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "beats_blstm_2.onnx",
            "beats_blstm_1.onnx",
            "beats_blstm_9.onnx",
            "onsets_brnn_1.onnx",
        ] {
            touch(&dir.path().join(name));
        }

        let config = RnnConfig {
            models_dir: Some(dir.path().to_path_buf()),
            ..RnnConfig::default()
        };
        let files = config.resolve_model_files().unwrap();

        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(names, ["beats_blstm_1.onnx", "beats_blstm_2.onnx"]);
    }

    #[test]
    fn empty_models_dir_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = RnnConfig {
            models_dir: Some(dir.path().to_path_buf()),
            ..RnnConfig::default()
        };

        let result = config.resolve_model_files();

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::ModelNotFound { .. }))
        ));
    }

    #[test]
    fn explicit_files_skip_the_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("custom.onnx");
        touch(&model);

        let config = RnnConfig {
            nn_files: vec![model.clone()],
            models_dir: Some(PathBuf::from("/nonexistent")),
            ..RnnConfig::default()
        };

        assert_eq!(config.resolve_model_files().unwrap(), vec![model]);
    }

    #[test]
    fn missing_explicit_file_is_model_not_found() {
        let config = RnnConfig {
            nn_files: vec![PathBuf::from("/nonexistent/model.onnx")],
            ..RnnConfig::default()
        };

        assert!(matches!(
            config.resolve_model_files(),
            Err(Error::Config(ConfigError::ModelNotFound { .. }))
        ));
    }

    #[test]
    fn beat_column_takes_last_class() {
        let column = beat_column(vec![0.9, 0.1, 0.2, 0.8], 2).unwrap();
        assert_eq!(column, array![0.1, 0.8]);

        let single = beat_column(vec![0.3, 0.7], 2).unwrap();
        assert_eq!(single, array![0.3, 0.7]);

        assert!(beat_column(vec![0.3, 0.7, 0.1], 2).is_err());
    }
}
