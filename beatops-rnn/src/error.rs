//! Error types for beatops-rnn organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Beat tracking error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio loading stage error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Model inference stage error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Persisted data format error
    #[error(transparent)]
    Format(#[from] FormatError),

    /// IO error while reading or writing artifacts
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration errors (option values, model discovery).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No model file matched the search
    #[error("no model found matching {pattern:?}")]
    ModelNotFound { pattern: String },

    /// Model glob pattern could not be parsed
    #[error("invalid model pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Option value outside its valid range
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Audio loading and conversion errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Channel count validation failed
    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),

    /// Resampler could not be constructed
    #[error(transparent)]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    /// Resampling failed
    #[error(transparent)]
    Resample(#[from] rubato::ResampleError),
}

/// Model inference errors (ONNX, ndarray operations).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Model declares no input tensor
    #[error("model has no input: {path}")]
    MissingInput { path: String },

    /// Model declares no output tensor
    #[error("model has no output: {path}")]
    MissingOutput { path: String },

    /// Nothing to average
    #[error("no predictions to average")]
    NoModels,

    /// ONNX Runtime error
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Errors in persisted activations and event files.
#[derive(Debug, Error)]
pub enum FormatError {
    /// File does not start with the NPY magic string
    #[error("not an npy file")]
    BadMagic,

    /// NPY header describes data we cannot read
    #[error("unsupported npy header: {0}")]
    UnsupportedHeader(String),

    /// File ends before the declared data
    #[error("truncated data: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Text value could not be parsed
    #[error("line {line}: cannot parse {value:?} as a number")]
    Parse { line: usize, value: String },

    /// Arrays that must agree in length do not
    #[error("shape mismatch: expected {expected} frames, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Result type alias for beatops-rnn operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// hound::Error → AudioError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Audio(AudioError::Hound(e))
    }
}

// rubato errors → AudioError → Error
impl From<rubato::ResamplerConstructionError> for Error {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Error::Audio(AudioError::ResamplerConstruction(e))
    }
}

impl From<rubato::ResampleError> for Error {
    fn from(e: rubato::ResampleError) -> Self {
        Error::Audio(AudioError::Resample(e))
    }
}

// ort::Error → ModelError → Error
impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(ModelError::Ort(e))
    }
}

// ShapeError → ModelError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Model(ModelError::Shape(e))
    }
}

// MinMaxError → ModelError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Model(ModelError::MinMax(e))
    }
}
