//! Core traits for beat tracking pipeline components.

use crate::error::Result;
use ndarray::{Array1, ArrayView2};

/// A single processing stage.
///
/// Every stage consumes one representation and produces the next one
/// (signal → features → predictions → activations → beats). Stages are built
/// from their own configuration and hold no state between calls apart from
/// that configuration and any loaded model.
pub trait Processor {
    /// Representation consumed by this stage.
    type Input;

    /// Representation produced by this stage.
    type Output;

    /// Apply the stage to `data`.
    ///
    /// Takes `&mut self` because model stages run ONNX sessions, whose
    /// `Session::run` requires it.
    fn process(&mut self, data: Self::Input) -> Result<Self::Output>;
}

/// Network that maps a feature matrix to a per-frame beat activation.
///
/// Implemented by [`crate::rnn::OnnxModel`]. Other implementations can stand
/// in for it wherever a pipeline is generic over the model.
pub trait ActivationModel {
    /// Predict one activation value per row of `features` (frames × features).
    fn predict(&mut self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>>;
}
