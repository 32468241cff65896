//! Trainable model capability consumed by the round engine.
//!
//! The engine never looks inside a model: it initializes parameters through
//! an [`Architecture`], builds private replicas from a [`ParameterSet`], runs
//! SGD steps, and reads parameters back. [`Mlp`] is the bundled architecture.

pub mod mlp;

pub use mlp::{Mlp, MlpArchitecture};

use ndarray::{Array1, ArrayView2};
use rand::rngs::StdRng;

use crate::data::{Batch, DataStream};
use crate::error::GuardError;
use crate::params::ParameterSet;

/// A model replica that can be trained one batch at a time.
pub trait TrainableModel {
    /// Snapshot of the current parameters.
    fn parameters(&self) -> ParameterSet;

    /// Consume the replica, returning its parameters.
    fn into_parameters(self) -> ParameterSet;

    /// One SGD step on `batch`; returns the batch's mean loss before the update.
    fn train_step(&mut self, batch: &Batch<'_>, learning_rate: f32) -> f32;

    /// Predicted class index per feature row.
    fn predict(&self, features: ArrayView2<'_, f32>) -> Array1<usize>;
}

/// Describes a model's parameter schema and how to build replicas.
pub trait Architecture: Send + Sync {
    /// Replica type produced by [`Architecture::build`].
    type Model: TrainableModel + Send;

    /// Freshly initialized random parameters.
    fn initialize(&self, rng: &mut StdRng) -> ParameterSet;

    /// Build a replica owning `parameters`.
    ///
    /// Fails with [`GuardError::ShapeMismatch`] when the parameters do not fit
    /// this architecture.
    fn build(&self, parameters: ParameterSet) -> Result<Self::Model, GuardError>;
}

/// Fraction of samples in `stream` the model classifies correctly.
///
/// An empty stream scores 0.0.
pub fn evaluate<M: TrainableModel>(model: &M, stream: &dyn DataStream) -> f64 {
    let (correct, total) = stream.batches().fold((0usize, 0usize), |(correct, total), batch| {
        let predicted = model.predict(batch.features);
        let hits = predicted
            .iter()
            .zip(batch.labels.iter())
            .filter(|(p, y)| p == y)
            .count();
        (correct + hits, total + batch.len())
    });

    if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    }
}
