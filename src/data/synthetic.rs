//! Learnable mock classification data.
//!
//! Samples are drawn around one random centroid per class on a block of
//! informative features; redundant features are random linear combinations of
//! the informative ones and the rest is pure noise. A small fraction of labels
//! is flipped. The result is shuffled, split, and standardized with statistics
//! fitted on the training split only.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Dataset;
use crate::error::GuardError;

/// Parameters of the synthetic workload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Total samples before the train/test split
    pub num_samples: usize,
    /// Feature columns per sample
    pub num_features: usize,
    /// Columns that carry the class signal
    pub num_informative: usize,
    /// Columns built as linear combinations of the informative ones
    pub num_redundant: usize,
    /// Number of classes
    pub num_classes: usize,
    /// Distance of class centroids from the origin on each informative axis
    pub class_sep: f32,
    /// Fraction of labels replaced by a random class
    pub flip_fraction: f64,
    /// Fraction of samples kept for training
    pub train_fraction: f64,
    /// Seed for the generator
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            num_features: 78,
            num_informative: 20,
            num_redundant: 10,
            num_classes: 2,
            class_sep: 1.0,
            flip_fraction: 0.05,
            train_fraction: 0.8,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Check the column budget and fractions.
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.num_classes < 2 {
            return Err(GuardError::InvalidConfig(
                "num_classes must be at least 2".to_string(),
            ));
        }
        if self.num_informative == 0 {
            return Err(GuardError::InvalidConfig(
                "num_informative must be positive".to_string(),
            ));
        }
        if self.num_informative + self.num_redundant > self.num_features {
            return Err(GuardError::InvalidConfig(format!(
                "{} informative + {} redundant features exceed {} columns",
                self.num_informative, self.num_redundant, self.num_features
            )));
        }
        if !(0.0..=1.0).contains(&self.flip_fraction) {
            return Err(GuardError::InvalidConfig(format!(
                "flip_fraction {} outside [0, 1]",
                self.flip_fraction
            )));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(GuardError::InvalidConfig(format!(
                "train_fraction {} outside (0, 1)",
                self.train_fraction
            )));
        }
        Ok(())
    }
}

/// Generate a `(train, test)` pair of standardized datasets.
pub fn generate(config: &SyntheticConfig) -> Result<(Dataset, Dataset), GuardError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n = config.num_samples;
    let n_inf = config.num_informative;
    let n_red = config.num_redundant;

    let centroids = Array2::from_shape_fn((config.num_classes, n_inf), |_| {
        if rng.gen::<bool>() {
            config.class_sep
        } else {
            -config.class_sep
        }
    });
    let mixing = Array2::from_shape_fn((n_inf, n_red), |_| rng.gen_range(-1.0f32..1.0));

    let mut features = Array2::<f32>::zeros((n, config.num_features));
    let mut labels = Array1::<usize>::zeros(n);

    for (i, mut row) in features.axis_iter_mut(Axis(0)).enumerate() {
        let class = i % config.num_classes;
        for j in 0..n_inf {
            row[j] = centroids[[class, j]] + rng.sample::<f32, _>(StandardNormal);
        }
        for j in n_inf + n_red..config.num_features {
            row[j] = rng.sample::<f32, _>(StandardNormal);
        }
        labels[i] = if rng.gen_bool(config.flip_fraction) {
            rng.gen_range(0..config.num_classes)
        } else {
            class
        };
    }

    if n_red > 0 {
        let informative = features.slice(ndarray::s![.., ..n_inf]).dot(&mixing);
        features
            .slice_mut(ndarray::s![.., n_inf..n_inf + n_red])
            .assign(&informative);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);

    let n_train = (n as f64 * config.train_fraction) as usize;
    let (train_idx, test_idx) = order.split_at(n_train);

    let mut train_x = features.select(Axis(0), train_idx);
    let mut test_x = features.select(Axis(0), test_idx);
    let train_y = labels.select(Axis(0), train_idx);
    let test_y = labels.select(Axis(0), test_idx);

    standardize(&mut train_x, &mut test_x);

    debug!(
        train = train_idx.len(),
        test = test_idx.len(),
        features = config.num_features,
        "generated synthetic dataset"
    );

    Ok((Dataset::new(train_x, train_y)?, Dataset::new(test_x, test_y)?))
}

/// Scale columns to zero mean and unit variance using `fit`'s statistics.
fn standardize(fit: &mut Array2<f32>, apply: &mut Array2<f32>) {
    let Some(mean) = fit.mean_axis(Axis(0)) else {
        return;
    };
    let std = fit
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > f32::EPSILON { s } else { 1.0 });

    for data in [fit, apply] {
        for mut row in data.axis_iter_mut(Axis(0)) {
            row -= &mean;
            row /= &std;
        }
    }
}
