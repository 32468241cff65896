//! Two-layer perceptron classifier trained with plain SGD.
//!
//! `input -> fc1 -> ReLU -> fc2 -> logits`, softmax cross-entropy loss.

use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Architecture, TrainableModel};
use crate::data::Batch;
use crate::error::GuardError;
use crate::params::ParameterSet;

/// First layer weights, `[hidden, input]`.
pub const FC1_WEIGHT: &str = "fc1.weight";
/// First layer bias, `[hidden]`.
pub const FC1_BIAS: &str = "fc1.bias";
/// Output layer weights, `[classes, hidden]`.
pub const FC2_WEIGHT: &str = "fc2.weight";
/// Output layer bias, `[classes]`.
pub const FC2_BIAS: &str = "fc2.bias";

/// Layer sizes of an [`Mlp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlpArchitecture {
    /// Feature columns
    pub input_size: usize,
    /// Hidden units
    pub hidden_size: usize,
    /// Output classes
    pub num_classes: usize,
}

impl Default for MlpArchitecture {
    fn default() -> Self {
        Self {
            input_size: 78,
            hidden_size: 64,
            num_classes: 2,
        }
    }
}

impl Architecture for MlpArchitecture {
    type Model = Mlp;

    /// Uniform in `±1/sqrt(fan_in)` for weights and biases alike.
    fn initialize(&self, rng: &mut StdRng) -> ParameterSet {
        let bound1 = 1.0 / (self.input_size.max(1) as f32).sqrt();
        let bound2 = 1.0 / (self.hidden_size.max(1) as f32).sqrt();
        let mut uniform = |shape: &[usize], bound: f32| {
            ArrayD::from_shape_fn(shape, |_| rng.gen_range(-bound..=bound))
        };

        let mut params = ParameterSet::new();
        params.insert(
            FC1_WEIGHT,
            uniform(&[self.hidden_size, self.input_size], bound1),
        );
        params.insert(FC1_BIAS, uniform(&[self.hidden_size], bound1));
        params.insert(
            FC2_WEIGHT,
            uniform(&[self.num_classes, self.hidden_size], bound2),
        );
        params.insert(FC2_BIAS, uniform(&[self.num_classes], bound2));
        params
    }

    fn build(&self, mut parameters: ParameterSet) -> Result<Mlp, GuardError> {
        if parameters.len() != 4 {
            return Err(GuardError::ShapeMismatch(format!(
                "MLP expects 4 parameters, got {}",
                parameters.len()
            )));
        }

        let w1 = matrix(&mut parameters, FC1_WEIGHT, [self.hidden_size, self.input_size])?;
        let b1 = vector(&mut parameters, FC1_BIAS, self.hidden_size)?;
        let w2 = matrix(&mut parameters, FC2_WEIGHT, [self.num_classes, self.hidden_size])?;
        let b2 = vector(&mut parameters, FC2_BIAS, self.num_classes)?;

        Ok(Mlp { w1, b1, w2, b2 })
    }
}

fn matrix(
    params: &mut ParameterSet,
    name: &str,
    shape: [usize; 2],
) -> Result<Array2<f32>, GuardError> {
    let tensor = params.take(name)?;
    if tensor.shape() != shape {
        return Err(GuardError::ShapeMismatch(format!(
            "parameter '{}' has shape {:?}, expected {:?}",
            name,
            tensor.shape(),
            shape
        )));
    }
    Ok(tensor.into_dimensionality::<Ix2>()?)
}

fn vector(params: &mut ParameterSet, name: &str, len: usize) -> Result<Array1<f32>, GuardError> {
    let tensor = params.take(name)?;
    if tensor.shape() != [len] {
        return Err(GuardError::ShapeMismatch(format!(
            "parameter '{}' has shape {:?}, expected [{}]",
            name,
            tensor.shape(),
            len
        )));
    }
    Ok(tensor.into_dimensionality::<Ix1>()?)
}

/// Multi-layer perceptron replica.
#[derive(Clone, Debug, PartialEq)]
pub struct Mlp {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl Mlp {
    /// Returns `(pre-activation, hidden, logits)`.
    fn forward(&self, x: ArrayView2<'_, f32>) -> (Array2<f32>, Array2<f32>, Array2<f32>) {
        let z1 = x.dot(&self.w1.t()) + &self.b1;
        let hidden = z1.mapv(|v| v.max(0.0));
        let logits = hidden.dot(&self.w2.t()) + &self.b2;
        (z1, hidden, logits)
    }
}

impl TrainableModel for Mlp {
    fn parameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert(FC1_WEIGHT, self.w1.clone().into_dyn());
        params.insert(FC1_BIAS, self.b1.clone().into_dyn());
        params.insert(FC2_WEIGHT, self.w2.clone().into_dyn());
        params.insert(FC2_BIAS, self.b2.clone().into_dyn());
        params
    }

    fn into_parameters(self) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert(FC1_WEIGHT, self.w1.into_dyn());
        params.insert(FC1_BIAS, self.b1.into_dyn());
        params.insert(FC2_WEIGHT, self.w2.into_dyn());
        params.insert(FC2_BIAS, self.b2.into_dyn());
        params
    }

    /// A label outside `0..num_classes` yields a NaN loss and leaves the
    /// weights untouched.
    fn train_step(&mut self, batch: &Batch<'_>, learning_rate: f32) -> f32 {
        let n = batch.len();
        if n == 0 {
            return 0.0;
        }

        let (z1, hidden, logits) = self.forward(batch.features);

        // Softmax in place, then subtract the one-hot target: dL/dlogits.
        let mut grad = logits;
        let mut loss = 0.0f32;
        for (mut row, &label) in grad.axis_iter_mut(Axis(0)).zip(batch.labels.iter()) {
            let Some(&target) = row.get(label) else {
                return f32::NAN;
            };
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            loss += max + sum.ln() - target;
            row /= sum;
            row[label] -= 1.0;
        }
        grad /= n as f32;

        let d_w2 = grad.t().dot(&hidden);
        let d_b2 = grad.sum_axis(Axis(0));
        let mut d_hidden = grad.dot(&self.w2);
        d_hidden.zip_mut_with(&z1, |d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });
        let d_w1 = d_hidden.t().dot(&batch.features);
        let d_b1 = d_hidden.sum_axis(Axis(0));

        self.w1.scaled_add(-learning_rate, &d_w1);
        self.b1.scaled_add(-learning_rate, &d_b1);
        self.w2.scaled_add(-learning_rate, &d_w2);
        self.b2.scaled_add(-learning_rate, &d_b2);

        loss / n as f32
    }

    fn predict(&self, features: ArrayView2<'_, f32>) -> Array1<usize> {
        let (_, _, logits) = self.forward(features);
        logits.map_axis(Axis(1), |row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BatchLoader, Dataset, DataStream};
    use crate::model::evaluate;
    use ndarray::{array, IxDyn};
    use rand::SeedableRng;

    fn arch() -> MlpArchitecture {
        MlpArchitecture {
            input_size: 2,
            hidden_size: 8,
            num_classes: 2,
        }
    }

    fn separable() -> Dataset {
        let features = array![
            [2.0, 2.0],
            [-2.0, -2.0],
            [1.5, 2.5],
            [-1.5, -2.5],
            [2.5, 1.0],
            [-2.5, -1.0],
            [1.0, 1.5],
            [-1.0, -1.5]
        ];
        let labels = array![1, 0, 1, 0, 1, 0, 1, 0];
        Dataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_initialize_schema() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = MlpArchitecture::default().initialize(&mut rng);
        assert_eq!(params.get(FC1_WEIGHT).unwrap().shape(), &[64, 78]);
        assert_eq!(params.get(FC1_BIAS).unwrap().shape(), &[64]);
        assert_eq!(params.get(FC2_WEIGHT).unwrap().shape(), &[2, 64]);
        assert_eq!(params.get(FC2_BIAS).unwrap().shape(), &[2]);

        let bound = 1.0 / 78f32.sqrt();
        assert!(params
            .get(FC1_WEIGHT)
            .unwrap()
            .iter()
            .all(|w| w.abs() <= bound));
    }

    #[test]
    fn test_build_round_trips_parameters() {
        let mut rng = StdRng::seed_from_u64(2);
        let params = arch().initialize(&mut rng);
        let model = arch().build(params.clone()).unwrap();
        assert_eq!(model.parameters(), params);
        assert_eq!(model.into_parameters(), params);
    }

    #[test]
    fn test_build_rejects_wrong_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut params = arch().initialize(&mut rng);
        params.insert(FC1_BIAS, ArrayD::zeros(IxDyn(&[7])));
        assert!(matches!(
            arch().build(params),
            Err(GuardError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut model = arch().build(arch().initialize(&mut rng)).unwrap();
        let loader = BatchLoader::new(separable(), 4).unwrap();

        let epoch_loss = |model: &mut Mlp| {
            let losses: Vec<f32> = loader
                .batches()
                .map(|batch| model.train_step(&batch, 0.1))
                .collect();
            losses.iter().sum::<f32>() / losses.len() as f32
        };

        let first = epoch_loss(&mut model);
        let mut last = first;
        for _ in 0..200 {
            last = epoch_loss(&mut model);
        }
        assert!(last < first, "loss went from {} to {}", first, last);
        assert_eq!(evaluate(&model, &loader), 1.0);
    }

    #[test]
    fn test_out_of_range_label_is_nan() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = arch().build(arch().initialize(&mut rng)).unwrap();
        let before = model.clone();

        let data = Dataset::new(array![[1.0, 1.0]], array![5]).unwrap();
        let loader = BatchLoader::new(data, 1).unwrap();
        let batch = loader.batches().next().unwrap();

        assert!(model.train_step(&batch, 0.1).is_nan());
        assert_eq!(model, before);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut model = arch().build(arch().initialize(&mut rng)).unwrap();
        let data = Dataset::empty(2);
        let batch = Batch {
            features: data.features(),
            labels: data.labels(),
        };
        assert_eq!(model.train_step(&batch, 0.1), 0.0);
    }
}
