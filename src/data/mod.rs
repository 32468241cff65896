//! Training and evaluation data streams.
//!
//! The round engine only needs something it can walk in mini-batches; see
//! [`DataStream`]. [`BatchLoader`] serves an in-memory [`Dataset`] in a fixed
//! order, and [`synthetic`] builds a learnable mock dataset.

pub mod synthetic;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::GuardError;

/// One mini-batch of features and class labels.
#[derive(Clone, Debug)]
pub struct Batch<'a> {
    /// Feature rows, `[batch, features]`
    pub features: ArrayView2<'a, f32>,
    /// Class index per row
    pub labels: ArrayView1<'a, usize>,
}

impl Batch<'_> {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A re-iterable stream of mini-batches.
///
/// Shared read-only across client threads during a round.
pub trait DataStream: Sync {
    /// Iterate over the stream's batches from the start.
    fn batches(&self) -> Box<dyn Iterator<Item = Batch<'_>> + '_>;
}

/// In-memory labelled samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Array1<usize>,
}

impl Dataset {
    /// Create a dataset; `features` must have one row per label.
    pub fn new(features: Array2<f32>, labels: Array1<usize>) -> Result<Self, GuardError> {
        if features.nrows() != labels.len() {
            return Err(GuardError::ShapeMismatch(format!(
                "{} feature rows for {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// An empty dataset with `num_features` columns.
    pub fn empty(num_features: usize) -> Self {
        Self {
            features: Array2::zeros((0, num_features)),
            labels: Array1::zeros(0),
        }
    }

    /// Feature matrix, `[samples, features]`.
    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Label vector.
    pub fn labels(&self) -> ArrayView1<'_, usize> {
        self.labels.view()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of feature columns.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Serves a [`Dataset`] in fixed-size batches, always in the same order.
#[derive(Clone, Debug)]
pub struct BatchLoader {
    dataset: Dataset,
    batch_size: usize,
}

impl BatchLoader {
    /// Wrap a dataset; `batch_size` must be positive.
    pub fn new(dataset: Dataset, batch_size: usize) -> Result<Self, GuardError> {
        if batch_size == 0 {
            return Err(GuardError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            dataset,
            batch_size,
        })
    }

    /// The wrapped dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Number of batches per pass.
    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }
}

impl DataStream for BatchLoader {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch<'_>> + '_> {
        let features = self.dataset.features.axis_chunks_iter(Axis(0), self.batch_size);
        let labels = self.dataset.labels.axis_chunks_iter(Axis(0), self.batch_size);
        Box::new(
            features
                .zip(labels)
                .map(|(features, labels)| Batch { features, labels }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tiny() -> Dataset {
        Dataset::new(
            array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0], [3.0, 1.0], [4.0, 0.0]],
            array![0, 1, 0, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_mismatched_rows() {
        let result = Dataset::new(array![[0.0f32, 1.0]], array![0, 1]);
        assert!(matches!(result, Err(GuardError::ShapeMismatch(_))));
    }

    #[test]
    fn test_batches_cover_dataset_in_order() {
        let loader = BatchLoader::new(tiny(), 2).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let sizes: Vec<usize> = loader.batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let first = loader.batches().next().unwrap();
        assert_eq!(first.features[[1, 0]], 1.0);
        assert_eq!(first.labels[1], 1);

        let last = loader.batches().last().unwrap();
        assert_eq!(last.features[[0, 0]], 4.0);
    }

    #[test]
    fn test_empty_stream() {
        let loader = BatchLoader::new(Dataset::empty(3), 4).unwrap();
        assert_eq!(loader.num_batches(), 0);
        assert_eq!(loader.batches().count(), 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchLoader::new(tiny(), 0).is_err());
    }
}
