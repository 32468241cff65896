//! Named parameter tensors shared by clients, aggregators and the registry.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::GuardError;

/// Mapping from parameter name to tensor.
///
/// Keys are kept ordered so every reduction walks them in the same order.
/// All parameter sets derived from one global model must share the same keys
/// and per-key shapes; [`ParameterSet::ensure_same_schema`] enforces that.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self {
            tensors: BTreeMap::new(),
        }
    }

    /// Insert (or replace) a named tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    /// Look up a tensor by name, failing with [`GuardError::ShapeMismatch`] if absent.
    pub fn require(&self, name: &str) -> Result<&ArrayD<f32>, GuardError> {
        self.get(name)
            .ok_or_else(|| GuardError::ShapeMismatch(format!("missing parameter '{}'", name)))
    }

    /// Remove a tensor by name, failing with [`GuardError::ShapeMismatch`] if absent.
    pub fn take(&mut self, name: &str) -> Result<ArrayD<f32>, GuardError> {
        self.tensors
            .remove(name)
            .ok_or_else(|| GuardError::ShapeMismatch(format!("missing parameter '{}'", name)))
    }

    /// Iterate over `(name, tensor)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f32>)> {
        self.tensors.iter()
    }

    /// Parameter names in key order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the set holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalars across all tensors.
    pub fn num_scalars(&self) -> usize {
        self.tensors.values().map(|t| t.len()).sum()
    }

    /// Whether every scalar is finite.
    pub fn is_finite(&self) -> bool {
        self.tensors
            .values()
            .all(|t| t.iter().all(|x| x.is_finite()))
    }

    /// Apply `f` to every scalar in place.
    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        for tensor in self.tensors.values_mut() {
            tensor.mapv_inplace(&f);
        }
    }

    /// Check that `other` has exactly the same keys and per-key shapes.
    pub fn ensure_same_schema(&self, other: &ParameterSet) -> Result<(), GuardError> {
        if self.tensors.len() != other.tensors.len() {
            return Err(GuardError::ShapeMismatch(format!(
                "expected {} parameters, got {}",
                self.tensors.len(),
                other.tensors.len()
            )));
        }

        for (name, tensor) in &self.tensors {
            match other.tensors.get(name) {
                Some(theirs) if theirs.shape() == tensor.shape() => {}
                Some(theirs) => {
                    return Err(GuardError::ShapeMismatch(format!(
                        "parameter '{}' has shape {:?}, expected {:?}",
                        name,
                        theirs.shape(),
                        tensor.shape()
                    )))
                }
                None => {
                    return Err(GuardError::ShapeMismatch(format!(
                        "missing parameter '{}'",
                        name
                    )))
                }
            }
        }

        Ok(())
    }
}

impl FromIterator<(String, ArrayD<f32>)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ParameterSet {
    type Item = (String, ArrayD<f32>);
    type IntoIter = std::collections::btree_map::IntoIter<String, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}
