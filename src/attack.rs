//! Mean-shift poisoning attack
//!
//! Shifts every trained weight by a large constant so a malicious update is an
//! unambiguous outlier on every coordinate. Typical trained weights sit around
//! 1e-2..1e-1, so the default shift of 10.0 dominates them.

use crate::params::ParameterSet;

/// Default shift added to every scalar by a malicious client.
pub const DEFAULT_SHIFT: f32 = 10.0;

/// Deterministically perturbs a trained parameter set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttackInjector {
    shift: f32,
}

impl Default for AttackInjector {
    fn default() -> Self {
        Self::new(DEFAULT_SHIFT)
    }
}

impl AttackInjector {
    /// Create a mean-shift injector adding `shift` to every scalar.
    pub fn new(shift: f32) -> Self {
        Self { shift }
    }

    /// The constant added to every scalar.
    pub fn shift(&self) -> f32 {
        self.shift
    }

    /// Apply the mean-shift attack, consuming the honest parameters.
    pub fn apply(&self, mut parameters: ParameterSet) -> ParameterSet {
        let shift = self.shift;
        parameters.map_inplace(|x| x + shift);
        parameters
    }
}
