//! Coordinate-wise trimmed mean aggregation
//!
//! Achieves Byzantine tolerance by trimming outliers per parameter coordinate.
//! A client is never excluded wholesale: each scalar position is robustified
//! independently, so a client that is extreme on one coordinate and typical on
//! another is trimmed only where it is extreme.

use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use rayon::prelude::*;

use super::{running_mean, validate_updates};
use crate::error::GuardError;
use crate::params::ParameterSet;

/// Number of values trimmed from each end: `floor(n_clients * trim_fraction)`.
pub fn trim_count(n_clients: usize, trim_fraction: f64) -> usize {
    (n_clients as f64 * trim_fraction).floor() as usize
}

/// Coordinate-wise trimmed mean over a single stack of tensors.
///
/// Stacks the tensors along a new leading client axis, sorts every lane along
/// that axis, drops the `k = floor(N * trim_fraction)` smallest and largest
/// values and averages the remaining `N - 2k`. When `2k >= N` nothing would
/// remain, so the lane falls back to the mean of all N values.
///
/// # Arguments
///
/// * `tensors` - One tensor per client, all of the same shape
/// * `trim_fraction` - Fraction to trim from each end (finite, `>= 0.0`)
pub fn trimmed_mean_stacked(
    tensors: &[ArrayViewD<'_, f32>],
    trim_fraction: f64,
) -> Result<ArrayD<f32>, GuardError> {
    if tensors.is_empty() {
        return Err(GuardError::NoClientUpdates);
    }
    check_trim_fraction(trim_fraction)?;

    let n_clients = tensors.len();
    let n_trim = trim_count(n_clients, trim_fraction);
    let trims = n_trim > 0 && n_trim.checked_mul(2).map_or(false, |both| both < n_clients);

    let stacked =
        stack(Axis(0), tensors).map_err(|e| GuardError::ShapeMismatch(e.to_string()))?;

    Ok(stacked.map_axis(Axis(0), |lane| {
        let mut values = lane.to_vec();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let kept = if trims {
            &values[n_trim..n_clients - n_trim]
        } else {
            &values[..]
        };
        running_mean(kept.iter().copied())
    }))
}

/// Coordinate-wise trimmed mean aggregation.
///
/// Applies [`trimmed_mean_stacked`] to every parameter key; keys are reduced
/// in parallel.
///
/// # Byzantine Tolerance
///
/// With `m` mean-shifted clients and `trim_fraction >= m / N` (and
/// `2 * floor(N * trim_fraction) < N`), every shifted value lands among the
/// trimmed extremes and the aggregate matches the honest-only result.
///
/// # Arguments
///
/// * `updates` - Client parameter sets (one per client), sharing one schema
/// * `trim_fraction` - Fraction to trim from each end. Values `>= 0.5` are
///   accepted and fall back to the plain mean.
pub fn trimmed_mean(
    updates: &[ParameterSet],
    trim_fraction: f64,
) -> Result<ParameterSet, GuardError> {
    let first = validate_updates(updates)?;
    check_trim_fraction(trim_fraction)?;

    let names: Vec<&String> = first.names().collect();

    let reduced: Vec<(String, ArrayD<f32>)> = names
        .par_iter()
        .map(|&name| -> Result<(String, ArrayD<f32>), GuardError> {
            let views = updates
                .iter()
                .map(|update| update.require(name).map(|tensor| tensor.view()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name.clone(), trimmed_mean_stacked(&views, trim_fraction)?))
        })
        .collect::<Result<_, GuardError>>()?;

    Ok(reduced.into_iter().collect())
}

fn check_trim_fraction(trim_fraction: f64) -> Result<(), GuardError> {
    if !trim_fraction.is_finite() || trim_fraction < 0.0 {
        return Err(GuardError::InvalidTrimFraction(trim_fraction));
    }
    Ok(())
}
