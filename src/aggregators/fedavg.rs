//! FedAvg baseline aggregation (no Byzantine tolerance)
//!
//! Standard federated averaging as described by McMahan et al. (2017), with
//! every client weighted equally. A single mean-shifted client moves every
//! coordinate of the aggregate by `shift / N`.

use ndarray::{ArrayD, Zip};
use rayon::prelude::*;

use super::validate_updates;
use crate::error::GuardError;
use crate::params::ParameterSet;

/// Standard FedAvg aggregation (no Byzantine defense).
///
/// For each parameter key, computes the elementwise arithmetic mean across
/// all client tensors. The mean is accumulated progressively rather than as
/// one large sum divided at the end.
///
/// # Arguments
///
/// * `updates` - Client parameter sets (one per client), sharing one schema
pub fn fedavg(updates: &[ParameterSet]) -> Result<ParameterSet, GuardError> {
    let first = validate_updates(updates)?;
    let names: Vec<&String> = first.names().collect();

    let reduced: Vec<(String, ArrayD<f32>)> = names
        .par_iter()
        .map(|&name| -> Result<(String, ArrayD<f32>), GuardError> {
            let mut mean = ArrayD::<f32>::zeros(first.require(name)?.raw_dim());
            for (i, update) in updates.iter().enumerate() {
                let count = (i + 1) as f32;
                Zip::from(&mut mean)
                    .and(update.require(name)?)
                    .for_each(|m, &x| *m += (x - *m) / count);
            }
            Ok((name.clone(), mean))
        })
        .collect::<Result<_, GuardError>>()?;

    Ok(reduced.into_iter().collect())
}
