//! Simulated federated client: one local epoch plus optional poisoning.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attack::AttackInjector;
use crate::data::DataStream;
use crate::error::GuardError;
use crate::model::{Architecture, TrainableModel};
use crate::params::ParameterSet;

/// One client's contribution to a round. Immutable once produced.
#[derive(Clone, Debug)]
pub struct ClientUpdate {
    /// Client index in `[0, N)`
    pub client_id: usize,
    /// Parameters after local training (and attack, if malicious)
    pub parameters: ParameterSet,
    /// Mean batch loss over the local epoch
    pub avg_loss: f32,
    /// Whether the attack was injected
    pub is_malicious: bool,
}

impl ClientUpdate {
    /// Per-client record reported in the round result.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            id: self.client_id,
            is_malicious: self.is_malicious,
            status: if self.is_malicious {
                ClientStatus::Attacking
            } else {
                ClientStatus::Training
            },
            loss: self.avg_loss,
        }
    }
}

/// What a client did during the round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    /// Honest local training
    Training,
    /// Local training followed by the mean-shift attack
    Attacking,
}

/// Per-client statistics reported to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Client index
    pub id: usize,
    /// Whether the client was adversarial
    pub is_malicious: bool,
    /// `Attacking` or `Training`
    pub status: ClientStatus,
    /// Mean local training loss
    pub loss: f32,
}

/// Runs a single client's local training pass.
#[derive(Debug)]
pub struct ClientSimulator<'a, A: Architecture> {
    architecture: &'a A,
    learning_rate: f32,
    attack: AttackInjector,
}

impl<'a, A: Architecture> ClientSimulator<'a, A> {
    /// Create a simulator training replicas of `architecture`.
    pub fn new(architecture: &'a A, learning_rate: f32, attack: AttackInjector) -> Self {
        Self {
            architecture,
            learning_rate,
            attack,
        }
    }

    /// Train a private replica built from `base_parameters` for one epoch.
    ///
    /// `base_parameters` is cloned, never mutated. An empty stream leaves the
    /// replica untouched and reports a loss of 0. Non-finite losses or
    /// parameters fail with [`GuardError::TrainingDivergence`].
    pub fn run(
        &self,
        client_id: usize,
        base_parameters: &ParameterSet,
        data_stream: &dyn DataStream,
        is_malicious: bool,
    ) -> Result<ClientUpdate, GuardError> {
        let mut model = self.architecture.build(base_parameters.clone())?;

        let mut total_loss = 0.0f32;
        let mut num_batches = 0usize;
        for batch in data_stream.batches() {
            let loss = model.train_step(&batch, self.learning_rate);
            if !loss.is_finite() {
                warn!(client_id, batch = num_batches, loss, "local training diverged");
                return Err(GuardError::TrainingDivergence {
                    client_id,
                    reason: format!("loss {} at batch {}", loss, num_batches),
                });
            }
            total_loss += loss;
            num_batches += 1;
        }

        let avg_loss = if num_batches > 0 {
            total_loss / num_batches as f32
        } else {
            0.0
        };

        let mut parameters = model.into_parameters();
        if !parameters.is_finite() {
            warn!(client_id, "local training produced non-finite parameters");
            return Err(GuardError::TrainingDivergence {
                client_id,
                reason: "non-finite parameters".to_string(),
            });
        }

        if is_malicious {
            parameters = self.attack.apply(parameters);
        }

        debug!(client_id, is_malicious, avg_loss, num_batches, "client finished");

        Ok(ClientUpdate {
            client_id,
            parameters,
            avg_loss,
            is_malicious,
        })
    }
}
