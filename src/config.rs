//! Simulation settings.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```rust
//! use detection_guard::SimulationConfig;
//!
//! let config = SimulationConfig::from_json_str(r#"{ "num_clients": 10, "seed": 7 }"#).unwrap();
//! assert_eq!(config.num_clients, 10);
//! assert_eq!(config.batch_size, 32);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::attack::DEFAULT_SHIFT;
use crate::data::synthetic::SyntheticConfig;
use crate::error::GuardError;
use crate::model::MlpArchitecture;

/// Knobs for a [`Simulation`](crate::Simulation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Clients per round
    pub num_clients: usize,
    /// Local SGD learning rate
    pub learning_rate: f32,
    /// Mini-batch size for training and evaluation streams
    pub batch_size: usize,
    /// Constant added to every weight by malicious clients
    pub attack_shift: f32,
    /// Hidden units of the MLP
    pub hidden_size: usize,
    /// Train clients on the rayon pool instead of sequentially
    pub parallel_clients: bool,
    /// Worker threads in the client pool; 0 lets rayon choose
    pub client_threads: usize,
    /// Seed for global model initialization; entropy when absent
    pub seed: Option<u64>,
    /// Synthetic workload
    pub data: SyntheticConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_clients: 20,
            learning_rate: 0.01,
            batch_size: 32,
            attack_shift: DEFAULT_SHIFT,
            hidden_size: 64,
            parallel_clients: true,
            client_threads: 0,
            seed: None,
            data: SyntheticConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json_str(json: &str) -> Result<Self, GuardError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GuardError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject settings no round could run with.
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.num_clients == 0 {
            return Err(GuardError::InvalidConfig(
                "num_clients must be positive".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GuardError::InvalidConfig(format!(
                "learning_rate {} must be finite and positive",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(GuardError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if !self.attack_shift.is_finite() {
            return Err(GuardError::InvalidConfig(format!(
                "attack_shift {} must be finite",
                self.attack_shift
            )));
        }
        if self.hidden_size == 0 {
            return Err(GuardError::InvalidConfig(
                "hidden_size must be positive".to_string(),
            ));
        }
        self.data.validate()
    }

    /// Layer sizes implied by the data and hidden width.
    pub fn architecture(&self) -> MlpArchitecture {
        MlpArchitecture {
            input_size: self.data.num_features,
            hidden_size: self.hidden_size,
            num_classes: self.data.num_classes,
        }
    }
}
