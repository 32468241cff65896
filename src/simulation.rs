//! In-process entry points: start a round, compare both policies, reset.
//!
//! [`Simulation`] owns the registry, the synthetic train/test streams and the
//! model architecture, and exposes the two operations a transport layer would
//! serve: [`Simulation::start_round`] and [`Simulation::reset`].

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregators::Algorithm;
use crate::attack::AttackInjector;
use crate::config::SimulationConfig;
use crate::data::{synthetic, BatchLoader, Dataset};
use crate::error::GuardError;
use crate::model::MlpArchitecture;
use crate::registry::{GlobalModelEntry, GlobalModelRegistry};
use crate::round::{RoundOrchestrator, RoundResult};

/// One round of each policy on the same workload and attacker fraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Result of the `fed_avg` round
    pub fed_avg: RoundResult,
    /// Result of the `detection_guard` round
    pub detection_guard: RoundResult,
}

impl Comparison {
    /// Accuracy gained by the trimmed mean over FedAvg.
    pub fn accuracy_gap(&self) -> f64 {
        self.detection_guard.global_accuracy - self.fed_avg.global_accuracy
    }
}

/// A federated learning simulation with one global model per algorithm.
///
/// All methods take `&self`; the simulation is `Sync` and rounds may be
/// started from any thread, rayon workers included. Rounds on one algorithm
/// are serialized; rounds on different algorithms run concurrently. Client
/// training runs on a pool owned by the simulation.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    architecture: MlpArchitecture,
    registry: GlobalModelRegistry,
    train: BatchLoader,
    test: BatchLoader,
    pool: ThreadPool,
}

impl Simulation {
    /// Generate the synthetic workload and initialize both global models.
    pub fn new(config: SimulationConfig) -> Result<Self, GuardError> {
        config.validate()?;
        let (train, test) = synthetic::generate(&config.data)?;
        Self::with_data(config, train, test)
    }

    /// Use caller-supplied train/test datasets instead of synthetic data.
    ///
    /// Labels must be below `config.data.num_classes` and feature columns must
    /// match `config.data.num_features`.
    pub fn with_data(
        config: SimulationConfig,
        train: Dataset,
        test: Dataset,
    ) -> Result<Self, GuardError> {
        config.validate()?;
        let architecture = config.architecture();

        for (split, dataset) in [("train", &train), ("test", &test)] {
            if dataset.num_features() != architecture.input_size {
                return Err(GuardError::ShapeMismatch(format!(
                    "{} split has {} features, model expects {}",
                    split,
                    dataset.num_features(),
                    architecture.input_size
                )));
            }
            if let Some(&label) = dataset
                .labels()
                .iter()
                .find(|&&label| label >= architecture.num_classes)
            {
                return Err(GuardError::InvalidConfig(format!(
                    "{} split has label {} but only {} classes",
                    split, label, architecture.num_classes
                )));
            }
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.client_threads)
            .thread_name(|i| format!("guard-client-{}", i))
            .build()
            .map_err(|e| GuardError::InvalidConfig(format!("client pool: {}", e)))?;

        info!(
            train = train.len(),
            test = test.len(),
            num_clients = config.num_clients,
            "simulation ready"
        );

        Ok(Self {
            registry: GlobalModelRegistry::new(architecture, config.seed),
            train: BatchLoader::new(train, config.batch_size)?,
            test: BatchLoader::new(test, config.batch_size)?,
            architecture,
            config,
            pool,
        })
    }

    /// Run one round of `algorithm` with `config.num_clients` clients.
    pub fn start_round(
        &self,
        malicious_percent: f64,
        algorithm: &str,
    ) -> Result<RoundResult, GuardError> {
        self.orchestrator().run_round(
            self.config.num_clients,
            malicious_percent,
            algorithm,
            &self.train,
            &self.test,
        )
    }

    /// Run one round of each algorithm concurrently.
    pub fn compare(&self, malicious_percent: f64) -> Result<Comparison, GuardError> {
        let (fed_avg, detection_guard) = rayon::join(
            || self.start_round(malicious_percent, Algorithm::FedAvg.key()),
            || self.start_round(malicious_percent, Algorithm::DetectionGuard.key()),
        );
        Ok(Comparison {
            fed_avg: fed_avg?,
            detection_guard: detection_guard?,
        })
    }

    /// Run `count` consecutive rounds, stopping at the first failure.
    pub fn run_rounds(
        &self,
        count: usize,
        malicious_percent: f64,
        algorithm: &str,
    ) -> Result<Vec<RoundResult>, GuardError> {
        (0..count)
            .map(|_| self.start_round(malicious_percent, algorithm))
            .collect()
    }

    /// Reinitialize every global model.
    pub fn reset(&self) {
        self.registry.reset_all();
    }

    /// Snapshot of an algorithm's global model.
    pub fn global_model(&self, algorithm: &str) -> Result<GlobalModelEntry, GuardError> {
        self.registry.get(algorithm)
    }

    /// The per-algorithm registry.
    pub fn registry(&self) -> &GlobalModelRegistry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn orchestrator(&self) -> RoundOrchestrator<'_, MlpArchitecture> {
        RoundOrchestrator::new(
            &self.architecture,
            &self.registry,
            self.config.learning_rate,
            AttackInjector::new(self.config.attack_shift),
        )
        .parallel(self.config.parallel_clients)
        .pool(&self.pool)
    }
}
