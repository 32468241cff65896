//! One federated round: train every client, aggregate, commit, evaluate.
//!
//! A round is atomic. Validation happens before any training, and the
//! aggregated model is only written back once every client has finished and
//! the aggregate has been checked against the global schema. Any failure
//! leaves the registry exactly as it was.

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::aggregators::Algorithm;
use crate::attack::AttackInjector;
use crate::client::{ClientSimulator, ClientStats, ClientUpdate};
use crate::data::DataStream;
use crate::error::GuardError;
use crate::model::{evaluate, Architecture};
use crate::params::ParameterSet;
use crate::registry::GlobalModelRegistry;

/// Outcome of a completed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Accuracy of the updated global model on the evaluation stream
    pub global_accuracy: f64,
    /// Per-client statistics, ordered by client id
    pub clients: Vec<ClientStats>,
    /// Algorithm key the round ran under
    pub algorithm: String,
    /// Declared attacker fraction
    pub malicious_percent: f64,
    /// Human-readable summary lines
    pub logs: Vec<String>,
    /// The algorithm's round count after this round
    pub round: u64,
}

impl RoundResult {
    /// Number of adversarial clients in the round.
    pub fn num_malicious(&self) -> usize {
        self.clients.iter().filter(|c| c.is_malicious).count()
    }

    /// Mean of the clients' local training losses.
    pub fn mean_loss(&self) -> f32 {
        if self.clients.is_empty() {
            return 0.0;
        }
        self.clients.iter().map(|c| c.loss).sum::<f32>() / self.clients.len() as f32
    }
}

/// `floor(num_clients * malicious_percent)`; clients `0..n` attack.
pub fn malicious_count(num_clients: usize, malicious_percent: f64) -> usize {
    (num_clients as f64 * malicious_percent).floor() as usize
}

/// Drives rounds against a [`GlobalModelRegistry`].
///
/// The entry lock is held from fetch to commit. It is only ever taken on a
/// thread that is not a rayon worker, and parallel steps under the lock run on
/// the client pool: a rayon worker waiting on nested jobs may pick up another
/// queued round on the same key.
#[derive(Debug)]
pub struct RoundOrchestrator<'a, A: Architecture> {
    architecture: &'a A,
    registry: &'a GlobalModelRegistry,
    learning_rate: f32,
    attack: AttackInjector,
    parallel: bool,
    pool: Option<&'a ThreadPool>,
}

impl<'a, A: Architecture> RoundOrchestrator<'a, A> {
    /// Create an orchestrator; clients run in parallel by default.
    pub fn new(
        architecture: &'a A,
        registry: &'a GlobalModelRegistry,
        learning_rate: f32,
        attack: AttackInjector,
    ) -> Self {
        Self {
            architecture,
            registry,
            learning_rate,
            attack,
            parallel: true,
            pool: None,
        }
    }

    /// Run clients on the rayon pool (`true`) or one after another (`false`).
    ///
    /// Both produce identical results.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run client training and aggregation on `pool` instead of the global
    /// rayon pool.
    ///
    /// Required when rounds are started from global-pool workers: otherwise
    /// every global worker can end up waiting on an entry lock while the
    /// client jobs queue behind them.
    pub fn pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Run one round and commit the aggregate to the algorithm's global model.
    ///
    /// # Errors
    ///
    /// * [`GuardError::NoClientUpdates`] if `num_clients` is zero
    /// * [`GuardError::InvalidMaliciousPercent`] unless `0 <= malicious_percent < 1`
    /// * [`GuardError::UnknownAlgorithm`] for an unrecognized key
    /// * [`GuardError::TrainingDivergence`] / [`GuardError::ShapeMismatch`]
    ///   from client training or aggregation
    ///
    /// All of them are raised before anything is committed.
    pub fn run_round(
        &self,
        num_clients: usize,
        malicious_percent: f64,
        algorithm_key: &str,
        data_stream: &dyn DataStream,
        eval_stream: &dyn DataStream,
    ) -> Result<RoundResult, GuardError> {
        if num_clients == 0 {
            return Err(GuardError::NoClientUpdates);
        }
        if !(0.0..1.0).contains(&malicious_percent) {
            return Err(GuardError::InvalidMaliciousPercent(malicious_percent));
        }
        let algorithm: Algorithm = algorithm_key.parse()?;
        let strategy = algorithm.strategy(malicious_percent);
        let num_malicious = malicious_count(num_clients, malicious_percent);

        let span = info_span!("round", %algorithm, num_clients, num_malicious);

        let (clients, model, round) = outside_rayon(|| {
            span.in_scope(|| {
                let mut entry = self.registry.lock(algorithm);
                info!(round = entry.round_count() + 1, "round started");

                let base = entry.parameters();
                let updates = self.install(|| {
                    self.train_clients(base, num_clients, num_malicious, data_stream)
                })?;

                let (clients, parameter_sets): (Vec<ClientStats>, Vec<ParameterSet>) =
                    updates
                        .into_iter()
                        .map(|update| (update.stats(), update.parameters))
                        .unzip();

                let aggregated = self.install(|| strategy.reduce(&parameter_sets))?;
                entry.parameters().ensure_same_schema(&aggregated)?;
                debug!(strategy = strategy.name(), "aggregation complete");

                let model = self.architecture.build(aggregated.clone())?;
                entry.commit(aggregated);
                Ok::<_, GuardError>((clients, model, entry.round_count()))
            })
        })?;

        let global_accuracy = evaluate(&model, eval_stream);

        let mean_loss = clients.iter().map(|c| c.loss).sum::<f32>() / num_clients as f32;
        let logs = vec![
            format!(
                "Round initialized with {} clients ({:.0}% malicious).",
                num_clients,
                malicious_percent * 100.0
            ),
            format!("Training complete. Avg Loss: {:.4}", mean_loss),
            algorithm.aggregation_log().to_string(),
            format!("Global Model Updated. Accuracy: {:.2}%", global_accuracy * 100.0),
        ];

        span.in_scope(|| info!(round, global_accuracy, mean_loss, "round committed"));

        Ok(RoundResult {
            global_accuracy,
            clients,
            algorithm: algorithm.key().to_string(),
            malicious_percent,
            logs,
            round,
        })
    }

    /// Every client trains from the same base; results come back in id order.
    fn train_clients(
        &self,
        base: &ParameterSet,
        num_clients: usize,
        num_malicious: usize,
        data_stream: &dyn DataStream,
    ) -> Result<Vec<ClientUpdate>, GuardError> {
        let simulator = ClientSimulator::new(self.architecture, self.learning_rate, self.attack);
        let run = |client_id: usize| {
            simulator.run(client_id, base, data_stream, client_id < num_malicious)
        };

        if self.parallel {
            (0..num_clients).into_par_iter().map(run).collect()
        } else {
            (0..num_clients).map(run).collect()
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

/// Run `op` on the current thread, or on a scoped helper thread when the
/// current thread is a rayon worker.
fn outside_rayon<R: Send>(op: impl FnOnce() -> R + Send) -> R {
    if rayon::current_thread_index().is_none() {
        return op();
    }
    std::thread::scope(|scope| match scope.spawn(op).join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BatchLoader, Dataset};
    use crate::model::MlpArchitecture;
    use ndarray::array;

    fn arch() -> MlpArchitecture {
        MlpArchitecture {
            input_size: 2,
            hidden_size: 4,
            num_classes: 2,
        }
    }

    fn loader() -> BatchLoader {
        let data = Dataset::new(
            array![
                [1.0, 0.5],
                [-1.0, -0.5],
                [0.8, 1.2],
                [-0.7, -1.1],
                [1.3, 0.2],
                [-0.2, -1.4]
            ],
            array![1, 0, 1, 0, 1, 0],
        )
        .unwrap();
        BatchLoader::new(data, 2).unwrap()
    }

    #[test]
    fn test_malicious_count() {
        assert_eq!(malicious_count(20, 0.3), 6);
        assert_eq!(malicious_count(20, 0.0), 0);
        assert_eq!(malicious_count(20, 0.99), 19);
        assert_eq!(malicious_count(20, 0.1), 2);
        assert_eq!(malicious_count(3, 0.5), 1);
    }

    #[test]
    fn test_round_selects_leading_clients() {
        let arch = arch();
        let registry = GlobalModelRegistry::new(arch, Some(1));
        let orchestrator =
            RoundOrchestrator::new(&arch, &registry, 0.01, AttackInjector::default());

        let result = orchestrator
            .run_round(20, 0.3, "detection_guard", &loader(), &loader())
            .unwrap();

        assert_eq!(result.clients.len(), 20);
        for (i, client) in result.clients.iter().enumerate() {
            assert_eq!(client.id, i);
            assert_eq!(client.is_malicious, i < 6);
        }
        assert_eq!(result.num_malicious(), 6);
        assert_eq!(result.round, 1);
        assert_eq!(result.algorithm, "detection_guard");
    }

    #[test]
    fn test_round_logs() {
        let arch = arch();
        let registry = GlobalModelRegistry::new(arch, Some(2));
        let orchestrator =
            RoundOrchestrator::new(&arch, &registry, 0.01, AttackInjector::default());

        let result = orchestrator
            .run_round(10, 0.2, "fed_avg", &loader(), &loader())
            .unwrap();

        assert_eq!(result.logs.len(), 4);
        assert_eq!(
            result.logs[0],
            "Round initialized with 10 clients (20% malicious)."
        );
        assert_eq!(
            result.logs[1],
            format!("Training complete. Avg Loss: {:.4}", result.mean_loss())
        );
        assert_eq!(result.logs[2], "FedAvg: Standard mean aggregation applied.");
        assert!(result.logs[3].starts_with("Global Model Updated. Accuracy: "));
        assert!((0.0..=1.0).contains(&result.global_accuracy));
    }

    #[test]
    fn test_validation_before_training() {
        let arch = arch();
        let registry = GlobalModelRegistry::new(arch, Some(3));
        let orchestrator =
            RoundOrchestrator::new(&arch, &registry, 0.01, AttackInjector::default());

        assert!(matches!(
            orchestrator.run_round(0, 0.1, "fed_avg", &loader(), &loader()),
            Err(GuardError::NoClientUpdates)
        ));
        assert!(matches!(
            orchestrator.run_round(5, 1.0, "fed_avg", &loader(), &loader()),
            Err(GuardError::InvalidMaliciousPercent(_))
        ));
        assert!(matches!(
            orchestrator.run_round(5, -0.1, "fed_avg", &loader(), &loader()),
            Err(GuardError::InvalidMaliciousPercent(_))
        ));
        assert!(matches!(
            orchestrator.run_round(5, f64::NAN, "fed_avg", &loader(), &loader()),
            Err(GuardError::InvalidMaliciousPercent(_))
        ));
        assert!(matches!(
            orchestrator.run_round(5, 0.1, "krum", &loader(), &loader()),
            Err(GuardError::UnknownAlgorithm(_))
        ));

        for algorithm in Algorithm::ALL {
            assert_eq!(registry.entry(algorithm).round_count(), 0);
        }
    }

    #[test]
    fn test_divergence_aborts_without_commit() {
        let arch = arch();
        let registry = GlobalModelRegistry::new(arch, Some(4));
        let before = registry.entry(Algorithm::FedAvg);
        let orchestrator =
            RoundOrchestrator::new(&arch, &registry, 0.01, AttackInjector::default());

        let poisoned = BatchLoader::new(
            Dataset::new(array![[f32::INFINITY, 0.0]], array![1]).unwrap(),
            1,
        )
        .unwrap();

        let err = orchestrator
            .run_round(4, 0.0, "fed_avg", &poisoned, &loader())
            .unwrap_err();
        assert!(matches!(err, GuardError::TrainingDivergence { .. }));
        assert_eq!(registry.entry(Algorithm::FedAvg), before);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let arch = arch();
        let parallel_registry = GlobalModelRegistry::new(arch, Some(9));
        let sequential_registry = GlobalModelRegistry::new(arch, Some(9));

        let attack = AttackInjector::default();
        let parallel = RoundOrchestrator::new(&arch, &parallel_registry, 0.01, attack);
        let sequential =
            RoundOrchestrator::new(&arch, &sequential_registry, 0.01, attack).parallel(false);

        for algorithm in ["fed_avg", "detection_guard"] {
            let a = parallel.run_round(12, 0.25, algorithm, &loader(), &loader()).unwrap();
            let b = sequential.run_round(12, 0.25, algorithm, &loader(), &loader()).unwrap();
            assert_eq!(a, b);
        }

        for algorithm in Algorithm::ALL {
            assert_eq!(
                parallel_registry.entry(algorithm),
                sequential_registry.entry(algorithm)
            );
        }
    }

    #[test]
    fn test_outside_rayon_leaves_worker_threads() {
        assert_eq!(outside_rayon(rayon::current_thread_index), None);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let inside = pool.install(|| {
            assert!(rayon::current_thread_index().is_some());
            outside_rayon(rayon::current_thread_index)
        });
        assert_eq!(inside, None);
    }

    #[test]
    fn test_rounds_issued_from_pool_workers() {
        let arch = arch();
        let registry = GlobalModelRegistry::new(arch, Some(12));
        let client_pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let caller_pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let orchestrator =
            RoundOrchestrator::new(&arch, &registry, 0.01, AttackInjector::default())
                .pool(&client_pool);

        caller_pool.install(|| {
            (0..8).into_par_iter().for_each(|_| {
                orchestrator
                    .run_round(6, 0.3, "fed_avg", &loader(), &loader())
                    .unwrap();
            })
        });

        assert_eq!(registry.entry(Algorithm::FedAvg).round_count(), 8);
        assert_eq!(registry.entry(Algorithm::DetectionGuard).round_count(), 0);
    }
}
