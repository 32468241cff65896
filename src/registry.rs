//! Per-algorithm global models.
//!
//! Each [`Algorithm`] owns one independently initialized global model so that
//! running FedAvg never disturbs the DetectionGuard model and vice versa.
//!
//! Locking: every entry has its own mutex, held by the round orchestrator
//! from fetch to commit, so rounds on one algorithm are serialized while
//! rounds on different algorithms run concurrently. A registry-wide RwLock is
//! held for writing by [`GlobalModelRegistry::reset_all`] and for reading by
//! snapshot reads, so a read sees either all entries reset or none.

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::aggregators::Algorithm;
use crate::error::GuardError;
use crate::model::Architecture;
use crate::params::ParameterSet;

type Initializer = Box<dyn Fn(&mut StdRng) -> ParameterSet + Send + Sync>;

/// Global model state for one algorithm.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalModelEntry {
    algorithm: Algorithm,
    parameters: ParameterSet,
    round_count: u64,
}

impl GlobalModelEntry {
    fn fresh(algorithm: Algorithm, parameters: ParameterSet) -> Self {
        Self {
            algorithm,
            parameters,
            round_count: 0,
        }
    }

    /// Algorithm this entry belongs to.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Current global parameters.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Completed rounds since creation or the last reset.
    pub fn round_count(&self) -> u64 {
        self.round_count
    }

    /// Write back an aggregated model. Only called by the round orchestrator.
    pub(crate) fn commit(&mut self, parameters: ParameterSet) {
        self.parameters = parameters;
        self.round_count += 1;
    }
}

/// Holds one [`GlobalModelEntry`] per [`Algorithm`].
pub struct GlobalModelRegistry {
    entries: BTreeMap<Algorithm, Mutex<GlobalModelEntry>>,
    resets: RwLock<u64>,
    rng: Mutex<StdRng>,
    initializer: Initializer,
}

impl GlobalModelRegistry {
    /// Create a registry with freshly initialized parameters for every algorithm.
    ///
    /// With a `seed`, initial parameters (and those after each reset) are
    /// reproducible; every entry still gets its own independent draw.
    pub fn new<A>(architecture: A, seed: Option<u64>) -> Self
    where
        A: Architecture + 'static,
    {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let initializer: Initializer =
            Box::new(move |rng: &mut StdRng| architecture.initialize(rng));

        let entries = Algorithm::ALL
            .into_iter()
            .map(|algorithm| {
                let entry = GlobalModelEntry::fresh(algorithm, initializer(&mut rng));
                (algorithm, Mutex::new(entry))
            })
            .collect();

        Self {
            entries,
            resets: RwLock::new(0),
            rng: Mutex::new(rng),
            initializer,
        }
    }

    /// Snapshot of the entry for an algorithm key.
    pub fn get(&self, algorithm_key: &str) -> Result<GlobalModelEntry, GuardError> {
        let algorithm: Algorithm = algorithm_key.parse()?;
        Ok(self.entry(algorithm))
    }

    /// Snapshot of the entry for an algorithm.
    pub fn entry(&self, algorithm: Algorithm) -> GlobalModelEntry {
        let _resets = self.resets.read();
        self.slot(algorithm).lock().clone()
    }

    /// Number of completed [`reset_all`](Self::reset_all) calls.
    pub fn reset_count(&self) -> u64 {
        *self.resets.read()
    }

    /// Reinitialize every entry from fresh random parameters.
    ///
    /// Waits for in-flight rounds to commit, then swaps every entry while
    /// holding all entry locks, so no reader observes a partial reset.
    pub fn reset_all(&self) {
        let mut resets = self.resets.write();
        let mut guards: Vec<MutexGuard<'_, GlobalModelEntry>> =
            self.entries.values().map(|slot| slot.lock()).collect();
        let mut rng = self.rng.lock();

        for guard in guards.iter_mut() {
            let algorithm = guard.algorithm;
            **guard = GlobalModelEntry::fresh(algorithm, (self.initializer)(&mut *rng));
        }
        *resets += 1;

        info!(resets = *resets, "all global models reset");
    }

    /// Exclusive access to an entry for the duration of a round.
    pub(crate) fn lock(&self, algorithm: Algorithm) -> MutexGuard<'_, GlobalModelEntry> {
        self.slot(algorithm).lock()
    }

    fn slot(&self, algorithm: Algorithm) -> &Mutex<GlobalModelEntry> {
        // Populated from Algorithm::ALL at construction and never shrunk.
        &self.entries[&algorithm]
    }
}

impl std::fmt::Debug for GlobalModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalModelRegistry")
            .field("algorithms", &self.entries.keys().collect::<Vec<_>>())
            .field("resets", &*self.resets.read())
            .finish()
    }
}
