//! # detection-guard: Federated Learning under Mean-Shift Poisoning
//!
//! Simulates rounds of federated learning across a fixed client population,
//! some of which are adversarial, and compares two aggregation policies on
//! the same workload:
//!
//! - `fed_avg` - [`fedavg()`], coordinate-wise mean (no Byzantine tolerance)
//! - `detection_guard` - [`trimmed_mean()`], coordinate-wise trimmed mean with
//!   the trim fraction set to the declared attacker fraction
//!
//! Each policy keeps its own global model in a [`GlobalModelRegistry`], so
//! running one never perturbs the other.
//!
//! ## High-Level API
//!
//! ```rust,no_run
//! use detection_guard::{Simulation, SimulationConfig};
//!
//! let sim = Simulation::new(SimulationConfig::default()).unwrap();
//! let comparison = sim.compare(0.3).unwrap();
//! println!(
//!     "FedAvg {:.2} vs DetectionGuard {:.2}",
//!     comparison.fed_avg.global_accuracy,
//!     comparison.detection_guard.global_accuracy
//! );
//! sim.reset();
//! ```

#![deny(missing_docs)]

pub mod aggregators;
pub mod attack;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod params;
pub mod registry;
pub mod round;
pub mod simulation;

// Re-exports
pub use aggregators::fedavg;
pub use aggregators::trimmed_mean;
pub use aggregators::{AggregationStrategy, Algorithm};
pub use attack::AttackInjector;
pub use client::{ClientSimulator, ClientStats, ClientStatus, ClientUpdate};
pub use config::SimulationConfig;
pub use error::GuardError;
pub use params::ParameterSet;
pub use registry::{GlobalModelEntry, GlobalModelRegistry};
pub use round::{RoundOrchestrator, RoundResult};
pub use simulation::{Comparison, Simulation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
