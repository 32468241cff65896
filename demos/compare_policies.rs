//! Compare FedAvg and DetectionGuard over several poisoned rounds
//!
//! Run with `RUST_LOG=detection_guard=debug` to see per-client progress.
//! An optional argument names a JSON config file.

use detection_guard::{Simulation, SimulationConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("detection_guard=info".parse()?),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig {
            seed: Some(42),
            ..SimulationConfig::default()
        },
    };

    let sim = Simulation::new(config)?;
    let rounds = 5;

    for &malicious_percent in &[0.0, 0.1, 0.3] {
        println!(
            "\n{} clients, {:.0}% malicious, +{} mean shift\n",
            sim.config().num_clients,
            malicious_percent * 100.0,
            sim.config().attack_shift
        );
        println!("{:>6}  {:>10}  {:>16}", "round", "FedAvg", "DetectionGuard");

        for _ in 0..rounds {
            let comparison = sim.compare(malicious_percent)?;
            println!(
                "{:>6}  {:>9.2}%  {:>15.2}%",
                comparison.fed_avg.round,
                comparison.fed_avg.global_accuracy * 100.0,
                comparison.detection_guard.global_accuracy * 100.0
            );
        }

        sim.reset();
    }

    Ok(())
}
