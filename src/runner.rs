//! Scenario execution: single runs and parallel Monte Carlo batches.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use crate::config::ScenarioConfig;
use crate::error::SimError;
use crate::fleet::{Fleet, RunResult};

/// Runs one simulation with an explicit seed.
///
/// The catalog is built and validated first; a run never starts from an
/// inconsistent configuration.
pub fn run_scenario(config: &ScenarioConfig, seed: u64) -> Result<RunResult, SimError> {
    let catalog = Arc::new(config.build_catalog());
    catalog.validate()?;
    Fleet::new(
        Arc::clone(&catalog),
        config.shop_settings(),
        config.target_contract(),
        config.peer_contract(),
        config.fleet_settings(),
        seed,
    )?
    .run(seed)
}

/// Runs the configured Monte Carlo batch in parallel.
///
/// Run `i` uses seed `base.wrapping_add(i)`, so each run is independently
/// reproducible. Runs share nothing mutable; the catalog is read-only.
pub fn run_monte_carlo(config: &ScenarioConfig) -> Result<Vec<RunResult>, SimError> {
    let catalog = Arc::new(config.build_catalog());
    catalog.validate()?;
    let base = config.simulation.seed;
    info!(runs = config.simulation.runs, base_seed = base, "starting batch");

    (0..config.simulation.runs)
        .into_par_iter()
        .map(|i| {
            let seed = base.wrapping_add(i as u64);
            Fleet::new(
                Arc::clone(&catalog),
                config.shop_settings(),
                config.target_contract(),
                config.peer_contract(),
                config.fleet_settings(),
                seed,
            )?
            .run(seed)
        })
        .collect()
}
