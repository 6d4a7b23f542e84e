//! Fleet orchestrator: one Shop, many Sites, one monthly loop.
//!
//! Peer sites share the Shop's inventory with the reporting target, so their
//! install schedule shapes what the deployable pool looks like when the target
//! needs a module. Sizes and install months for peers are drawn from
//! historical populations, with replacement when the population is smaller
//! than the requested site count.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::SimError;
use crate::ledger::LedgerEntry;
use crate::shop::{PoolCounts, Shop, ShopSettings};
use crate::site::{Contract, PerformanceRow, Site};

/// Decorrelates the sampling stream from the Shop's curve-draw stream.
const SCHEDULE_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;

/// Fleet-level knobs: horizon, peer population, and the historical
/// distributions peer contracts are drawn from.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Simulation horizon in months.
    pub months: usize,
    /// Number of peer sites beside the target.
    pub peer_count: usize,
    /// Historical peer sizes to sample from.
    pub peer_sizes: Vec<f64>,
    /// Historical install months to sample from.
    pub peer_install_months: Vec<usize>,
}

/// Monthly reading of one module: (fleet month, output, efficiency).
pub type ModuleTrace = Vec<(usize, f64, f64)>;

/// Everything a single Monte Carlo run produces for aggregation.
#[derive(Debug)]
pub struct RunResult {
    pub seed: u64,
    /// The target site's monthly performance rows.
    pub performance: Vec<PerformanceRow>,
    /// Residual value returned by the target site at decommissioning.
    pub residual_value: f64,
    /// Sum of every ledger entry's cost across the whole fleet.
    pub total_cost: f64,
    /// The full transaction ledger.
    pub ledger: Vec<LedgerEntry>,
    /// Per-module output/efficiency traces for the target site, keyed by
    /// serial.
    pub module_traces: HashMap<u64, ModuleTrace>,
    /// Value of storage-pool modules salvaged at simulation end.
    pub salvage_value: f64,
    /// Final pool sizes, for ownership audits.
    pub pools: PoolCounts,
}

/// One simulation run's fleet: the shared Shop and every site's schedule.
#[derive(Debug)]
pub struct Fleet {
    shop: Shop,
    settings: FleetSettings,
    /// Sites waiting for their install month, target first.
    pending: Vec<Site>,
    active: Vec<Site>,
    retired: Vec<Site>,
}

/// Draws `count` values from a historical population.
///
/// Distinct entries are used while the population lasts; drawing more values
/// than the population holds falls back to sampling with replacement.
fn draw_schedule<T: Copy>(population: &[T], count: usize, rng: &mut StdRng) -> Vec<T> {
    if count <= population.len() {
        index::sample(rng, population.len(), count)
            .into_iter()
            .map(|i| population[i])
            .collect()
    } else {
        (0..count)
            .map(|_| population[rng.random_range(0..population.len())])
            .collect()
    }
}

impl Fleet {
    /// Builds the fleet: the target site keeps its contract verbatim, peers
    /// get the peer contract with sampled size and install month.
    pub fn new(
        catalog: Arc<Catalog>,
        shop_settings: ShopSettings,
        target_contract: Contract,
        peer_contract: Contract,
        settings: FleetSettings,
        seed: u64,
    ) -> Result<Self, SimError> {
        if settings.peer_count > 0 && settings.peer_sizes.is_empty() {
            return Err(SimError::config(
                "fleet.peer_sizes",
                "peer sites requested but the size population is empty",
            ));
        }
        if settings.peer_count > 0 && settings.peer_install_months.is_empty() {
            return Err(SimError::config(
                "fleet.peer_install_months",
                "peer sites requested but the install-month population is empty",
            ));
        }

        let shop = Shop::new(catalog, shop_settings, seed);
        let mut rng = StdRng::seed_from_u64(seed ^ SCHEDULE_STREAM);

        let sizes = draw_schedule(&settings.peer_sizes, settings.peer_count, &mut rng);
        let starts = draw_schedule(&settings.peer_install_months, settings.peer_count, &mut rng);

        let mut pending = Vec::with_capacity(settings.peer_count + 1);
        pending.push(Site::new(0, target_contract));
        for number in 1..=settings.peer_count {
            let mut contract = peer_contract.clone();
            contract.target_size = sizes[number - 1];
            contract.start_month = starts[number - 1];
            pending.push(Site::new(number, contract));
        }

        Ok(Self {
            shop,
            settings,
            pending,
            active: Vec::new(),
            retired: Vec::new(),
        })
    }

    /// Runs the monthly loop to the horizon and returns the aggregated
    /// result.
    ///
    /// Order within a month is fixed: installs, then every active site's
    /// decision policy, then decommissioning of expired contracts, then the
    /// Shop's inventory clock. Replacement decisions therefore always see the
    /// inventory snapshot as of that month.
    pub fn run(mut self, seed: u64) -> Result<RunResult, SimError> {
        let mut traces: HashMap<u64, ModuleTrace> = HashMap::new();

        for month in 0..self.settings.months {
            let due: Vec<usize> = self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, s)| s.contract.start_month == month)
                .map(|(i, _)| i)
                .collect();
            for idx in due.into_iter().rev() {
                let mut site = self.pending.swap_remove(idx);
                site.populate(&mut self.shop)?;
                debug!(site = site.number, month, "site installed");
                self.active.push(site);
            }

            for site in &mut self.active {
                site.tick(&mut self.shop);
                if site.number == 0 {
                    for (serial, output, efficiency) in site.module_readings() {
                        traces
                            .entry(serial)
                            .or_default()
                            .push((month, output, efficiency));
                    }
                }
            }

            let mut idx = 0;
            while idx < self.active.len() {
                if self.active[idx].is_expired() {
                    let mut site = self.active.swap_remove(idx);
                    site.decommission(&mut self.shop);
                    self.retired.push(site);
                } else {
                    idx += 1;
                }
            }

            self.shop.advance();
        }

        self.shop.salvage_all();

        let performance = self
            .active
            .iter()
            .chain(self.retired.iter())
            .find(|s| s.number == 0)
            .map(|s| s.history().to_vec())
            .unwrap_or_default();

        info!(
            months = self.settings.months,
            cost = self.shop.total_transaction_cost(),
            "run complete"
        );
        Ok(RunResult {
            seed,
            performance,
            residual_value: self.shop.residual_value(0),
            total_cost: self.shop.total_transaction_cost(),
            ledger: self.shop.ledger().to_vec(),
            module_traces: traces,
            salvage_value: self.shop.salvage_value(),
            pools: self.shop.pool_counts(),
        })
    }

    /// Installed plus pooled module count, for ownership audits in tests.
    pub fn total_modules(&self) -> u64 {
        let installed: usize = self
            .active
            .iter()
            .chain(self.pending.iter())
            .map(Site::installed_count)
            .sum();
        let pools = self.shop.pool_counts();
        installed as u64
            + (pools.storage + pools.deployable + pools.junk + pools.salvage) as u64
    }
}
