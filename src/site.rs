//! Per-site monthly compliance and decision controller.
//!
//! A site owns its servers, records a monthly performance row, and runs the
//! repair / early-deploy / replacement policy against the shared Shop. One
//! policy implementation serves every site, target or peer.

use std::collections::BTreeSet;

use tracing::debug;

use crate::assets::{Module, Server};
use crate::balance;
use crate::catalog::Thresholds;
use crate::error::SimError;
use crate::ledger::SlotRef;
use crate::shop::{ModuleRequest, Shop};

/// A pre-existing module in a bootstrapped layout, identified by its last
/// observed operating point.
#[derive(Debug, Clone)]
pub struct ExistingModule {
    /// Enclosure index within its server.
    pub slot: usize,
    /// Module model.
    pub model: String,
    /// Age in months at simulation start.
    pub age_months: usize,
    /// Last measured output; the assigned curve is fitted through it.
    pub observed_output: f64,
}

/// One server of a pre-existing layout.
#[derive(Debug, Clone)]
pub struct ExistingServer {
    /// Server model, resolved against the catalog for nameplate and slots.
    pub model: String,
    pub modules: Vec<ExistingModule>,
}

/// Immutable per-site contract parameters, resolved once at construction.
#[derive(Debug, Clone)]
pub struct Contract {
    /// Contract length in months.
    pub length_months: usize,
    /// Trailing window for WTMO/Weff, in months.
    pub window_months: usize,
    /// Output (TMO) guarantee, as a fraction of system size. `None` when the
    /// contract carries no output guarantee.
    pub output_limit: Option<f64>,
    /// Efficiency guarantee. `None` when not guaranteed.
    pub efficiency_limit: Option<f64>,
    /// Fleet month the site is installed.
    pub start_month: usize,
    /// Months of operation that elapsed before the simulation began; weights
    /// the blend of the starting cumulative values.
    pub months_prior: usize,
    /// Cumulative TMO carried in from before the simulation.
    pub starting_ctmo: f64,
    /// Cumulative efficiency carried in from before the simulation.
    pub starting_ceff: f64,
    /// Contract-year ranges (inclusive, zero-based) during which the decision
    /// policy is suspended.
    pub blackout_years: Vec<(usize, usize)>,
    /// Server class used to size the build.
    pub server_class: String,
    /// Number of servers.
    pub server_count: usize,
    /// Total contracted size; servers are sized to `target / count`.
    pub target_size: f64,
    /// Module models this contract may use, `None` for all compatible.
    pub allowed_modules: Option<BTreeSet<String>>,
    /// Whether deviated modules are pulled for repair.
    pub repairs_enabled: bool,
    /// Pre-existing layout to bootstrap from instead of building from empty.
    pub layout: Option<Vec<ExistingServer>>,
}

/// One recorded month of site performance.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    /// Site-local month index.
    pub month: usize,
    /// Fleet month the row was recorded.
    pub fleet_month: usize,
    pub ptmo: f64,
    pub peff: f64,
    pub ctmo: f64,
    pub ceff: f64,
    pub wtmo: f64,
    pub weff: f64,
    pub ceiling_loss: f64,
    pub fails_tmo: bool,
    pub fails_efficiency: bool,
}

/// Compliance metrics for the current month.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub ptmo: f64,
    pub peff: f64,
    pub ctmo: f64,
    pub ceff: f64,
    pub wtmo: f64,
    pub weff: f64,
    pub ceiling_loss: f64,
    pub fails_ctmo: bool,
    pub fails_wtmo: bool,
    pub fails_ptmo: bool,
    pub fails_ceff: bool,
    pub fails_weff: bool,
    pub fails_peff: bool,
}

impl Metrics {
    /// Any output metric failing.
    pub fn fails_tmo(&self) -> bool {
        self.fails_ctmo || self.fails_wtmo || self.fails_ptmo
    }

    /// Any efficiency metric failing.
    pub fn fails_efficiency(&self) -> bool {
        self.fails_ceff || self.fails_weff || self.fails_peff
    }
}

/// Which failing guarantee a replacement is sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Power,
    Efficiency,
}

/// A contracted installation: servers, performance history, and the monthly
/// decision policy.
#[derive(Debug)]
pub struct Site {
    /// Site number within the fleet (0 is the reporting target).
    pub number: usize,
    pub contract: Contract,
    pub servers: Vec<Server>,
    /// Site-local months elapsed.
    month: usize,
    /// Final per-month capped output, one entry per completed month.
    monthly_output: Vec<f64>,
    /// Final per-month fuel burn.
    monthly_fuel: Vec<f64>,
    history: Vec<PerformanceRow>,
}

impl Site {
    pub fn new(number: usize, contract: Contract) -> Self {
        Self {
            number,
            contract,
            servers: Vec::new(),
            month: 0,
            monthly_output: Vec::new(),
            monthly_fuel: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Builds and fills the site's servers through the Shop.
    ///
    /// With a pre-existing layout in the contract, servers and modules are
    /// bootstrapped at their observed operating points. Otherwise server
    /// models come from the catalog's class table sized to the contract and
    /// every enclosure (minus the spare when the model keeps a plus-one slot)
    /// is filled with a manufactured module.
    pub fn populate(&mut self, shop: &mut Shop) -> Result<(), SimError> {
        if let Some(layout) = self.contract.layout.clone() {
            return self.bootstrap(shop, &layout);
        }
        let per_server = self.contract.target_size / self.contract.server_count as f64;
        let spec = shop
            .catalog()
            .server_model(&self.contract.server_class, Some(per_server))
            .ok_or_else(|| {
                SimError::config(
                    "contract.server_class",
                    format!("unknown server class \"{}\"", self.contract.server_class),
                )
            })?;

        for server_idx in 0..self.contract.server_count {
            let server = shop.build_server(&spec);
            let fill = if spec.plus_one {
                spec.enclosure_count.saturating_sub(1)
            } else {
                spec.enclosure_count
            };
            let per_slot = spec.nameplate / spec.enclosure_count as f64;
            self.servers.push(server);

            for slot_idx in 0..fill {
                let req = ModuleRequest {
                    server_model: spec.model.clone(),
                    install_month: self.contract.start_month,
                    slot: SlotRef {
                        site: self.number,
                        server: server_idx,
                        enclosure: slot_idx,
                    },
                    power_needed: per_slot,
                    energy_needed: 0.0,
                    time_needed: 0,
                    max_power: None,
                    initial: true,
                    allowed: self.contract.allowed_modules.clone(),
                };
                let module = shop.best_fit_module(&req)?;
                self.servers[server_idx].enclosures[slot_idx].install(module);
            }
        }
        Ok(())
    }

    /// Rebuilds a pre-existing layout, fitting each module's curve through
    /// its observed operating point.
    fn bootstrap(&mut self, shop: &mut Shop, layout: &[ExistingServer]) -> Result<(), SimError> {
        for (server_idx, existing) in layout.iter().enumerate() {
            let spec = shop
                .catalog()
                .server_spec(&existing.model)
                .cloned()
                .ok_or_else(|| {
                    SimError::config(
                        "contract.layout",
                        format!("unknown server model \"{}\"", existing.model),
                    )
                })?;
            let server = shop.build_server(&spec);
            self.servers.push(server);

            for m in &existing.modules {
                if m.slot >= spec.enclosure_count {
                    return Err(SimError::config(
                        "contract.layout",
                        format!(
                            "slot {} out of range for server model \"{}\"",
                            m.slot, existing.model
                        ),
                    ));
                }
                let slot = SlotRef {
                    site: self.number,
                    server: server_idx,
                    enclosure: m.slot,
                };
                let module =
                    shop.bootstrap_module(&m.model, m.age_months, m.observed_output, slot)?;
                self.servers[server_idx].enclosures[m.slot].install(module);
            }
        }
        Ok(())
    }

    /// Site-local months elapsed.
    pub fn month(&self) -> usize {
        self.month
    }

    /// Whether the contract has run its full length.
    pub fn is_expired(&self) -> bool {
        self.month >= self.contract.length_months
    }

    pub fn history(&self) -> &[PerformanceRow] {
        &self.history
    }

    /// Total nameplate across servers.
    pub fn system_size(&self) -> f64 {
        self.servers.iter().map(|s| s.nameplate).sum()
    }

    /// Current capped output and fuel burn across servers.
    fn measure(&self) -> (f64, f64) {
        let output = self.servers.iter().map(Server::output_capped).sum();
        let fuel = self.servers.iter().map(Server::fuel).sum();
        (output, fuel)
    }

    /// Sum of per-server ceiling losses.
    pub fn ceiling_loss(&self) -> f64 {
        self.servers.iter().map(Server::ceiling_loss).sum()
    }

    /// Whether the current contract year falls in a blackout window.
    fn in_blackout(&self) -> bool {
        let year = self.month / 12;
        self.contract
            .blackout_years
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&year))
    }

    /// Compliance metrics treating the current hardware state as this month's
    /// measurement. Pure: repeated calls without state changes agree.
    pub fn metrics(&self) -> Metrics {
        let size = self.system_size();
        let (output, fuel) = self.measure();
        let n = self.monthly_output.len() + 1;

        let ptmo = if size > 0.0 { output / size } else { 0.0 };
        let peff = if fuel > 0.0 { output / fuel } else { 0.0 };

        // Cumulative: blend in the pre-simulation history proportionally.
        let prior = self.contract.months_prior as f64;
        let prior_output = self.contract.starting_ctmo * size * prior;
        let prior_fuel = if self.contract.starting_ceff > 0.0 {
            prior_output / self.contract.starting_ceff
        } else {
            0.0
        };
        let cum_output: f64 = self.monthly_output.iter().sum::<f64>() + output;
        let cum_fuel: f64 = self.monthly_fuel.iter().sum::<f64>() + fuel;
        let elapsed = prior + n as f64;
        let ctmo = if size > 0.0 && elapsed > 0.0 {
            (prior_output + cum_output) / (elapsed * size)
        } else {
            0.0
        };
        let ceff = if prior_fuel + cum_fuel > 0.0 {
            (prior_output + cum_output) / (prior_fuel + cum_fuel)
        } else {
            0.0
        };

        // Windowed: trailing mean, whole history when the window exceeds it.
        let window = self.contract.window_months.min(n).max(1);
        let tail = window - 1;
        let start = self.monthly_output.len().saturating_sub(tail);
        let win_output: f64 = self.monthly_output[start..].iter().sum::<f64>() + output;
        let win_fuel: f64 = self.monthly_fuel[start..].iter().sum::<f64>() + fuel;
        let wtmo = if size > 0.0 {
            win_output / (window as f64 * size)
        } else {
            0.0
        };
        let weff = if win_fuel > 0.0 { win_output / win_fuel } else { 0.0 };

        let out_limit = self.contract.output_limit;
        let eff_limit = self.contract.efficiency_limit;
        Metrics {
            ptmo,
            peff,
            ctmo,
            ceff,
            wtmo,
            weff,
            ceiling_loss: self.ceiling_loss(),
            fails_ctmo: out_limit.is_some_and(|l| ctmo < l),
            fails_wtmo: out_limit.is_some_and(|l| wtmo < l),
            fails_ptmo: out_limit.is_some_and(|l| ptmo < l),
            fails_ceff: eff_limit.is_some_and(|l| ceff < l),
            fails_weff: eff_limit.is_some_and(|l| weff < l),
            fails_peff: eff_limit.is_some_and(|l| peff < l),
        }
    }

    /// Builds this month's performance row from the current state.
    pub fn performance_row(&self, fleet_month: usize) -> PerformanceRow {
        let m = self.metrics();
        PerformanceRow {
            month: self.month,
            fleet_month,
            ptmo: m.ptmo,
            peff: m.peff,
            ctmo: m.ctmo,
            ceff: m.ceff,
            wtmo: m.wtmo,
            weff: m.weff,
            ceiling_loss: m.ceiling_loss,
            fails_tmo: m.fails_tmo(),
            fails_efficiency: m.fails_efficiency(),
        }
    }

    /// Runs one month of the compliance-and-decision policy.
    ///
    /// Records the month's performance row, then, outside blackout years,
    /// runs the repair pass, the early-deploy check, and the replacement loop.
    /// Finally commits the month's measurement and ages every module.
    pub fn tick(&mut self, shop: &mut Shop) {
        let thresholds = shop.catalog().thresholds();
        let row = self.performance_row(shop.month());
        self.history.push(row);

        if !self.in_blackout() {
            if self.contract.repairs_enabled {
                self.repair_pass(shop, &thresholds);
            }
            self.early_deploy_pass(shop, &thresholds);
            self.replacement_loop(shop, &thresholds);
        }

        let (output, fuel) = self.measure();
        self.monthly_output.push(output);
        self.monthly_fuel.push(fuel);
        for server in &mut self.servers {
            for enclosure in &mut server.enclosures {
                if let Some(module) = enclosure.module.as_mut() {
                    module.degrade();
                }
            }
        }
        self.month += 1;
    }

    /// Pulls every deviated module for repair.
    fn repair_pass(&mut self, shop: &mut Shop, thresholds: &Thresholds) {
        for server_idx in 0..self.servers.len() {
            for slot_idx in 0..self.servers[server_idx].enclosures.len() {
                let Some(module) = self.servers[server_idx].enclosures[slot_idx]
                    .module
                    .take_if(|m| m.is_deviated(thresholds.deviated))
                else {
                    continue;
                };
                debug!(
                    site = self.number,
                    serial = module.serial,
                    "pulling deviated module for repair"
                );
                shop.store_module(
                    module,
                    SlotRef {
                        site: self.number,
                        server: server_idx,
                        enclosure: slot_idx,
                    },
                    true,
                    false,
                );
            }
        }
    }

    /// Forecast site output over the next `months`, following each installed
    /// module's assigned curve and capping each server at its nameplate per
    /// month.
    fn projected_output(&self, months: usize) -> f64 {
        let mut total = 0.0;
        for t in 0..months {
            for server in &self.servers {
                let uncapped: f64 = server
                    .enclosures
                    .iter()
                    .filter_map(|e| e.module.as_ref())
                    .map(|m| {
                        m.curve()
                            .get(m.age_months + t)
                            .copied()
                            .unwrap_or(0.0)
                    })
                    .sum();
                total += uncapped.min(server.nameplate);
            }
        }
        total
    }

    /// Near contract end, projects the final cumulative output and deploys a
    /// closing-the-gap module early when the projection falls short.
    fn early_deploy_pass(&mut self, shop: &mut Shop, thresholds: &Thresholds) {
        let Some(limit) = self.contract.output_limit else {
            return;
        };
        let remaining = self.contract.length_months.saturating_sub(self.month);
        if remaining == 0 {
            return;
        }
        let years_remaining = remaining as f64 / 12.0;
        if years_remaining > thresholds.early_deploy_years {
            return;
        }

        let size = self.system_size();
        if size <= 0.0 {
            return;
        }
        let prior = self.contract.months_prior as f64;
        let prior_output = self.contract.starting_ctmo * size * prior;
        let past_output: f64 = self.monthly_output.iter().sum();
        let future_output = self.projected_output(remaining);
        let total_months = prior + self.contract.length_months as f64;
        let projected_ctmo = (prior_output + past_output + future_output) / (total_months * size);

        let guarded = limit + thresholds.ctmo_pad;
        if projected_ctmo >= guarded {
            return;
        }
        let shortfall_energy = (guarded - projected_ctmo) * total_months * size;
        debug!(
            site = self.number,
            projected_ctmo, shortfall_energy, "early-deploy projection short"
        );

        // Slot with the least forecast remaining energy; empty slots count as
        // zero and sort first.
        let mut worst: Option<(usize, usize, f64)> = None;
        for (si, server) in self.servers.iter().enumerate() {
            for (ei, enclosure) in server.enclosures.iter().enumerate() {
                let energy = enclosure
                    .module
                    .as_ref()
                    .map(|m| m.expected_energy(Some(remaining)))
                    .unwrap_or(0.0);
                if worst.is_none_or(|(_, _, e)| energy < e) {
                    worst = Some((si, ei, energy));
                }
            }
        }
        let Some((server_idx, slot_idx, removed_energy)) = worst else {
            return;
        };

        let slot = SlotRef {
            site: self.number,
            server: server_idx,
            enclosure: slot_idx,
        };
        let removed_output = self.servers[server_idx].enclosures[slot_idx]
            .module
            .as_ref()
            .map(|m| m.output(false))
            .unwrap_or(0.0);
        let was_empty = self.servers[server_idx].enclosures[slot_idx].module.is_none();

        let power_needed = shortfall_energy / remaining as f64 + removed_output;
        let req = ModuleRequest {
            server_model: self.servers[server_idx].model.clone(),
            install_month: shop.month(),
            slot,
            power_needed,
            energy_needed: shortfall_energy + removed_energy,
            time_needed: remaining,
            max_power: self.replacement_power_cap(server_idx, removed_output, power_needed),
            initial: false,
            allowed: self.contract.allowed_modules.clone(),
        };
        let Ok(module) = shop.best_fit_module(&req) else {
            // Nothing buildable: the shortfall stays on the record.
            return;
        };
        if let Some(old) = self.servers[server_idx].enclosures[slot_idx].install(module) {
            shop.store_module(old, slot, false, false);
        }
        if was_empty {
            balance::balance(self, shop);
        }
    }

    /// Replaces worst slots until no configured metric fails or no failing
    /// metric has an eligible candidate.
    fn replacement_loop(&mut self, shop: &mut Shop, thresholds: &Thresholds) {
        // Two attempts per slot bounds the loop even when replacements never
        // clear the failure.
        let slots: usize = self.servers.iter().map(|s| s.enclosures.len()).sum();
        let max_swaps = slots * 2;

        for _ in 0..max_swaps {
            let metrics = self.metrics();
            let mut resolved = false;
            if metrics.fails_tmo()
                && self.replace_worst(shop, thresholds, FailureKind::Power, &metrics)
            {
                resolved = true;
            } else if metrics.fails_efficiency()
                && self.replace_worst(shop, thresholds, FailureKind::Efficiency, &metrics)
            {
                resolved = true;
            }
            if !resolved {
                break;
            }
        }
    }

    /// One replacement attempt for a failing metric. Returns whether a swap
    /// was performed.
    fn replace_worst(
        &mut self,
        shop: &mut Shop,
        thresholds: &Thresholds,
        kind: FailureKind,
        metrics: &Metrics,
    ) -> bool {
        let Some((server_idx, slot_idx)) = self.replacement_slot(kind, thresholds) else {
            return false;
        };
        let slot = SlotRef {
            site: self.number,
            server: server_idx,
            enclosure: slot_idx,
        };

        let (removed_output, removed_rating, removed_energy, removed_life, was_empty) = {
            let occupant = self.servers[server_idx].enclosures[slot_idx].module.as_ref();
            match occupant {
                Some(m) => (
                    m.output(false),
                    m.rating,
                    m.expected_energy(None),
                    m.expected_life(),
                    false,
                ),
                None => (0.0, 0.0, 0.0, 0, true),
            }
        };

        let req = match kind {
            FailureKind::Power => {
                let size = self.system_size();
                let n = (self.monthly_output.len() + 1) as f64;
                // Fixed priority: cumulative, then windowed, then periodic.
                let (value, basis) = if metrics.fails_ctmo {
                    (metrics.ctmo, self.contract.months_prior as f64 + n)
                } else if metrics.fails_wtmo {
                    (metrics.wtmo, self.contract.window_months.min(n as usize).max(1) as f64)
                } else {
                    (metrics.ptmo, 1.0)
                };
                let limit = self.contract.output_limit.unwrap_or(0.0);
                let shortfall = (limit - value).max(0.0) * size * basis;
                let power_needed = shortfall + removed_output;
                ModuleRequest {
                    server_model: self.servers[server_idx].model.clone(),
                    install_month: shop.month(),
                    slot,
                    power_needed,
                    energy_needed: 0.0,
                    time_needed: 0,
                    max_power: self.replacement_power_cap(server_idx, removed_output, power_needed),
                    initial: false,
                    allowed: self.contract.allowed_modules.clone(),
                }
            }
            FailureKind::Efficiency => {
                // Match what is being taken out; a dead module is matched by
                // its original rating.
                let power = if removed_output > 0.0 {
                    removed_output
                } else {
                    removed_rating
                };
                ModuleRequest {
                    server_model: self.servers[server_idx].model.clone(),
                    install_month: shop.month(),
                    slot,
                    power_needed: power,
                    energy_needed: removed_energy,
                    time_needed: removed_life,
                    max_power: self.replacement_power_cap(server_idx, removed_output, power),
                    initial: false,
                    allowed: self.contract.allowed_modules.clone(),
                }
            }
        };

        let Ok(module) = shop.best_fit_module(&req) else {
            // AllocationExhausted: the failure stays recorded for this tick.
            debug!(site = self.number, "replacement request exhausted");
            return false;
        };
        if let Some(old) = self.servers[server_idx].enclosures[slot_idx].install(module) {
            shop.store_module(old, slot, false, false);
        }
        if was_empty {
            balance::balance(self, shop);
        }
        true
    }

    /// Nameplate-derived ceiling for a module going into `server_idx` in
    /// place of `removed_output`. `None` when the needed power alone already
    /// exceeds the ceiling: meeting the shortfall then outranks clipping.
    fn replacement_power_cap(
        &self,
        server_idx: usize,
        removed_output: f64,
        power_needed: f64,
    ) -> Option<f64> {
        let server = &self.servers[server_idx];
        let cap = server.nameplate - server.output_uncapped() + removed_output;
        (cap >= power_needed).then_some(cap)
    }

    /// Chooses the slot to replace for a failing metric.
    ///
    /// Empty or dead slots anywhere on site are preferred, ranked by their
    /// server's headroom (highest first). Otherwise the worst eligible filled
    /// slot by the failing metric is chosen; servers already at nameplate are
    /// excluded from power-based ranking.
    fn replacement_slot(
        &self,
        kind: FailureKind,
        thresholds: &Thresholds,
    ) -> Option<(usize, usize)> {
        let mut open: Option<(usize, usize, f64)> = None;
        for (si, server) in self.servers.iter().enumerate() {
            if let Some(ei) = server.empty_enclosure_index(true) {
                let headroom = server.headroom();
                if open.is_none_or(|(_, _, h)| headroom > h) {
                    open = Some((si, ei, headroom));
                }
            }
        }
        if let Some((si, ei, _)) = open {
            return Some((si, ei));
        }

        let mut worst: Option<(usize, usize, f64)> = None;
        for (si, server) in self.servers.iter().enumerate() {
            if kind == FailureKind::Power && server.ceiling_loss() > 0.0 {
                // Already at nameplate: more power here is wasted.
                continue;
            }
            for (ei, enclosure) in server.enclosures.iter().enumerate() {
                let Some(module) = enclosure.module.as_ref() else {
                    continue;
                };
                let (eligible, rank) = match kind {
                    FailureKind::Power => {
                        (module.is_degraded(thresholds.degraded), module.output(false))
                    }
                    FailureKind::Efficiency => {
                        (module.is_inefficient(thresholds.inefficient), module.efficiency())
                    }
                };
                if !eligible {
                    continue;
                }
                if worst.is_none_or(|(_, _, r)| rank < r) {
                    worst = Some((si, ei, rank));
                }
            }
        }
        worst.map(|(si, ei, _)| (si, ei))
    }

    /// Decommissions the site at contract end, returning every module to the
    /// Shop with residual valuation.
    pub fn decommission(&mut self, shop: &mut Shop) {
        for server_idx in 0..self.servers.len() {
            for slot_idx in 0..self.servers[server_idx].enclosures.len() {
                if let Some(module) = self.servers[server_idx].enclosures[slot_idx].remove() {
                    shop.store_module(
                        module,
                        SlotRef {
                            site: self.number,
                            server: server_idx,
                            enclosure: slot_idx,
                        },
                        false,
                        true,
                    );
                }
            }
        }
        self.servers.clear();
        debug!(site = self.number, "site decommissioned");
    }

    /// Installed modules with their current readings, for trace reporting.
    pub fn module_readings(&self) -> Vec<(u64, f64, f64)> {
        let mut readings = Vec::new();
        for server in &self.servers {
            for enclosure in &server.enclosures {
                if let Some(m) = enclosure.module.as_ref() {
                    readings.push((m.serial, m.output(false), m.efficiency()));
                }
            }
        }
        readings
    }

    /// Count of installed modules, for ownership audits.
    pub fn installed_count(&self) -> usize {
        self.servers.iter().map(Server::module_count).sum()
    }
}
