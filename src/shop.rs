//! Fleet-wide inventory and matching service.
//!
//! The Shop owns every module that is not installed in a server: four
//! disjoint pools (storage, deployable, junk, salvage), a read-through
//! template cache, per-entity serial counters, and the append-only
//! transaction ledger. Sites pull modules through [`Shop::best_fit_module`]
//! and return them through [`Shop::store_module`]; once per fleet month
//! [`Shop::advance`] ages the off-grid inventory.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::assets::{Module, Server};
use crate::catalog::{Catalog, CostQuery, ModuleSpec, ServerSpec};
use crate::curve::{CurveSelector, ObservedFit};
use crate::error::SimError;
use crate::ledger::{Action, Direction, LedgerEntry, SlotRef};

/// Shop behavior knobs, fixed per run.
#[derive(Debug, Clone, Copy)]
pub struct ShopSettings {
    /// Months a returning module ages in storage before it is deployable.
    pub deploy_lag: usize,
    /// Output below which a returning module is scrapped.
    pub junk_threshold: f64,
    /// Always manufacture the highest-rated buildable model.
    pub best_available: bool,
}

/// A request for one module to fill one slot.
#[derive(Debug, Clone)]
pub struct ModuleRequest {
    /// Server model the module must be compatible with.
    pub server_model: String,
    /// Install date (fleet month) for the new or reissued module.
    pub install_month: usize,
    /// Destination slot.
    pub slot: SlotRef,
    /// Minimum output, 0 when unconstrained.
    pub power_needed: f64,
    /// Minimum forecast energy over `time_needed`, 0 when unconstrained.
    pub energy_needed: f64,
    /// Horizon in months for the energy forecast, 0 when unconstrained.
    pub time_needed: usize,
    /// Ceiling on the module's output, when the slot's server is near its
    /// nameplate.
    pub max_power: Option<f64>,
    /// Initial site fill: always manufacture, never reissue.
    pub initial: bool,
    /// Allowed module models for the requesting contract, `None` for all.
    pub allowed: Option<BTreeSet<String>>,
}

/// Per-(model, mark) cached manufacturing data. The expensive catalog-derived
/// parts are cached; the assigned percentile curve is sampled per module so
/// Monte Carlo draws stay independent.
#[derive(Debug, Clone)]
struct ModuleTemplate {
    model: String,
    base_family: String,
    mark: String,
    rating: f64,
    peak_efficiency: f64,
    ideal_curve: Vec<f64>,
    efficiency_curve: Vec<f64>,
}

/// Pool sizes plus the all-time creation counter, for ownership audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub storage: usize,
    pub deployable: usize,
    pub junk: usize,
    pub salvage: usize,
    pub created_total: u64,
}

/// The central inventory-and-matching service.
#[derive(Debug)]
pub struct Shop {
    catalog: Arc<Catalog>,
    settings: ShopSettings,
    month: usize,
    storage: Vec<Module>,
    deployable: Vec<Module>,
    junk: Vec<Module>,
    salvage: Vec<Module>,
    templates: HashMap<(String, String), ModuleTemplate>,
    module_serial: u64,
    server_serial: u64,
    created_total: u64,
    ledger: Vec<LedgerEntry>,
    residual_value: HashMap<usize, f64>,
    salvage_value: f64,
    rng: StdRng,
}

impl Shop {
    pub fn new(catalog: Arc<Catalog>, settings: ShopSettings, seed: u64) -> Self {
        Self {
            catalog,
            settings,
            month: 0,
            storage: Vec::new(),
            deployable: Vec::new(),
            junk: Vec::new(),
            salvage: Vec::new(),
            templates: HashMap::new(),
            module_serial: 0,
            server_serial: 0,
            created_total: 0,
            ledger: Vec::new(),
            residual_value: HashMap::new(),
            salvage_value: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current fleet month on the shop clock.
    pub fn month(&self) -> usize {
        self.month
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> ShopSettings {
        self.settings
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    /// Sum of every ledger entry's cost.
    pub fn total_transaction_cost(&self) -> f64 {
        self.ledger.iter().map(|e| e.cost).sum()
    }

    /// Residual value accumulated for one site from final module returns.
    pub fn residual_value(&self, site: usize) -> f64 {
        self.residual_value.get(&site).copied().unwrap_or(0.0)
    }

    /// Value of all modules moved to salvage at simulation end.
    pub fn salvage_value(&self) -> f64 {
        self.salvage_value
    }

    pub fn pool_counts(&self) -> PoolCounts {
        PoolCounts {
            storage: self.storage.len(),
            deployable: self.deployable.len(),
            junk: self.junk.len(),
            salvage: self.salvage.len(),
            created_total: self.created_total,
        }
    }

    /// Builds an empty server for a site, issuing the next server serial.
    pub fn build_server(&mut self, spec: &ServerSpec) -> Server {
        self.server_serial += 1;
        Server::new(
            self.server_serial,
            spec.model.clone(),
            spec.nameplate,
            spec.enclosure_count,
        )
    }

    /// Routes a returning module to junk or storage.
    ///
    /// A module is junked when its output is below the junk threshold or its
    /// expected life is shorter than the deploy lag (it would die during
    /// storage aging). Otherwise it enters storage, optionally resampled onto
    /// an upper-band curve (`repair`). With `final_return`, the module's
    /// output contributes to the returning site's residual value and the
    /// movement carries no storage service cost.
    pub fn store_module(&mut self, mut module: Module, slot: SlotRef, repair: bool, final_return: bool) {
        let output = module.output(false);

        if final_return {
            *self.residual_value.entry(slot.site).or_insert(0.0) += output;
        }

        if output < self.settings.junk_threshold
            || module.expected_life() < self.settings.deploy_lag
        {
            let cost = if final_return {
                0.0
            } else {
                self.catalog.cost(
                    "junk",
                    self.month,
                    &CostQuery::new().model(&module.model).mark(&module.mark),
                )
            };
            self.ledger.push(LedgerEntry::at_slot(
                self.month,
                module.serial,
                &module.model,
                &module.mark,
                output,
                module.efficiency(),
                Action::Junked,
                Direction::From,
                slot,
                cost,
            ));
            debug!(serial = module.serial, output, "module junked");
            self.junk.push(module);
            return;
        }

        let action = if repair {
            if let Some(curves) = self.catalog.power_curves(&module.model, &module.mark) {
                module.repair(curves, &mut self.rng);
            }
            Action::Repaired
        } else {
            Action::Stored
        };
        let cost = if final_return {
            0.0
        } else {
            self.catalog.cost(
                action.as_str(),
                self.month,
                &CostQuery::new()
                    .model(&module.model)
                    .mark(&module.mark)
                    .operating_time(module.age_months)
                    .power(output),
            )
        };
        self.ledger.push(LedgerEntry::at_slot(
            self.month,
            module.serial,
            &module.model,
            &module.mark,
            output,
            module.efficiency(),
            action,
            Direction::From,
            slot,
            cost,
        ));
        self.storage.push(module);
    }

    /// Monthly inventory tick.
    ///
    /// Every stored module ages by the deploy lag; modules that die during
    /// that aging move to junk, survivors become deployable. Storage is left
    /// empty and the shop clock advances one month.
    pub fn advance(&mut self) {
        let lag = self.settings.deploy_lag;
        for mut module in std::mem::take(&mut self.storage) {
            module.store(lag);
            if module.is_dead() {
                self.ledger.push(LedgerEntry::unslotted(
                    self.month,
                    module.serial,
                    &module.model,
                    &module.mark,
                    0.0,
                    0.0,
                    Action::Junked,
                    0.0,
                ));
                self.junk.push(module);
            } else {
                self.deployable.push(module);
            }
        }
        self.month += 1;
    }

    /// Finds or manufactures the module that best fits a requirement.
    ///
    /// Deployable-pool candidates must be compatible with the requesting
    /// server, clear every requested minimum (power and/or energy), and stay
    /// under `max_power` when a ceiling is given; among them the one with the
    /// smallest aggregate surplus wins (least over-provisioning). With no
    /// pool match (or on an initial fill) a new module is manufactured from
    /// the buildable models as of the install date.
    pub fn best_fit_module(&mut self, req: &ModuleRequest) -> Result<Module, SimError> {
        if !req.initial
            && let Some(idx) = self.best_deployable_index(req)
        {
            let module = self.deployable.remove(idx);
            let cost = self.catalog.cost(
                "deploy",
                self.month,
                &CostQuery::new()
                    .model(&module.model)
                    .mark(&module.mark)
                    .operating_time(module.age_months)
                    .power(module.output(false)),
            );
            self.ledger.push(LedgerEntry::at_slot(
                self.month,
                module.serial,
                &module.model,
                &module.mark,
                module.output(false),
                module.efficiency(),
                Action::Deployed,
                Direction::To,
                req.slot,
                cost,
            ));
            debug!(serial = module.serial, model = %module.model, "module reissued");
            return Ok(module);
        }

        let spec = self.pick_buildable(req)?;
        Ok(self.manufacture(&spec, req))
    }

    /// Index of the smallest-surplus deployable candidate, if any.
    fn best_deployable_index(&self, req: &ModuleRequest) -> Option<usize> {
        let compat = self.catalog.compatible_modules(&req.server_model);
        let horizon = if req.time_needed > 0 {
            Some(req.time_needed)
        } else {
            None
        };

        let mut best: Option<(usize, f64)> = None;
        for (idx, module) in self.deployable.iter().enumerate() {
            if !compat.contains(&module.model) {
                continue;
            }
            if let Some(allowed) = &req.allowed
                && !allowed.contains(&module.model)
            {
                continue;
            }
            let output = module.output(false);
            if req.max_power.is_some_and(|cap| output > cap) {
                continue;
            }

            let mut surplus = 0.0;
            if req.power_needed > 0.0 {
                let s = output - req.power_needed;
                if s < 0.0 {
                    continue;
                }
                surplus += s;
            }
            if req.energy_needed > 0.0 {
                let s = module.expected_energy(horizon) - req.energy_needed;
                if s < 0.0 {
                    continue;
                }
                surplus += s;
            }
            if req.power_needed <= 0.0 && req.energy_needed <= 0.0 {
                // Nothing requested: any live module fits, least capable first.
                surplus = output;
            }

            if best.is_none_or(|(_, s)| surplus < s) {
                best = Some((idx, surplus));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Chooses a buildable model for a new module.
    fn pick_buildable(&self, req: &ModuleRequest) -> Result<ModuleSpec, SimError> {
        let specs = self.catalog.buildable_modules(
            req.install_month,
            Some(&req.server_model),
            req.allowed.as_ref(),
        );
        if specs.is_empty() {
            return Err(SimError::AllocationExhausted {
                server_model: req.server_model.clone(),
                month: req.install_month,
                power_needed: req.power_needed,
                energy_needed: req.energy_needed,
            });
        }

        if self.settings.best_available {
            let best = specs
                .iter()
                .max_by(|a, b| a.rating.total_cmp(&b.rating))
                .copied();
            return best.cloned().ok_or_else(|| SimError::AllocationExhausted {
                server_model: req.server_model.clone(),
                month: req.install_month,
                power_needed: req.power_needed,
                energy_needed: req.energy_needed,
            });
        }

        let horizon = if req.time_needed > 0 {
            Some(req.time_needed)
        } else {
            None
        };
        let meets = |spec: &ModuleSpec| -> bool {
            if req.max_power.is_some_and(|cap| spec.rating > cap) {
                return false;
            }
            if req.power_needed > 0.0 && spec.rating < req.power_needed {
                return false;
            }
            if req.energy_needed > 0.0 {
                let energy = self
                    .catalog
                    .power_curves(&spec.model, &spec.mark)
                    .map(|set| set.expected_energy(0, None, horizon))
                    .unwrap_or(0.0);
                if energy < req.energy_needed {
                    return false;
                }
            }
            true
        };

        // Smallest model meeting the minimums; failing that, the most capable
        // available.
        let chosen = specs
            .iter()
            .filter(|spec| meets(spec))
            .min_by(|a, b| a.rating.total_cmp(&b.rating))
            .or_else(|| specs.iter().max_by(|a, b| a.rating.total_cmp(&b.rating)));
        chosen
            .map(|spec| (*spec).clone())
            .ok_or_else(|| SimError::AllocationExhausted {
                server_model: req.server_model.clone(),
                month: req.install_month,
                power_needed: req.power_needed,
                energy_needed: req.energy_needed,
            })
    }

    /// Fills the template cache for a (model, mark) if it is not present.
    fn cache_template(&mut self, spec: &ModuleSpec) {
        let key = (spec.model.clone(), spec.mark.clone());
        if self.templates.contains_key(&key) {
            return;
        }
        let set = self
            .catalog
            .power_curves(&spec.model, &spec.mark)
            .expect("catalog validated: every buildable model has curves");
        self.templates.insert(
            key,
            ModuleTemplate {
                model: spec.model.clone(),
                base_family: spec.base_family.clone(),
                mark: spec.mark.clone(),
                rating: spec.rating,
                peak_efficiency: spec.peak_efficiency,
                ideal_curve: set.ideal().to_vec(),
                efficiency_curve: set.efficiency().to_vec(),
            },
        );
    }

    /// Manufactures one module, cloning cached template data and sampling a
    /// fresh percentile curve.
    fn manufacture(&mut self, spec: &ModuleSpec, req: &ModuleRequest) -> Module {
        let key = (spec.model.clone(), spec.mark.clone());
        self.cache_template(spec);
        let curve = self
            .catalog
            .power_curves(&spec.model, &spec.mark)
            .map(|set| set.pick_curve(CurveSelector::Band(0.0, 1.0), None, &mut self.rng))
            .expect("catalog validated: every buildable model has curves");
        let template = &self.templates[&key];

        self.module_serial += 1;
        self.created_total += 1;
        let module = Module::new(
            self.module_serial,
            template.model.clone(),
            template.base_family.clone(),
            template.mark.clone(),
            req.install_month,
            template.rating,
            template.peak_efficiency,
            curve,
            template.ideal_curve.clone(),
            template.efficiency_curve.clone(),
        );

        let cost = self.catalog.cost(
            "create",
            self.month,
            &CostQuery::new()
                .model(&module.model)
                .mark(&module.mark)
                .power(module.rating),
        );
        self.ledger.push(LedgerEntry::at_slot(
            self.month,
            module.serial,
            &module.model,
            &module.mark,
            module.output(false),
            module.efficiency(),
            Action::Created,
            Direction::To,
            req.slot,
            cost,
        ));
        debug!(serial = module.serial, model = %module.model, "module created");
        module
    }

    /// Adopts one pre-existing module into the fleet at its observed
    /// operating point.
    ///
    /// The assigned curve is fitted through the observation, so the unit
    /// produces exactly what was last measured and degrades from there. The
    /// adoption is ledgered as a zero-cost creation; the equipment was paid
    /// for before the simulated horizon.
    pub fn bootstrap_module(
        &mut self,
        model: &str,
        age_months: usize,
        observed_output: f64,
        slot: SlotRef,
    ) -> Result<Module, SimError> {
        let spec = self
            .catalog
            .module_spec(model)
            .ok_or_else(|| {
                SimError::config(
                    "contract.layout",
                    format!("unknown module model \"{model}\""),
                )
            })?
            .clone();
        let fit = ObservedFit::Point {
            age: age_months,
            output: observed_output,
        };
        let curve = self
            .catalog
            .power_curves(&spec.model, &spec.mark)
            .map(|set| set.pick_curve(CurveSelector::Band(0.0, 1.0), Some(&fit), &mut self.rng))
            .ok_or_else(|| {
                SimError::config(
                    "contract.layout",
                    format!("no curves for (\"{}\", \"{}\")", spec.model, spec.mark),
                )
            })?;
        self.cache_template(&spec);
        let template = &self.templates[&(spec.model.clone(), spec.mark.clone())];

        self.module_serial += 1;
        self.created_total += 1;
        let mut module = Module::new(
            self.module_serial,
            template.model.clone(),
            template.base_family.clone(),
            template.mark.clone(),
            0,
            template.rating,
            template.peak_efficiency,
            curve,
            template.ideal_curve.clone(),
            template.efficiency_curve.clone(),
        );
        module.store(age_months);

        self.ledger.push(LedgerEntry::at_slot(
            self.month,
            module.serial,
            &module.model,
            &module.mark,
            module.output(false),
            module.efficiency(),
            Action::Created,
            Direction::To,
            slot,
            0.0,
        ));
        debug!(serial = module.serial, model = %module.model, age_months, "module adopted");
        Ok(module)
    }

    /// Ledgers an intra-site rebalancing transfer as two half-cost entries.
    pub fn balance_transfer(&mut self, module: &Module, from: SlotRef, to: SlotRef) {
        let full = self.catalog.cost(
            "move",
            self.month,
            &CostQuery::new()
                .model(&module.model)
                .mark(&module.mark)
                .power(module.output(false)),
        );
        let half = full / 2.0;
        self.ledger.push(LedgerEntry::at_slot(
            self.month,
            module.serial,
            &module.model,
            &module.mark,
            module.output(false),
            module.efficiency(),
            Action::Pulled,
            Direction::From,
            from,
            half,
        ));
        self.ledger.push(LedgerEntry::at_slot(
            self.month,
            module.serial,
            &module.model,
            &module.mark,
            module.output(false),
            module.efficiency(),
            Action::Moved,
            Direction::To,
            to,
            half,
        ));
    }

    /// At simulation end, moves all stored modules to salvage, valuing each
    /// by its current output.
    pub fn salvage_all(&mut self) {
        for module in std::mem::take(&mut self.storage) {
            let value = module.output(false);
            self.salvage_value += value;
            self.ledger.push(LedgerEntry::unslotted(
                self.month,
                module.serial,
                &module.model,
                &module.mark,
                value,
                module.efficiency(),
                Action::Salvaged,
                0.0,
            ));
            self.salvage.push(module);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CostRow, Thresholds, generate_curve_set};
    use std::collections::BTreeSet;

    fn test_catalog() -> Arc<Catalog> {
        let modules = vec![
            ModuleSpec {
                model: "M10".to_string(),
                base_family: "M".to_string(),
                mark: "A".to_string(),
                rating: 100.0,
                peak_efficiency: 0.5,
                intro_month: 0,
                retire_month: None,
            },
            ModuleSpec {
                model: "M20".to_string(),
                base_family: "M".to_string(),
                mark: "A".to_string(),
                rating: 200.0,
                peak_efficiency: 0.52,
                intro_month: 0,
                retire_month: None,
            },
        ];
        let mut curves = HashMap::new();
        curves.insert(
            ("M10".to_string(), "A".to_string()),
            generate_curve_set(100.0, 60, 5, 0.003, 0.1, 0.5, 0.001),
        );
        curves.insert(
            ("M20".to_string(), "A".to_string()),
            generate_curve_set(200.0, 60, 5, 0.003, 0.1, 0.52, 0.001),
        );
        let mut compat = HashMap::new();
        compat.insert(
            "S400".to_string(),
            BTreeSet::from(["M10".to_string(), "M20".to_string()]),
        );
        let mut servers = HashMap::new();
        servers.insert(
            "S".to_string(),
            vec![ServerSpec {
                model: "S400".to_string(),
                nameplate: 400.0,
                enclosure_count: 4,
                plus_one: false,
            }],
        );
        let costs = vec![CostRow {
            action: "create".to_string(),
            month: 0,
            model: None,
            mark: None,
            operating_time_ceiling: None,
            power_ceiling: None,
            cost: 50.0,
        }];
        Arc::new(Catalog::new(
            modules,
            curves,
            compat,
            servers,
            costs,
            Thresholds {
                degraded: 10.0,
                inefficient: 0.05,
                deviated: 0.15,
                early_deploy_years: 2.0,
                ctmo_pad: 0.01,
            },
        ))
    }

    fn test_shop() -> Shop {
        Shop::new(
            test_catalog(),
            ShopSettings {
                deploy_lag: 2,
                junk_threshold: 20.0,
                best_available: false,
            },
            7,
        )
    }

    fn slot() -> SlotRef {
        SlotRef { site: 0, server: 0, enclosure: 0 }
    }

    fn request(power: f64) -> ModuleRequest {
        ModuleRequest {
            server_model: "S400".to_string(),
            install_month: 0,
            slot: slot(),
            power_needed: power,
            energy_needed: 0.0,
            time_needed: 0,
            max_power: None,
            initial: false,
            allowed: None,
        }
    }

    fn weak_module(serial: u64, output: f64, life: usize) -> Module {
        Module::new(
            serial, "M10", "M", "A", 0, 100.0, 0.5,
            vec![output; life], vec![output; life], vec![0.5; life],
        )
    }

    #[test]
    fn low_output_module_is_junked_with_one_from_entry() {
        let mut shop = test_shop();
        shop.store_module(weak_module(9, 15.0, 30), slot(), false, false);

        let counts = shop.pool_counts();
        assert_eq!(counts.junk, 1);
        assert_eq!(counts.storage, 0);
        assert_eq!(shop.ledger().len(), 1);
        let entry = &shop.ledger()[0];
        assert_eq!(entry.action, Action::Junked);
        assert_eq!(entry.direction, Direction::From);
    }

    #[test]
    fn short_life_module_is_junked_despite_healthy_output() {
        let mut shop = test_shop();
        // Expected life 1 < deploy lag 2.
        shop.store_module(weak_module(3, 80.0, 1), slot(), false, false);
        assert_eq!(shop.pool_counts().junk, 1);
    }

    #[test]
    fn healthy_module_enters_storage_then_deployable() {
        let mut shop = test_shop();
        shop.store_module(weak_module(4, 80.0, 30), slot(), false, false);
        assert_eq!(shop.pool_counts().storage, 1);

        shop.advance();
        let counts = shop.pool_counts();
        assert_eq!(counts.storage, 0);
        assert_eq!(counts.deployable, 1);
        assert_eq!(shop.month(), 1);
    }

    #[test]
    fn module_dying_during_storage_aging_is_junked() {
        let mut shop = test_shop();
        // Life 2 ties the deploy lag: survives the junk test but dies aging.
        shop.store_module(weak_module(5, 80.0, 2), slot(), false, false);
        shop.advance();
        let counts = shop.pool_counts();
        assert_eq!(counts.deployable, 0);
        assert_eq!(counts.junk, 1);
    }

    #[test]
    fn empty_pool_manufactures_and_ledgers_created() {
        let mut shop = test_shop();
        let module = shop
            .best_fit_module(&request(100.0))
            .expect("buildable models exist");
        assert_eq!(module.model, "M10");
        let entry = shop.ledger().last().expect("one entry");
        assert_eq!(entry.action, Action::Created);
        assert_eq!(entry.cost, 50.0);
        assert_eq!(shop.pool_counts().created_total, 1);
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_surplus() {
        let mut shop = test_shop();
        shop.deployable.push(weak_module(1, 95.0, 30));
        shop.deployable.push(weak_module(2, 60.0, 30));
        let module = shop.best_fit_module(&request(50.0)).expect("pool match");
        assert_eq!(module.serial, 2, "60 has the smaller surplus over 50");
        assert_eq!(shop.ledger().last().map(|e| e.action), Some(Action::Deployed));
    }

    #[test]
    fn insufficient_pool_candidates_fall_through_to_manufacture() {
        let mut shop = test_shop();
        shop.deployable.push(weak_module(1, 60.0, 30));
        let module = shop.best_fit_module(&request(150.0)).expect("manufactured");
        // No deployable meets 150; the smallest sufficient model is M20.
        assert_eq!(module.model, "M20");
        assert_eq!(shop.pool_counts().deployable, 1, "pool untouched");
    }

    #[test]
    fn max_power_ceiling_rejects_oversized_candidates() {
        let mut shop = test_shop();
        shop.deployable.push(weak_module(42, 95.0, 30));
        let mut req = request(50.0);
        req.max_power = Some(80.0);
        let module = shop.best_fit_module(&req).expect("manufactured under cap");
        assert_ne!(module.serial, 42, "the 95-output candidate is over the cap");
    }

    #[test]
    fn initial_fill_never_reissues_pool_modules() {
        let mut shop = test_shop();
        shop.deployable.push(weak_module(42, 95.0, 30));
        let mut req = request(50.0);
        req.initial = true;
        let module = shop.best_fit_module(&req).expect("manufactured");
        assert_ne!(module.serial, 42);
        assert_eq!(shop.pool_counts().deployable, 1);
    }

    #[test]
    fn allocation_exhausted_when_nothing_buildable() {
        let mut shop = test_shop();
        let mut req = request(100.0);
        req.allowed = Some(BTreeSet::from(["NONEXISTENT".to_string()]));
        let err = shop.best_fit_module(&req);
        assert!(matches!(err, Err(SimError::AllocationExhausted { .. })));
    }

    #[test]
    fn best_available_picks_highest_rated_model() {
        let mut shop = Shop::new(
            test_catalog(),
            ShopSettings {
                deploy_lag: 2,
                junk_threshold: 20.0,
                best_available: true,
            },
            7,
        );
        let module = shop.best_fit_module(&request(10.0)).expect("manufactured");
        assert_eq!(module.model, "M20");
    }

    #[test]
    fn final_return_accrues_residual_value_without_cost() {
        let mut shop = test_shop();
        shop.store_module(weak_module(6, 80.0, 30), slot(), false, true);
        assert!((shop.residual_value(0) - 80.0).abs() < 1e-9);
        assert_eq!(shop.ledger()[0].cost, 0.0);
    }

    #[test]
    fn salvage_all_drains_storage_and_values_by_output() {
        let mut shop = test_shop();
        shop.store_module(weak_module(7, 80.0, 30), slot(), false, false);
        shop.store_module(weak_module(8, 50.0, 30), slot(), false, false);
        shop.salvage_all();
        let counts = shop.pool_counts();
        assert_eq!(counts.storage, 0);
        assert_eq!(counts.salvage, 2);
        assert!((shop.salvage_value() - 130.0).abs() < 1e-9);
    }

    #[test]
    fn balance_transfer_splits_cost_across_two_entries() {
        let mut shop = test_shop();
        let module = weak_module(9, 80.0, 30);
        let from = SlotRef { site: 0, server: 0, enclosure: 1 };
        let to = SlotRef { site: 0, server: 1, enclosure: 0 };
        shop.balance_transfer(&module, from, to);
        assert_eq!(shop.ledger().len(), 2);
        assert_eq!(shop.ledger()[0].action, Action::Pulled);
        assert_eq!(shop.ledger()[1].action, Action::Moved);
        assert_eq!(shop.ledger()[0].server, Some(0));
        assert_eq!(shop.ledger()[1].server, Some(1));
    }

    #[test]
    fn ownership_pools_stay_disjoint_and_account_for_all_modules() {
        let mut shop = test_shop();
        let m1 = shop.best_fit_module(&request(50.0)).expect("created");
        let _m2 = shop.best_fit_module(&request(50.0)).expect("created");
        shop.store_module(m1, slot(), false, false);
        shop.advance();
        let counts = shop.pool_counts();
        // m2 is installed (held by the caller); m1 is deployable.
        let pooled = counts.storage + counts.deployable + counts.junk + counts.salvage;
        assert_eq!(pooled as u64 + 1, counts.created_total);
    }
}
