//! Immutable cost and curve repository.
//!
//! The catalog is built once before a run from scenario configuration and is
//! shared read-only by every Monte Carlo run. It answers cost lookups with a
//! most-specific-row match rule, serves degradation/efficiency curve tables,
//! and knows which module models fit (and can be built for) which servers.

use std::collections::{BTreeSet, HashMap};

use crate::curve::PowerCurveSet;
use crate::error::SimError;

/// Decision thresholds shared by every site controller.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Output drop below rating that marks a module degraded.
    pub degraded: f64,
    /// Efficiency drop below peak that marks a module inefficient.
    pub inefficient: f64,
    /// Fractional shortfall vs ideal that flags a module for repair.
    pub deviated: f64,
    /// Years-remaining threshold that arms the early-deploy check.
    pub early_deploy_years: f64,
    /// Safety pad added to the output limit in the end-of-contract projection.
    pub ctmo_pad: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            degraded: 10.0,
            inefficient: 0.05,
            deviated: 0.25,
            early_deploy_years: 2.0,
            ctmo_pad: 0.01,
        }
    }
}

/// One buildable module model.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub model: String,
    pub base_family: String,
    pub mark: String,
    pub rating: f64,
    pub peak_efficiency: f64,
    /// First month the model can be manufactured.
    pub intro_month: usize,
    /// Month the model leaves production, if it ever does.
    pub retire_month: Option<usize>,
}

/// A server model resolved for a site build.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub model: String,
    pub nameplate: f64,
    pub enclosure_count: usize,
    /// Whether the build keeps one spare (plus-one) enclosure empty.
    pub plus_one: bool,
}

/// One row of the service-cost table.
///
/// Optional columns are constraints: a row only matches a query that supplies
/// a value satisfying them. Ceiling columns match values at or below the
/// ceiling.
#[derive(Debug, Clone)]
pub struct CostRow {
    pub action: String,
    pub month: usize,
    pub model: Option<String>,
    pub mark: Option<String>,
    pub operating_time_ceiling: Option<usize>,
    pub power_ceiling: Option<f64>,
    pub cost: f64,
}

/// A cost lookup. Built with [`CostQuery::new`] plus builder-style setters to
/// keep call sites readable.
#[derive(Debug, Clone, Default)]
pub struct CostQuery<'a> {
    pub model: Option<&'a str>,
    pub mark: Option<&'a str>,
    pub operating_time: Option<usize>,
    pub power: Option<f64>,
}

impl<'a> CostQuery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: &'a str) -> Self {
        self.model = Some(model);
        self
    }

    pub fn mark(mut self, mark: &'a str) -> Self {
        self.mark = Some(mark);
        self
    }

    pub fn operating_time(mut self, months: usize) -> Self {
        self.operating_time = Some(months);
        self
    }

    pub fn power(mut self, power: f64) -> Self {
        self.power = Some(power);
        self
    }
}

/// The fleet-wide read-only repository of costs, curves, and compatibility.
#[derive(Debug, Clone)]
pub struct Catalog {
    modules: Vec<ModuleSpec>,
    curves: HashMap<(String, String), PowerCurveSet>,
    /// Server model -> compatible module models.
    compat: HashMap<String, BTreeSet<String>>,
    /// Server class -> size-ordered server specs.
    servers: HashMap<String, Vec<ServerSpec>>,
    costs: Vec<CostRow>,
    thresholds: Thresholds,
}

impl Catalog {
    pub fn new(
        modules: Vec<ModuleSpec>,
        curves: HashMap<(String, String), PowerCurveSet>,
        compat: HashMap<String, BTreeSet<String>>,
        servers: HashMap<String, Vec<ServerSpec>>,
        costs: Vec<CostRow>,
        thresholds: Thresholds,
    ) -> Self {
        let mut servers = servers;
        for specs in servers.values_mut() {
            specs.sort_by(|a, b| a.nameplate.total_cmp(&b.nameplate));
        }
        Self {
            modules,
            curves,
            compat,
            servers,
            costs,
            thresholds,
        }
    }

    /// Checks referential integrity before a run starts.
    ///
    /// Every module model must have a curve table, every compatibility entry
    /// must reference known models, and at least one server class must exist.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.modules.is_empty() {
            return Err(SimError::config("catalog.modules", "must not be empty"));
        }
        if self.servers.is_empty() {
            return Err(SimError::config("catalog.servers", "must not be empty"));
        }
        for spec in &self.modules {
            let key = (spec.model.clone(), spec.mark.clone());
            if !self.curves.contains_key(&key) {
                return Err(SimError::config(
                    "catalog.curves",
                    format!("no curve table for ({}, {})", spec.model, spec.mark),
                ));
            }
            if spec.rating <= 0.0 {
                return Err(SimError::config(
                    "catalog.modules",
                    format!("model {} has non-positive rating", spec.model),
                ));
            }
        }
        for (server_model, module_models) in &self.compat {
            for m in module_models {
                if !self.modules.iter().any(|spec| spec.model == *m) {
                    return Err(SimError::config(
                        "catalog.compatibility",
                        format!("server {server_model} references unknown module model {m}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves a service cost by the most-specific-row rule.
    ///
    /// Rows are filtered to those dated at or before `as_of` whose optional
    /// constraints all hold against the query; the winner is found by
    /// iteratively maximizing date, then model/mark specificity, then
    /// operating-time ceiling, then power ceiling. With no matching row the
    /// cost is 0.
    pub fn cost(&self, action: &str, as_of: usize, query: &CostQuery<'_>) -> f64 {
        let mut candidates: Vec<&CostRow> = self
            .costs
            .iter()
            .filter(|row| {
                row.action == action
                    && row.month <= as_of
                    && constraint_eq(row.model.as_deref(), query.model)
                    && constraint_eq(row.mark.as_deref(), query.mark)
                    && ceiling_holds(row.operating_time_ceiling, query.operating_time)
                    && ceiling_holds_f64(row.power_ceiling, query.power)
            })
            .collect();

        if candidates.is_empty() {
            return 0.0;
        }

        let best_month = candidates.iter().map(|r| r.month).max().unwrap_or(0);
        candidates.retain(|r| r.month == best_month);

        // A row constrained to the queried model or mark beats a generic one.
        if candidates.iter().any(|r| r.model.is_some()) {
            candidates.retain(|r| r.model.is_some());
        }
        if candidates.iter().any(|r| r.mark.is_some()) {
            candidates.retain(|r| r.mark.is_some());
        }

        let best_ot = candidates
            .iter()
            .map(|r| r.operating_time_ceiling)
            .max()
            .unwrap_or(None);
        candidates.retain(|r| r.operating_time_ceiling == best_ot);

        candidates
            .iter()
            .max_by(|a, b| {
                let pa = a.power_ceiling.unwrap_or(f64::NEG_INFINITY);
                let pb = b.power_ceiling.unwrap_or(f64::NEG_INFINITY);
                pa.total_cmp(&pb)
            })
            .map(|r| r.cost)
            .unwrap_or(0.0)
    }

    /// Curve table for one (model, mark).
    pub fn power_curves(&self, model: &str, mark: &str) -> Option<&PowerCurveSet> {
        self.curves.get(&(model.to_string(), mark.to_string()))
    }

    /// Efficiency series for one (model, mark).
    pub fn efficiency_curve(&self, model: &str, mark: &str) -> Option<&[f64]> {
        self.power_curves(model, mark).map(PowerCurveSet::efficiency)
    }

    /// Module models compatible with a server model.
    pub fn compatible_modules(&self, server_model: &str) -> BTreeSet<String> {
        self.compat.get(server_model).cloned().unwrap_or_default()
    }

    /// Module specs buildable as of a date, optionally restricted to a server
    /// model's compatibility set and to an allowed set.
    pub fn buildable_modules(
        &self,
        as_of: usize,
        server_model: Option<&str>,
        allowed: Option<&BTreeSet<String>>,
    ) -> Vec<&ModuleSpec> {
        let compat = server_model.map(|s| self.compatible_modules(s));
        self.modules
            .iter()
            .filter(|spec| {
                spec.intro_month <= as_of
                    && spec.retire_month.is_none_or(|r| as_of < r)
                    && compat.as_ref().is_none_or(|set| set.contains(&spec.model))
                    && allowed.is_none_or(|set| set.contains(&spec.model))
            })
            .collect()
    }

    /// Resolves a server model for a class, preferring the smallest nameplate
    /// at or above `target_size` (the largest available as a fallback).
    pub fn server_model(&self, class: &str, target_size: Option<f64>) -> Option<ServerSpec> {
        let specs = self.servers.get(class)?;
        match target_size {
            None => specs.first().cloned(),
            Some(size) => specs
                .iter()
                .find(|s| s.nameplate >= size)
                .or_else(|| specs.last())
                .cloned(),
        }
    }

    /// Spec for a server model, searching every class.
    pub fn server_spec(&self, model: &str) -> Option<&ServerSpec> {
        self.servers
            .values()
            .flatten()
            .find(|s| s.model == model)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Spec for a module model, if known.
    pub fn module_spec(&self, model: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.model == model)
    }
}

fn constraint_eq(row: Option<&str>, query: Option<&str>) -> bool {
    match row {
        None => true,
        Some(r) => query == Some(r),
    }
}

fn ceiling_holds(row: Option<usize>, query: Option<usize>) -> bool {
    match row {
        None => true,
        Some(ceiling) => query.is_some_and(|q| q <= ceiling),
    }
}

fn ceiling_holds_f64(row: Option<f64>, query: Option<f64>) -> bool {
    match row {
        None => true,
        Some(ceiling) => query.is_some_and(|q| q <= ceiling),
    }
}

/// Generates a percentile curve table parametrically.
///
/// Percentiles are band midpoints `(i + 0.5) / n`, which carry equal
/// probability mass. A curve starts at `rating` scaled by its percentile's
/// spread factor and declines linearly, worse percentiles declining faster.
pub fn generate_curve_set(
    rating: f64,
    life_months: usize,
    percentile_count: usize,
    degradation_rate: f64,
    spread: f64,
    peak_efficiency: f64,
    efficiency_fade: f64,
) -> PowerCurveSet {
    assert!(life_months > 0);
    assert!(percentile_count > 0);
    let n = percentile_count;
    let percentiles: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect();
    let curves: Vec<Vec<f64>> = percentiles
        .iter()
        .map(|p| {
            let start = rating * (1.0 - spread * (1.0 - p));
            let rate = degradation_rate * (2.0 - p);
            (0..life_months)
                .map(|t| (start - rate * t as f64).max(0.0))
                .collect()
        })
        .collect();
    let efficiency: Vec<f64> = (0..life_months)
        .map(|t| (peak_efficiency * (1.0 - efficiency_fade * t as f64)).max(0.0))
        .collect();
    PowerCurveSet::new(percentiles, curves, efficiency)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost_row(
        action: &str,
        month: usize,
        model: Option<&str>,
        operating_time_ceiling: Option<usize>,
        power_ceiling: Option<f64>,
        cost: f64,
    ) -> CostRow {
        CostRow {
            action: action.to_string(),
            month,
            model: model.map(str::to_string),
            mark: None,
            operating_time_ceiling,
            power_ceiling,
            cost,
        }
    }

    fn test_catalog(costs: Vec<CostRow>) -> Catalog {
        let spec = ModuleSpec {
            model: "M10".to_string(),
            base_family: "M".to_string(),
            mark: "A".to_string(),
            rating: 100.0,
            peak_efficiency: 0.5,
            intro_month: 0,
            retire_month: None,
        };
        let mut curves = HashMap::new();
        curves.insert(
            ("M10".to_string(), "A".to_string()),
            generate_curve_set(100.0, 60, 5, 0.004, 0.1, 0.5, 0.001),
        );
        let mut compat = HashMap::new();
        compat.insert(
            "S400".to_string(),
            BTreeSet::from(["M10".to_string()]),
        );
        let mut servers = HashMap::new();
        servers.insert(
            "S".to_string(),
            vec![
                ServerSpec {
                    model: "S400".to_string(),
                    nameplate: 400.0,
                    enclosure_count: 4,
                    plus_one: false,
                },
                ServerSpec {
                    model: "S800".to_string(),
                    nameplate: 800.0,
                    enclosure_count: 8,
                    plus_one: true,
                },
            ],
        );
        Catalog::new(
            vec![spec],
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
        )
    }

    #[test]
    fn cost_prefers_most_recent_row() {
        let cat = test_catalog(vec![
            cost_row("deploy", 0, None, None, None, 10.0),
            cost_row("deploy", 12, None, None, None, 14.0),
        ]);
        assert_eq!(cat.cost("deploy", 24, &CostQuery::new()), 14.0);
        assert_eq!(cat.cost("deploy", 6, &CostQuery::new()), 10.0);
    }

    #[test]
    fn cost_prefers_more_specific_ceiling_at_same_date() {
        let cat = test_catalog(vec![
            cost_row("deploy", 0, None, None, None, 10.0),
            cost_row("deploy", 0, None, Some(24), None, 7.0),
        ]);
        let q = CostQuery::new().operating_time(12);
        assert_eq!(cat.cost("deploy", 0, &q), 7.0);
        // Over the ceiling, only the generic row matches.
        let q = CostQuery::new().operating_time(36);
        assert_eq!(cat.cost("deploy", 0, &q), 10.0);
    }

    #[test]
    fn cost_without_match_is_zero() {
        let cat = test_catalog(vec![cost_row("deploy", 12, None, None, None, 10.0)]);
        assert_eq!(cat.cost("deploy", 3, &CostQuery::new()), 0.0);
        assert_eq!(cat.cost("junk", 24, &CostQuery::new()), 0.0);
    }

    #[test]
    fn model_constrained_row_needs_matching_query() {
        let cat = test_catalog(vec![
            cost_row("create", 0, Some("M10"), None, None, 100.0),
            cost_row("create", 0, None, None, None, 60.0),
        ]);
        let q = CostQuery::new().model("M10");
        assert_eq!(cat.cost("create", 0, &q), 100.0);
        // No model in the query: the constrained row cannot match, but the
        // generic one can. Tie-break resolves on power ceiling (both None),
        // leaving the generic row.
        assert_eq!(cat.cost("create", 0, &CostQuery::new()), 60.0);
    }

    #[test]
    fn model_constrained_row_beats_generic_at_same_date() {
        // The generic row carries a power ceiling; specificity on the model
        // still has to win before the ceiling tie-breaks are consulted.
        let cat = test_catalog(vec![
            cost_row("create", 0, None, None, Some(500.0), 60.0),
            cost_row("create", 0, Some("M10"), None, None, 100.0),
        ]);
        let q = CostQuery::new().model("M10").power(100.0);
        assert_eq!(cat.cost("create", 0, &q), 100.0);
    }

    #[test]
    fn buildable_respects_intro_retire_and_allowed() {
        let cat = test_catalog(Vec::new());
        assert_eq!(cat.buildable_modules(0, Some("S400"), None).len(), 1);
        let allowed = BTreeSet::from(["OTHER".to_string()]);
        assert!(cat.buildable_modules(0, Some("S400"), Some(&allowed)).is_empty());
        assert!(cat.buildable_modules(0, Some("UNKNOWN"), None).is_empty());
    }

    #[test]
    fn server_model_picks_smallest_fitting_size() {
        let cat = test_catalog(Vec::new());
        let spec = cat.server_model("S", Some(300.0));
        assert_eq!(spec.map(|s| s.model), Some("S400".to_string()));
        let spec = cat.server_model("S", Some(500.0));
        assert_eq!(spec.map(|s| s.model), Some("S800".to_string()));
        // Oversized target falls back to the largest available.
        let spec = cat.server_model("S", Some(2000.0));
        assert_eq!(spec.map(|s| s.model), Some("S800".to_string()));
    }

    #[test]
    fn generated_curves_are_ordered_and_positive_mass() {
        let set = generate_curve_set(100.0, 60, 5, 0.004, 0.1, 0.5, 0.001);
        assert_eq!(set.curve_len(), 60);
        for t in [0, 20, 59] {
            assert!(set.ideal()[t] > set.worst()[t]);
        }
    }

    #[test]
    fn validate_catches_missing_curves() {
        let mut cat = test_catalog(Vec::new());
        cat.curves.clear();
        assert!(cat.validate().is_err());
    }
}
