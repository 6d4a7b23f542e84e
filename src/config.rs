//! TOML-based scenario configuration and preset definitions.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::{Catalog, CostRow, ModuleSpec, ServerSpec, Thresholds, generate_curve_set};
use crate::fleet::FleetSettings;
use crate::shop::ShopSettings;
use crate::site::{Contract, ExistingModule, ExistingServer};

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline scenario. Load from TOML
/// with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation horizon and Monte Carlo parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Target-site contract terms.
    #[serde(default)]
    pub contract: ContractConfig,
    /// Peer-site population the shop inventory is shared with.
    #[serde(default)]
    pub peers: PeerConfig,
    /// Shop inventory parameters.
    #[serde(default)]
    pub shop: ShopConfig,
    /// Decision thresholds.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    /// Buildable module models.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// Server models, grouped into classes at build time.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Service-cost table rows.
    #[serde(default)]
    pub costs: Vec<CostConfig>,
}

/// Simulation horizon and Monte Carlo parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulation horizon in months (must be > 0).
    pub months: usize,
    /// Master random seed.
    pub seed: u64,
    /// Number of Monte Carlo runs (must be > 0).
    pub runs: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            months: 132,
            seed: 42,
            runs: 1,
        }
    }
}

/// Target-site contract terms.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractConfig {
    /// Contract length in months (must be > 0).
    pub length_months: usize,
    /// Trailing window for the windowed metrics, in months (must be > 0).
    pub window_months: usize,
    /// Output guarantee as a fraction of system size; absent means no
    /// output guarantee.
    pub output_limit: Option<f64>,
    /// Efficiency guarantee; absent means no efficiency guarantee.
    pub efficiency_limit: Option<f64>,
    /// Fleet month the site is installed.
    pub start_month: usize,
    /// Months already operated before the simulation starts.
    pub months_prior: usize,
    /// Cumulative TMO carried in from before the simulation.
    pub starting_ctmo: f64,
    /// Cumulative efficiency carried in from before the simulation.
    pub starting_ceff: f64,
    /// Inclusive contract-year ranges with the decision policy suspended.
    pub blackout_years: Vec<[usize; 2]>,
    /// Server class the site is built from.
    pub server_class: String,
    /// Number of servers (must be > 0).
    pub server_count: usize,
    /// Total contracted size (must be > 0).
    pub target_size: f64,
    /// Module models this contract may use; absent means any compatible.
    pub allowed_modules: Option<Vec<String>>,
    /// Whether deviated modules are pulled for repair.
    pub repairs_enabled: bool,
    /// Pre-existing server/module layout to bootstrap the site from, instead
    /// of building from empty.
    pub layout: Option<Vec<LayoutServerConfig>>,
}

/// One server of a pre-existing layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutServerConfig {
    /// Server model; must exist in `servers`.
    pub model: String,
    #[serde(default)]
    pub modules: Vec<LayoutModuleConfig>,
}

/// One pre-existing module at its last observed operating point.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutModuleConfig {
    /// Enclosure index within the server.
    pub slot: usize,
    /// Module model; must exist in `modules`.
    pub model: String,
    /// Age in months at simulation start.
    pub age_months: usize,
    /// Last measured output (must be >= 0).
    pub observed_output: f64,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            length_months: 120,
            window_months: 12,
            output_limit: Some(0.95),
            efficiency_limit: None,
            start_month: 0,
            months_prior: 0,
            starting_ctmo: 0.0,
            starting_ceff: 0.0,
            blackout_years: Vec::new(),
            server_class: "std".to_string(),
            server_count: 2,
            target_size: 400.0,
            allowed_modules: None,
            repairs_enabled: true,
            layout: None,
        }
    }
}

/// Peer-site population parameters. Peers reuse the target contract terms
/// with sampled sizes and install months.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerConfig {
    /// Number of peer sites.
    pub count: usize,
    /// Historical sizes to sample from (must be non-empty when count > 0).
    pub sizes: Vec<f64>,
    /// Historical install months to sample from (must be non-empty when
    /// count > 0).
    pub install_months: Vec<usize>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            sizes: vec![200.0, 400.0, 400.0, 600.0],
            install_months: vec![0, 3, 6, 12],
        }
    }
}

/// Shop inventory parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShopConfig {
    /// Months a returned module spends off-grid before redeployment
    /// (must be > 0).
    pub deploy_lag: usize,
    /// Output below which a returning module is junked.
    pub junk_threshold: f64,
    /// Always manufacture the most capable model instead of best-fit.
    pub best_available: bool,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            deploy_lag: 3,
            junk_threshold: 20.0,
            best_available: false,
        }
    }
}

/// Decision thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdsConfig {
    /// Output drop below rating that marks a module degraded.
    pub degraded: f64,
    /// Efficiency drop below peak that marks a module inefficient.
    pub inefficient: f64,
    /// Fractional shortfall vs ideal that flags a module for repair.
    pub deviated: f64,
    /// Years-remaining threshold that arms the early-deploy check.
    pub early_deploy_years: f64,
    /// Safety pad on the output limit in the end-of-contract projection.
    pub ctmo_pad: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        let t = Thresholds::default();
        Self {
            degraded: t.degraded,
            inefficient: t.inefficient,
            deviated: t.deviated,
            early_deploy_years: t.early_deploy_years,
            ctmo_pad: t.ctmo_pad,
        }
    }
}

/// One buildable module model with its curve-generation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub model: String,
    pub base_family: String,
    #[serde(default = "default_mark")]
    pub mark: String,
    /// Rated output (must be > 0).
    pub rating: f64,
    /// Peak efficiency (must be in (0, 1]).
    pub peak_efficiency: f64,
    /// First month the model can be manufactured.
    #[serde(default)]
    pub intro_month: usize,
    /// Month the model leaves production, if it ever does.
    #[serde(default)]
    pub retire_month: Option<usize>,
    /// Curve length in months (must be > 0).
    pub life_months: usize,
    /// Number of percentile curves (must be > 0).
    #[serde(default = "default_percentile_count")]
    pub percentile_count: usize,
    /// Median monthly output decline, in output units.
    pub degradation_rate: f64,
    /// Fractional spread of the starting output across percentiles.
    #[serde(default = "default_spread")]
    pub spread: f64,
    /// Monthly efficiency decline.
    #[serde(default)]
    pub efficiency_fade: f64,
}

fn default_mark() -> String {
    "A".to_string()
}

fn default_percentile_count() -> usize {
    9
}

fn default_spread() -> f64 {
    0.1
}

/// One server model. Servers with the same class form a size-ordered table
/// the catalog resolves site builds against.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub model: String,
    pub class: String,
    /// Nameplate rating (must be > 0).
    pub nameplate: f64,
    /// Enclosure count (must be > 0).
    pub enclosure_count: usize,
    /// Whether the build keeps one spare enclosure empty.
    #[serde(default)]
    pub plus_one: bool,
    /// Compatible module models.
    pub compatible: Vec<String>,
}

/// One service-cost table row.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Action the row prices: `create`, `deploy`, `store`, `repair`,
    /// `junk`, or `move`.
    pub action: String,
    /// First month the row applies.
    #[serde(default)]
    pub month: usize,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mark: Option<String>,
    /// Matches operating times at or below this ceiling.
    #[serde(default)]
    pub operating_time_ceiling: Option<usize>,
    /// Matches powers at or below this ceiling.
    #[serde(default)]
    pub power_ceiling: Option<f64>,
    pub cost: f64,
}

const COST_ACTIONS: &[&str] = &["create", "deploy", "store", "repair", "junk", "move"];

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"contract.length_months"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl ScenarioConfig {
    /// Returns the baseline scenario: a two-server 400-unit site with a
    /// 95% output guarantee over a ten-year contract.
    pub fn baseline() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            contract: ContractConfig::default(),
            peers: PeerConfig::default(),
            shop: ShopConfig::default(),
            thresholds: ThresholdsConfig::default(),
            modules: vec![
                ModuleConfig {
                    model: "M100".to_string(),
                    base_family: "M".to_string(),
                    mark: "A".to_string(),
                    rating: 100.0,
                    peak_efficiency: 0.55,
                    intro_month: 0,
                    retire_month: None,
                    life_months: 120,
                    percentile_count: 9,
                    degradation_rate: 0.35,
                    spread: 0.08,
                    efficiency_fade: 0.0008,
                },
                ModuleConfig {
                    model: "M150".to_string(),
                    base_family: "M".to_string(),
                    mark: "A".to_string(),
                    rating: 150.0,
                    peak_efficiency: 0.57,
                    intro_month: 0,
                    retire_month: None,
                    life_months: 120,
                    percentile_count: 9,
                    degradation_rate: 0.5,
                    spread: 0.08,
                    efficiency_fade: 0.0008,
                },
            ],
            servers: vec![
                ServerConfig {
                    model: "S200".to_string(),
                    class: "std".to_string(),
                    nameplate: 200.0,
                    enclosure_count: 3,
                    plus_one: true,
                    compatible: vec!["M100".to_string(), "M150".to_string()],
                },
                ServerConfig {
                    model: "S400".to_string(),
                    class: "std".to_string(),
                    nameplate: 400.0,
                    enclosure_count: 5,
                    plus_one: true,
                    compatible: vec!["M100".to_string(), "M150".to_string()],
                },
            ],
            costs: vec![
                CostConfig {
                    action: "create".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 1000.0,
                },
                CostConfig {
                    action: "deploy".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 250.0,
                },
                CostConfig {
                    action: "store".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 120.0,
                },
                CostConfig {
                    action: "repair".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 400.0,
                },
                CostConfig {
                    action: "junk".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 50.0,
                },
                CostConfig {
                    action: "move".to_string(),
                    month: 0,
                    model: None,
                    mark: None,
                    operating_time_ceiling: None,
                    power_ceiling: None,
                    cost: 80.0,
                },
            ],
        }
    }

    /// Returns the fleet-stress preset: faster degradation, a busier peer
    /// population, and a tighter windowed guarantee.
    pub fn fleet_stress() -> Self {
        let mut cfg = Self::baseline();
        cfg.contract.window_months = 6;
        cfg.contract.output_limit = Some(0.97);
        cfg.peers = PeerConfig {
            count: 8,
            sizes: vec![200.0, 400.0, 400.0, 600.0, 800.0],
            install_months: vec![0, 2, 4, 6, 9, 12, 18],
        };
        cfg.shop.deploy_lag = 2;
        for module in &mut cfg.modules {
            module.degradation_rate *= 1.6;
            module.spread = 0.12;
        }
        cfg
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "fleet_stress"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "fleet_stress" => Ok(Self::fleet_stress()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is
    /// invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown
    /// fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.months == 0 {
            errors.push(ConfigError {
                field: "simulation.months".into(),
                message: "must be > 0".into(),
            });
        }
        if s.runs == 0 {
            errors.push(ConfigError {
                field: "simulation.runs".into(),
                message: "must be > 0".into(),
            });
        }

        let c = &self.contract;
        if c.length_months == 0 {
            errors.push(ConfigError {
                field: "contract.length_months".into(),
                message: "must be > 0".into(),
            });
        }
        if c.window_months == 0 {
            errors.push(ConfigError {
                field: "contract.window_months".into(),
                message: "must be > 0".into(),
            });
        }
        if c.server_count == 0 {
            errors.push(ConfigError {
                field: "contract.server_count".into(),
                message: "must be > 0".into(),
            });
        }
        if c.target_size <= 0.0 {
            errors.push(ConfigError {
                field: "contract.target_size".into(),
                message: "must be > 0".into(),
            });
        }
        if c.output_limit.is_some_and(|l| !(0.0..=1.0).contains(&l)) {
            errors.push(ConfigError {
                field: "contract.output_limit".into(),
                message: "must be in [0.0, 1.0]".into(),
            });
        }
        if !self.servers.iter().any(|srv| srv.class == c.server_class) {
            errors.push(ConfigError {
                field: "contract.server_class".into(),
                message: format!("no server model has class \"{}\"", c.server_class),
            });
        }
        for range in &c.blackout_years {
            if range[0] > range[1] {
                errors.push(ConfigError {
                    field: "contract.blackout_years".into(),
                    message: format!("range [{}, {}] is reversed", range[0], range[1]),
                });
            }
        }
        if let Some(allowed) = &c.allowed_modules {
            for name in allowed {
                if !self.modules.iter().any(|m| &m.model == name) {
                    errors.push(ConfigError {
                        field: "contract.allowed_modules".into(),
                        message: format!("unknown module model \"{name}\""),
                    });
                }
            }
        }

        if let Some(layout) = &c.layout {
            for (si, server) in layout.iter().enumerate() {
                let spec = self.servers.iter().find(|srv| srv.model == server.model);
                if spec.is_none() {
                    errors.push(ConfigError {
                        field: format!("contract.layout[{si}].model"),
                        message: format!("unknown server model \"{}\"", server.model),
                    });
                }
                for (mi, module) in server.modules.iter().enumerate() {
                    if !self.modules.iter().any(|m| m.model == module.model) {
                        errors.push(ConfigError {
                            field: format!("contract.layout[{si}].modules[{mi}].model"),
                            message: format!("unknown module model \"{}\"", module.model),
                        });
                    }
                    if spec.is_some_and(|s| module.slot >= s.enclosure_count) {
                        errors.push(ConfigError {
                            field: format!("contract.layout[{si}].modules[{mi}].slot"),
                            message: format!(
                                "slot {} out of range for \"{}\"",
                                module.slot, server.model
                            ),
                        });
                    }
                    if module.observed_output < 0.0 {
                        errors.push(ConfigError {
                            field: format!(
                                "contract.layout[{si}].modules[{mi}].observed_output"
                            ),
                            message: "must be >= 0".into(),
                        });
                    }
                }
            }
        }

        let p = &self.peers;
        if p.count > 0 && p.sizes.is_empty() {
            errors.push(ConfigError {
                field: "peers.sizes".into(),
                message: "must be non-empty when peers.count > 0".into(),
            });
        }
        if p.count > 0 && p.install_months.is_empty() {
            errors.push(ConfigError {
                field: "peers.install_months".into(),
                message: "must be non-empty when peers.count > 0".into(),
            });
        }

        if self.shop.deploy_lag == 0 {
            errors.push(ConfigError {
                field: "shop.deploy_lag".into(),
                message: "must be > 0".into(),
            });
        }

        if self.modules.is_empty() {
            errors.push(ConfigError {
                field: "modules".into(),
                message: "at least one module model is required".into(),
            });
        }
        for (i, m) in self.modules.iter().enumerate() {
            if m.rating <= 0.0 {
                errors.push(ConfigError {
                    field: format!("modules[{i}].rating"),
                    message: "must be > 0".into(),
                });
            }
            if !(0.0..=1.0).contains(&m.peak_efficiency) || m.peak_efficiency == 0.0 {
                errors.push(ConfigError {
                    field: format!("modules[{i}].peak_efficiency"),
                    message: "must be in (0.0, 1.0]".into(),
                });
            }
            if m.life_months == 0 {
                errors.push(ConfigError {
                    field: format!("modules[{i}].life_months"),
                    message: "must be > 0".into(),
                });
            }
            if m.percentile_count == 0 {
                errors.push(ConfigError {
                    field: format!("modules[{i}].percentile_count"),
                    message: "must be > 0".into(),
                });
            }
            if m.retire_month.is_some_and(|r| r <= m.intro_month) {
                errors.push(ConfigError {
                    field: format!("modules[{i}].retire_month"),
                    message: "must be > intro_month".into(),
                });
            }
        }

        if self.servers.is_empty() {
            errors.push(ConfigError {
                field: "servers".into(),
                message: "at least one server model is required".into(),
            });
        }
        for (i, srv) in self.servers.iter().enumerate() {
            if srv.nameplate <= 0.0 {
                errors.push(ConfigError {
                    field: format!("servers[{i}].nameplate"),
                    message: "must be > 0".into(),
                });
            }
            if srv.enclosure_count == 0 {
                errors.push(ConfigError {
                    field: format!("servers[{i}].enclosure_count"),
                    message: "must be > 0".into(),
                });
            }
            for name in &srv.compatible {
                if !self.modules.iter().any(|m| &m.model == name) {
                    errors.push(ConfigError {
                        field: format!("servers[{i}].compatible"),
                        message: format!("unknown module model \"{name}\""),
                    });
                }
            }
        }

        for (i, row) in self.costs.iter().enumerate() {
            if !COST_ACTIONS.contains(&row.action.as_str()) {
                errors.push(ConfigError {
                    field: format!("costs[{i}].action"),
                    message: format!(
                        "must be one of {}, got \"{}\"",
                        COST_ACTIONS.join(", "),
                        row.action
                    ),
                });
            }
            if row.cost < 0.0 {
                errors.push(ConfigError {
                    field: format!("costs[{i}].cost"),
                    message: "must be >= 0".into(),
                });
            }
        }

        errors
    }

    /// Builds the immutable catalog: curve tables generated per module
    /// model, server classes grouped and size-ordered.
    pub fn build_catalog(&self) -> Catalog {
        let mut modules = Vec::with_capacity(self.modules.len());
        let mut curves = HashMap::new();
        for m in &self.modules {
            modules.push(ModuleSpec {
                model: m.model.clone(),
                base_family: m.base_family.clone(),
                mark: m.mark.clone(),
                rating: m.rating,
                peak_efficiency: m.peak_efficiency,
                intro_month: m.intro_month,
                retire_month: m.retire_month,
            });
            curves.insert(
                (m.model.clone(), m.mark.clone()),
                generate_curve_set(
                    m.rating,
                    m.life_months,
                    m.percentile_count,
                    m.degradation_rate,
                    m.spread,
                    m.peak_efficiency,
                    m.efficiency_fade,
                ),
            );
        }

        let mut compat: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut servers: HashMap<String, Vec<ServerSpec>> = HashMap::new();
        for srv in &self.servers {
            compat.insert(srv.model.clone(), srv.compatible.iter().cloned().collect());
            servers.entry(srv.class.clone()).or_default().push(ServerSpec {
                model: srv.model.clone(),
                nameplate: srv.nameplate,
                enclosure_count: srv.enclosure_count,
                plus_one: srv.plus_one,
            });
        }

        let costs = self
            .costs
            .iter()
            .map(|row| CostRow {
                action: row.action.clone(),
                month: row.month,
                model: row.model.clone(),
                mark: row.mark.clone(),
                operating_time_ceiling: row.operating_time_ceiling,
                power_ceiling: row.power_ceiling,
                cost: row.cost,
            })
            .collect();

        Catalog::new(
            modules,
            curves,
            compat,
            servers,
            costs,
            Thresholds {
                degraded: self.thresholds.degraded,
                inefficient: self.thresholds.inefficient,
                deviated: self.thresholds.deviated,
                early_deploy_years: self.thresholds.early_deploy_years,
                ctmo_pad: self.thresholds.ctmo_pad,
            },
        )
    }

    /// The target site's resolved contract.
    pub fn target_contract(&self) -> Contract {
        let c = &self.contract;
        Contract {
            length_months: c.length_months,
            window_months: c.window_months,
            output_limit: c.output_limit,
            efficiency_limit: c.efficiency_limit,
            start_month: c.start_month,
            months_prior: c.months_prior,
            starting_ctmo: c.starting_ctmo,
            starting_ceff: c.starting_ceff,
            blackout_years: c.blackout_years.iter().map(|r| (r[0], r[1])).collect(),
            server_class: c.server_class.clone(),
            server_count: c.server_count,
            target_size: c.target_size,
            allowed_modules: c
                .allowed_modules
                .as_ref()
                .map(|v| v.iter().cloned().collect()),
            repairs_enabled: c.repairs_enabled,
            layout: c.layout.as_ref().map(|layout| {
                layout
                    .iter()
                    .map(|server| ExistingServer {
                        model: server.model.clone(),
                        modules: server
                            .modules
                            .iter()
                            .map(|m| ExistingModule {
                                slot: m.slot,
                                model: m.model.clone(),
                                age_months: m.age_months,
                                observed_output: m.observed_output,
                            })
                            .collect(),
                    })
                    .collect()
            }),
        }
    }

    /// The contract template peers are stamped from; size and install month
    /// are overwritten by the fleet's sampling. A bootstrap layout applies to
    /// the target site only.
    pub fn peer_contract(&self) -> Contract {
        let mut contract = self.target_contract();
        contract.layout = None;
        contract
    }

    pub fn shop_settings(&self) -> ShopSettings {
        ShopSettings {
            deploy_lag: self.shop.deploy_lag,
            junk_threshold: self.shop.junk_threshold,
            best_available: self.shop.best_available,
        }
    }

    pub fn fleet_settings(&self) -> FleetSettings {
        FleetSettings {
            months: self.simulation.months,
            peer_count: self.peers.count,
            peer_sizes: self.peers.sizes.clone(),
            peer_install_months: self.peers.install_months.clone(),
        }
    }
}

/// Small baseline-derived catalog for unit tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn tests_catalog() -> Catalog {
    ScenarioConfig::baseline().build_catalog()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[simulation]
months = 60
seed = 99
runs = 4

[contract]
length_months = 48
window_months = 6
output_limit = 0.9
start_month = 0
months_prior = 0
starting_ctmo = 0.0
starting_ceff = 0.0
blackout_years = [[0, 0]]
server_class = "std"
server_count = 1
target_size = 200.0
repairs_enabled = false

[peers]
count = 2
sizes = [200.0, 400.0]
install_months = [0, 6]

[shop]
deploy_lag = 2
junk_threshold = 15.0
best_available = true

[[modules]]
model = "M100"
base_family = "M"
rating = 100.0
peak_efficiency = 0.55
life_months = 96
degradation_rate = 0.4

[[servers]]
model = "S200"
class = "std"
nameplate = 200.0
enclosure_count = 3
plus_one = true
compatible = ["M100"]

[[costs]]
action = "create"
cost = 900.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.simulation.months), Some(60));
        assert_eq!(cfg.as_ref().map(|c| c.simulation.runs), Some(4));
        assert_eq!(cfg.as_ref().map(|c| c.shop.deploy_lag), Some(2));
        assert_eq!(cfg.as_ref().map(|c| c.modules.len()), Some(1));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
months = 24
bogus_field = true
"#;
        let result = ScenarioConfig::from_toml_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.simulation.seed), Some(99));
        assert_eq!(cfg.as_ref().map(|c| c.simulation.months), Some(132));
        assert_eq!(cfg.as_ref().map(|c| c.contract.length_months), Some(120));
    }

    #[test]
    fn validation_catches_zero_months() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.months = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.months"));
    }

    #[test]
    fn validation_catches_unknown_server_class() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.contract.server_class = "nope".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "contract.server_class"));
    }

    #[test]
    fn validation_catches_reversed_blackout_range() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.contract.blackout_years = vec![[3, 1]];
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "contract.blackout_years"));
    }

    #[test]
    fn validation_catches_unknown_compatible_module() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.servers[0].compatible.push("M999".to_string());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "servers[0].compatible"));
    }

    #[test]
    fn validation_catches_bad_cost_action() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.costs[0].action = "paint".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "costs[0].action"));
    }

    #[test]
    fn validation_catches_layout_slot_out_of_range() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.contract.layout = Some(vec![LayoutServerConfig {
            model: "S200".to_string(),
            modules: vec![LayoutModuleConfig {
                slot: 9,
                model: "M100".to_string(),
                age_months: 6,
                observed_output: 90.0,
            }],
        }]);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "contract.layout[0].modules[0].slot"));
    }

    #[test]
    fn peer_contract_drops_the_bootstrap_layout() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.contract.layout = Some(vec![LayoutServerConfig {
            model: "S200".to_string(),
            modules: Vec::new(),
        }]);
        assert!(cfg.target_contract().layout.is_some());
        assert!(cfg.peer_contract().layout.is_none());
    }

    #[test]
    fn validation_catches_empty_peer_population() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.peers.sizes.clear();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "peers.sizes"));
    }

    #[test]
    fn fleet_stress_is_harder_than_baseline() {
        let base = ScenarioConfig::baseline();
        let stress = ScenarioConfig::fleet_stress();
        assert!(stress.peers.count > base.peers.count);
        assert!(stress.modules[0].degradation_rate > base.modules[0].degradation_rate);
    }

    #[test]
    fn built_catalog_passes_validation() {
        let catalog = ScenarioConfig::baseline().build_catalog();
        assert!(catalog.validate().is_ok());
    }
}
