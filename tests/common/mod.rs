//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use ltsa_sim::assets::Module;
use ltsa_sim::config::ScenarioConfig;
use ltsa_sim::shop::Shop;
use ltsa_sim::site::{Contract, Site};

/// Small baseline variant: 30-month horizon, 24-month contract, two peers.
pub fn small_scenario() -> ScenarioConfig {
    let mut cfg = ScenarioConfig::baseline();
    cfg.simulation.months = 30;
    cfg.simulation.runs = 2;
    cfg.contract.length_months = 24;
    cfg.peers.count = 2;
    cfg.peers.install_months = vec![0, 3];
    cfg
}

/// A shop over the scenario's catalog with the given seed.
pub fn shop_from(cfg: &ScenarioConfig, seed: u64) -> Shop {
    Shop::new(Arc::new(cfg.build_catalog()), cfg.shop_settings(), seed)
}

/// An empty target site with the scenario's contract terms.
pub fn site_from(cfg: &ScenarioConfig) -> Site {
    Site::new(0, cfg.target_contract())
}

/// A module whose assigned and ideal curves both hold `output` for ten years.
pub fn flat_module(serial: u64, output: f64) -> Module {
    Module::new(
        serial,
        "M100",
        "M",
        "A",
        0,
        output.max(1.0),
        0.55,
        vec![output; 120],
        vec![output; 120],
        vec![0.55; 120],
    )
}

/// A module producing `output` while trailing an ideal of `ideal`, so the
/// repair pass flags it when the gap exceeds the deviation threshold.
pub fn lagging_module(serial: u64, output: f64, ideal: f64) -> Module {
    Module::new(
        serial,
        "M100",
        "M",
        "A",
        0,
        ideal.max(1.0),
        0.55,
        vec![output; 120],
        vec![ideal; 120],
        vec![0.55; 120],
    )
}

/// Contract terms shared by the policy tests: one-year window, 95% output
/// guarantee, repairs on.
pub fn policy_contract() -> Contract {
    Contract {
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
        server_count: 1,
        target_size: 400.0,
        allowed_modules: None,
        repairs_enabled: true,
        layout: None,
    }
}
