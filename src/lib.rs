//! Fleet maintenance-cost simulator for long-term service agreements.
//!
//! Simulates monthly degradation of replaceable power modules across a fleet
//! of contracted sites, plus the repair, replacement, and rebalancing
//! decisions needed to keep output and efficiency guarantees satisfied.

pub mod assets;
pub mod balance;
pub mod catalog;
pub mod config;
pub mod curve;
pub mod error;
pub mod fleet;
pub mod io;
pub mod ledger;
pub mod report;
pub mod runner;
pub mod shop;
pub mod site;
