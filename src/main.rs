//! Fleet simulator entry point: CLI wiring and scenario execution.

use std::path::Path;
use std::process;

use tracing_subscriber::EnvFilter;

use ltsa_sim::config::ScenarioConfig;
use ltsa_sim::io::export::{export_ledger_csv, export_performance_csv, export_trace_csv};
use ltsa_sim::report::RunSummary;
use ltsa_sim::runner::run_monte_carlo;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    runs_override: Option<usize>,
    performance_out: Option<String>,
    ledger_out: Option<String>,
    traces_out: Option<String>,
}

fn print_help() {
    eprintln!("ltsa-sim - Fleet maintenance cost simulator for long-term service agreements");
    eprintln!();
    eprintln!("Usage: ltsa-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>         Load scenario from TOML config file");
    eprintln!("  --preset <name>           Use a built-in preset (baseline, fleet_stress)");
    eprintln!("  --seed <u64>              Override random seed");
    eprintln!("  --runs <n>                Override Monte Carlo run count");
    eprintln!("  --performance-out <path>  Export the first run's performance table to CSV");
    eprintln!("  --ledger-out <path>       Export the first run's transaction ledger to CSV");
    eprintln!("  --traces-out <path>       Export the first run's module traces to CSV");
    eprintln!("  --help                    Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        runs_override: None,
        performance_out: None,
        ledger_out: None,
        traces_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --scenario requires a path argument");
                    process::exit(1);
                }
                cli.scenario_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --seed requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(s) = args[i].parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--runs" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --runs requires a count argument");
                    process::exit(1);
                }
                if let Ok(n) = args[i].parse::<usize>() {
                    cli.runs_override = Some(n);
                } else {
                    eprintln!("error: --runs value \"{}\" is not a valid count", args[i]);
                    process::exit(1);
                }
            }
            "--performance-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --performance-out requires a path argument");
                    process::exit(1);
                }
                cli.performance_out = Some(args[i].clone());
            }
            "--ledger-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --ledger-out requires a path argument");
                    process::exit(1);
                }
                cli.ledger_out = Some(args[i].clone());
            }
            "--traces-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --traces-out requires a path argument");
                    process::exit(1);
                }
                cli.traces_out = Some(args[i].clone());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    // Load config: --scenario takes priority, then --preset, then baseline default
    let mut scenario = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::baseline()
    };

    // Apply overrides
    if let Some(seed) = cli.seed_override {
        scenario.simulation.seed = seed;
    }
    if let Some(runs) = cli.runs_override {
        scenario.simulation.runs = runs;
    }

    // Validate
    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    // Run the batch
    let results = match run_monte_carlo(&scenario) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    // Print summary
    let summary = RunSummary::from_results(&results);
    println!("{summary}");

    // Export CSVs if requested; detailed tables come from the first run
    let first = results.first();
    if let Some(ref path) = cli.performance_out {
        let rows = first.map(|r| r.performance.as_slice()).unwrap_or_default();
        if let Err(e) = export_performance_csv(rows, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Performance table written to {path}");
    }
    if let Some(ref path) = cli.ledger_out {
        let entries = first.map(|r| r.ledger.as_slice()).unwrap_or_default();
        if let Err(e) = export_ledger_csv(entries, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Ledger written to {path}");
    }
    if let Some(ref path) = cli.traces_out {
        let empty = std::collections::HashMap::new();
        let traces = first.map(|r| &r.module_traces).unwrap_or(&empty);
        if let Err(e) = export_trace_csv(traces, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Module traces written to {path}");
    }
}
