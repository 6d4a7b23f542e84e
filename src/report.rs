//! Post-hoc run summary computed from Monte Carlo results.

use std::fmt;

use crate::fleet::RunResult;
use crate::ledger::Action;

/// Aggregate indicators averaged across a batch of Monte Carlo runs.
///
/// Computed post-hoc from the collected [`RunResult`]s so the summary always
/// agrees with the exported tables.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Number of runs aggregated.
    pub runs: usize,
    /// Mean total transaction cost per run.
    pub mean_total_cost: f64,
    /// Mean residual value returned by the target site.
    pub mean_residual_value: f64,
    /// Mean salvage value at simulation end.
    pub mean_salvage_value: f64,
    /// Mean count of modules manufactured per run.
    pub mean_modules_created: f64,
    /// Mean count of repair ledger entries per run.
    pub mean_repairs: f64,
    /// Target site's final cumulative TMO, averaged across runs.
    pub mean_final_ctmo: f64,
    /// Target site's final cumulative efficiency, averaged across runs.
    pub mean_final_ceff: f64,
    /// Mean number of target-site months with a failing output metric.
    pub mean_failing_months: f64,
}

impl RunSummary {
    /// Computes the summary from a complete batch of run results.
    pub fn from_results(results: &[RunResult]) -> Self {
        if results.is_empty() {
            return Self {
                runs: 0,
                mean_total_cost: 0.0,
                mean_residual_value: 0.0,
                mean_salvage_value: 0.0,
                mean_modules_created: 0.0,
                mean_repairs: 0.0,
                mean_final_ctmo: 0.0,
                mean_final_ceff: 0.0,
                mean_failing_months: 0.0,
            };
        }

        let n = results.len() as f64;
        let mut cost_sum = 0.0;
        let mut residual_sum = 0.0;
        let mut salvage_sum = 0.0;
        let mut created_sum = 0.0;
        let mut repair_sum = 0.0;
        let mut ctmo_sum = 0.0;
        let mut ceff_sum = 0.0;
        let mut failing_sum = 0.0;

        for r in results {
            cost_sum += r.total_cost;
            residual_sum += r.residual_value;
            salvage_sum += r.salvage_value;
            created_sum += r.pools.created_total as f64;
            repair_sum += r
                .ledger
                .iter()
                .filter(|e| e.action == Action::Repaired)
                .count() as f64;
            if let Some(last) = r.performance.last() {
                ctmo_sum += last.ctmo;
                ceff_sum += last.ceff;
            }
            failing_sum += r.performance.iter().filter(|row| row.fails_tmo).count() as f64;
        }

        Self {
            runs: results.len(),
            mean_total_cost: cost_sum / n,
            mean_residual_value: residual_sum / n,
            mean_salvage_value: salvage_sum / n,
            mean_modules_created: created_sum / n,
            mean_repairs: repair_sum / n,
            mean_final_ctmo: ctmo_sum / n,
            mean_final_ceff: ceff_sum / n,
            mean_failing_months: failing_sum / n,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Summary ({} runs) ---", self.runs)?;
        writeln!(f, "Mean total cost:       {:.2}", self.mean_total_cost)?;
        writeln!(f, "Mean residual value:   {:.2}", self.mean_residual_value)?;
        writeln!(f, "Mean salvage value:    {:.2}", self.mean_salvage_value)?;
        writeln!(f, "Mean modules created:  {:.1}", self.mean_modules_created)?;
        writeln!(f, "Mean repairs:          {:.1}", self.mean_repairs)?;
        writeln!(f, "Mean final CTMO:       {:.4}", self.mean_final_ctmo)?;
        writeln!(f, "Mean final Ceff:       {:.4}", self.mean_final_ceff)?;
        write!(f, "Mean failing months:   {:.1}", self.mean_failing_months)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::shop::PoolCounts;
    use crate::site::PerformanceRow;

    fn make_result(total_cost: f64, final_ctmo: f64, failing: usize) -> RunResult {
        let performance = (0..12)
            .map(|m| PerformanceRow {
                month: m,
                fleet_month: m,
                ptmo: 1.0,
                peff: 0.5,
                ctmo: final_ctmo,
                ceff: 0.5,
                wtmo: 1.0,
                weff: 0.5,
                ceiling_loss: 0.0,
                fails_tmo: m < failing,
                fails_efficiency: false,
            })
            .collect();
        RunResult {
            seed: 1,
            performance,
            residual_value: 100.0,
            total_cost,
            ledger: Vec::new(),
            module_traces: HashMap::new(),
            salvage_value: 50.0,
            pools: PoolCounts {
                storage: 0,
                deployable: 0,
                junk: 0,
                salvage: 0,
                created_total: 10,
            },
        }
    }

    #[test]
    fn means_across_runs() {
        let results = vec![make_result(100.0, 0.9, 2), make_result(300.0, 0.8, 4)];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.runs, 2);
        assert!((summary.mean_total_cost - 200.0).abs() < 1e-9);
        assert!((summary.mean_final_ctmo - 0.85).abs() < 1e-9);
        assert!((summary.mean_failing_months - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_results() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.mean_total_cost, 0.0);
    }
}
