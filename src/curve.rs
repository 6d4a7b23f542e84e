//! Percentile-indexed degradation and efficiency curves.
//!
//! A [`PowerCurveSet`] holds, for one (model, mark), a family of sampled
//! output-over-age trajectories labeled by the fleet-performance percentile
//! each represents, plus a single efficiency-over-age series. It can sample a
//! curve for a new unit, synthesize a continuation curve for a unit with an
//! observed operating point, and forecast expected output/energy.

use rand::Rng;
use rand::rngs::StdRng;

/// How [`PowerCurveSet::pick_curve`] should select among percentile curves
/// when no observation constrains the choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveSelector {
    /// The single best curve (highest percentile).
    Ideal,
    /// The single worst curve (lowest percentile).
    Worst,
    /// Sample by percentile probability mass restricted to `[lo, hi]`.
    Band(f64, f64),
}

/// An observed operating point or history used to fit a continuation curve.
#[derive(Debug, Clone)]
pub enum ObservedFit {
    /// A unit of known age with a single observed current output.
    Point { age: usize, output: f64 },
    /// A full observed monthly output trace; the fit point is the last value.
    Trace(Vec<f64>),
}

impl ObservedFit {
    /// The (age, output) pair this fit constrains the curve through.
    fn operating_point(&self) -> Option<(usize, f64)> {
        match self {
            ObservedFit::Point { age, output } => Some((*age, *output)),
            ObservedFit::Trace(values) => values
                .last()
                .map(|last| (values.len().saturating_sub(1), *last)),
        }
    }
}

/// Derives a discrete probability mass over sorted percentiles.
///
/// Each percentile is treated as the midpoint of a symmetric band: with
/// boundaries `b0 = 0` and `b_i = 2 * p_i - b_{i-1}`, the mass of `p_i` is
/// `b_i - b_{i-1}`. For percentiles symmetric on (0, 1] the masses sum to 1
/// within floating tolerance.
pub fn probability_of(percentiles: &[f64]) -> Vec<f64> {
    let mut masses = Vec::with_capacity(percentiles.len());
    let mut boundary = 0.0;
    for p in percentiles {
        let next = 2.0 * p - boundary;
        masses.push(next - boundary);
        boundary = next;
    }
    masses
}

/// Percentile-indexed power curves plus the companion efficiency curve for
/// one (model, mark).
///
/// Curves are stored sorted by ascending percentile, so the first entry is
/// the worst trajectory and the last the ideal one. All power curves share
/// one length (the design life in months).
#[derive(Debug, Clone)]
pub struct PowerCurveSet {
    percentiles: Vec<f64>,
    curves: Vec<Vec<f64>>,
    masses: Vec<f64>,
    efficiency: Vec<f64>,
}

impl PowerCurveSet {
    /// Builds a curve set from percentile-labeled power curves and an
    /// efficiency series.
    ///
    /// # Panics
    ///
    /// Panics if the table is empty, percentiles are not strictly ascending
    /// in (0, 1], or curve lengths differ.
    pub fn new(percentiles: Vec<f64>, curves: Vec<Vec<f64>>, efficiency: Vec<f64>) -> Self {
        assert!(!curves.is_empty(), "curve table must not be empty");
        assert_eq!(percentiles.len(), curves.len());
        assert!(
            percentiles.windows(2).all(|w| w[0] < w[1]),
            "percentiles must be strictly ascending"
        );
        assert!(
            percentiles.iter().all(|p| *p > 0.0 && *p <= 1.0),
            "percentiles must lie in (0, 1]"
        );
        let len = curves[0].len();
        assert!(len > 0, "curves must have at least one month");
        assert!(curves.iter().all(|c| c.len() == len));

        let masses = probability_of(&percentiles);
        Self {
            percentiles,
            curves,
            masses,
            efficiency,
        }
    }

    /// Design life of the power curves, in months.
    pub fn curve_len(&self) -> usize {
        self.curves[0].len()
    }

    /// The ideal (highest-percentile) curve.
    pub fn ideal(&self) -> &[f64] {
        self.curves.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The worst (lowest-percentile) curve.
    pub fn worst(&self) -> &[f64] {
        self.curves.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The efficiency-over-age series.
    pub fn efficiency(&self) -> &[f64] {
        &self.efficiency
    }

    /// The efficiency series prefixed by an observed historical trace.
    ///
    /// The returned series follows the trace for its length, then continues on
    /// the catalog efficiency curve from that age onward.
    pub fn prefixed_efficiency(&self, trace: &[f64]) -> Vec<f64> {
        let mut series = trace.to_vec();
        if trace.len() < self.efficiency.len() {
            series.extend_from_slice(&self.efficiency[trace.len()..]);
        }
        series
    }

    /// Selects or synthesizes one full-life power curve.
    ///
    /// Without a `fit`, selection follows the [`CurveSelector`]: the single
    /// ideal/worst curve, or a seeded weighted draw restricted to a percentile
    /// band. With a `fit`, a continuation curve is synthesized through the
    /// observed operating point: above the best expected value the unit
    /// continues on the ideal curve; below the worst it continues on the worst
    /// curve scaled down through the observation; otherwise the two bracketing
    /// curves are interpolated.
    pub fn pick_curve(
        &self,
        selector: CurveSelector,
        fit: Option<&ObservedFit>,
        rng: &mut StdRng,
    ) -> Vec<f64> {
        if let Some(fit) = fit
            && let Some((age, output)) = fit.operating_point()
        {
            return self.fit_curve(age, output);
        }

        match selector {
            CurveSelector::Ideal => self.ideal().to_vec(),
            CurveSelector::Worst => self.worst().to_vec(),
            CurveSelector::Band(lo, hi) => {
                let indices: Vec<usize> = (0..self.percentiles.len())
                    .filter(|&i| self.percentiles[i] >= lo && self.percentiles[i] <= hi)
                    .collect();
                // An empty band falls back to the full table.
                let indices = if indices.is_empty() {
                    (0..self.percentiles.len()).collect()
                } else {
                    indices
                };
                let total: f64 = indices.iter().map(|&i| self.masses[i]).sum();
                let mut draw = rng.random::<f64>() * total;
                let mut chosen = indices[indices.len() - 1];
                for &i in &indices {
                    if draw < self.masses[i] {
                        chosen = i;
                        break;
                    }
                    draw -= self.masses[i];
                }
                self.curves[chosen].clone()
            }
        }
    }

    /// Synthesizes a full-life curve passing through `(age, output)`.
    fn fit_curve(&self, age: usize, output: f64) -> Vec<f64> {
        let idx = age.min(self.curve_len() - 1);
        let best = self.ideal()[idx];
        let worst = self.worst()[idx];

        if output >= best {
            return self.ideal().to_vec();
        }
        if output <= worst {
            let scale = if worst > 0.0 { output / worst } else { 0.0 };
            return self.worst().iter().map(|v| v * scale.max(0.0)).collect();
        }

        // Interpolate between the two curves bracketing the observation.
        for pair in 0..self.curves.len() - 1 {
            let lo = self.curves[pair][idx];
            let hi = self.curves[pair + 1][idx];
            if output >= lo && output <= hi {
                let t = if hi > lo { (output - lo) / (hi - lo) } else { 0.0 };
                return self.curves[pair]
                    .iter()
                    .zip(&self.curves[pair + 1])
                    .map(|(a, b)| a + t * (b - a))
                    .collect();
            }
        }
        // Monotone tables always bracket; non-monotone data lands here.
        self.worst().to_vec()
    }

    /// Probability-weighted average of all curves consistent with an observed
    /// operating point, truncated to start at `age`.
    ///
    /// A curve is consistent when its value at `age` does not exceed the
    /// observation; with no observation every curve contributes. When the
    /// observation is below the worst curve, the worst curve scaled through
    /// the observation is returned instead.
    pub fn expected_curve(&self, age: usize, observed: Option<f64>) -> Vec<f64> {
        let len = self.curve_len();
        if age >= len {
            return Vec::new();
        }

        let consistent: Vec<usize> = match observed {
            None => (0..self.curves.len()).collect(),
            Some(o) => (0..self.curves.len())
                .filter(|&i| self.curves[i][age] <= o)
                .collect(),
        };

        if consistent.is_empty() {
            // Observation below every curve: continue on the scaled worst.
            let o = observed.unwrap_or(0.0);
            return self.fit_curve(age, o)[age..].to_vec();
        }

        let total: f64 = consistent.iter().map(|&i| self.masses[i]).sum();
        let mut avg = vec![0.0; len - age];
        for &i in &consistent {
            let w = self.masses[i] / total;
            for (slot, v) in avg.iter_mut().zip(&self.curves[i][age..]) {
                *slot += w * v;
            }
        }
        avg
    }

    /// Sum of [`Self::expected_curve`] over `horizon` months (to curve end
    /// when `None` or past the end).
    pub fn expected_energy(&self, age: usize, observed: Option<f64>, horizon: Option<usize>) -> f64 {
        let curve = self.expected_curve(age, observed);
        let months = horizon.unwrap_or(curve.len()).min(curve.len());
        curve[..months].iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_set() -> PowerCurveSet {
        // Three percentile curves over 4 months, strictly ordered at all ages.
        PowerCurveSet::new(
            vec![0.25, 0.5, 0.75],
            vec![
                vec![80.0, 70.0, 60.0, 50.0],
                vec![90.0, 82.0, 74.0, 66.0],
                vec![100.0, 94.0, 88.0, 82.0],
            ],
            vec![0.50, 0.49, 0.48, 0.47],
        )
    }

    #[test]
    fn probability_masses_sum_to_one() {
        let masses = probability_of(&[0.1, 0.3, 0.5, 0.7, 0.9]);
        let sum: f64 = masses.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
        for m in &masses {
            assert!((*m - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn probability_masses_uneven_spacing_still_sum_to_one() {
        let masses = probability_of(&[0.05, 0.25, 0.5, 0.75, 0.95]);
        let sum: f64 = masses.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
    }

    #[test]
    fn ideal_and_worst_selectors() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(set.pick_curve(CurveSelector::Ideal, None, &mut rng)[0], 100.0);
        assert_eq!(set.pick_curve(CurveSelector::Worst, None, &mut rng)[0], 80.0);
    }

    #[test]
    fn band_sampling_stays_in_band() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let curve = set.pick_curve(CurveSelector::Band(0.5, 1.0), None, &mut rng);
            assert!(curve[0] >= 90.0, "drew a curve below the band: {}", curve[0]);
        }
    }

    #[test]
    fn fit_above_best_continues_on_ideal() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(1);
        let fit = ObservedFit::Point { age: 1, output: 99.0 };
        let curve = set.pick_curve(CurveSelector::Band(0.0, 1.0), Some(&fit), &mut rng);
        assert_eq!(curve, set.ideal().to_vec());
    }

    #[test]
    fn fit_below_worst_scales_worst_through_observation() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(1);
        let fit = ObservedFit::Point { age: 1, output: 35.0 };
        let curve = set.pick_curve(CurveSelector::Band(0.0, 1.0), Some(&fit), &mut rng);
        assert!((curve[1] - 35.0).abs() < 1e-9);
        // Shape is preserved: same ratio as the worst curve.
        assert!((curve[0] / curve[1] - 80.0 / 70.0).abs() < 1e-9);
    }

    #[test]
    fn fit_between_curves_interpolates_through_observation() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(1);
        let fit = ObservedFit::Point { age: 2, output: 81.0 };
        let curve = set.pick_curve(CurveSelector::Band(0.0, 1.0), Some(&fit), &mut rng);
        assert!((curve[2] - 81.0).abs() < 1e-9);
    }

    #[test]
    fn trace_fit_uses_last_observation() {
        let set = test_set();
        let mut rng = StdRng::seed_from_u64(1);
        let fit = ObservedFit::Trace(vec![95.0, 82.0]);
        let curve = set.pick_curve(CurveSelector::Band(0.0, 1.0), Some(&fit), &mut rng);
        assert!((curve[1] - 82.0).abs() < 1e-9);
    }

    #[test]
    fn expected_curve_truncates_to_age() {
        let set = test_set();
        let curve = set.expected_curve(2, None);
        assert_eq!(curve.len(), 2);
    }

    #[test]
    fn expected_curve_excludes_curves_above_observation() {
        let set = test_set();
        // At age 1 the curves sit at 70 / 82 / 94; observing 75 leaves only
        // the worst curve consistent.
        let curve = set.expected_curve(1, Some(75.0));
        assert!((curve[0] - 70.0).abs() < 1e-9);
    }

    #[test]
    fn expected_energy_honors_horizon() {
        let set = test_set();
        let all = set.expected_energy(0, None, None);
        let two = set.expected_energy(0, None, Some(2));
        assert!(two < all);
        let beyond = set.expected_energy(0, None, Some(100));
        assert!((beyond - all).abs() < 1e-9);
    }

    #[test]
    fn prefixed_efficiency_continues_catalog_series() {
        let set = test_set();
        let series = set.prefixed_efficiency(&[0.55, 0.53]);
        assert_eq!(series.len(), 4);
        assert!((series[0] - 0.55).abs() < 1e-9);
        assert!((series[2] - 0.48).abs() < 1e-9);
    }
}
