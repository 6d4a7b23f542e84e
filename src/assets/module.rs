//! The replaceable power module (FRU).

use rand::rngs::StdRng;

use crate::curve::{CurveSelector, PowerCurveSet};

/// Percentile band a repaired module's replacement curve is drawn from.
/// Refurbishment resets a unit toward median-or-better fleet performance.
pub const REPAIR_BAND: (f64, f64) = (0.5, 1.0);

/// A replaceable power-producing unit with an age-indexed degradation curve.
///
/// A module lives in exactly one place at a time: installed in an enclosure
/// or in one of the Shop's pools. Ownership is by value throughout, so the
/// single-owner invariant is enforced by move semantics rather than by
/// convention.
#[derive(Debug, Clone)]
pub struct Module {
    /// Unique serial, issued by the Shop.
    pub serial: u64,
    /// Model family (e.g. "M10").
    pub model: String,
    /// Base family shared across marks.
    pub base_family: String,
    /// Mark / variant within the family.
    pub mark: String,
    /// Month index the unit was installed (fleet clock).
    pub install_month: usize,
    /// Age in months, advanced on-grid by `degrade` and off-grid by `store`.
    pub age_months: usize,
    /// Rated (nameplate) output.
    pub rating: f64,
    /// Peak efficiency at age zero.
    pub peak_efficiency: f64,
    /// Assigned degradation curve; index is age in months.
    curve: Vec<f64>,
    /// Ideal (best-percentile) curve for the same (model, mark).
    ideal_curve: Vec<f64>,
    /// Efficiency-over-age series.
    efficiency_curve: Vec<f64>,
}

impl Module {
    /// Creates a module at age zero.
    ///
    /// # Panics
    ///
    /// Panics if the assigned curve is empty or the rating is not positive.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        serial: u64,
        model: impl Into<String>,
        base_family: impl Into<String>,
        mark: impl Into<String>,
        install_month: usize,
        rating: f64,
        peak_efficiency: f64,
        curve: Vec<f64>,
        ideal_curve: Vec<f64>,
        efficiency_curve: Vec<f64>,
    ) -> Self {
        assert!(!curve.is_empty(), "module curve must not be empty");
        assert!(rating > 0.0, "rating must be > 0");
        Self {
            serial,
            model: model.into(),
            base_family: base_family.into(),
            mark: mark.into(),
            install_month,
            age_months: 0,
            rating,
            peak_efficiency,
            curve,
            ideal_curve,
            efficiency_curve,
        }
    }

    /// Current output: 0 when dead, else the curve value at the current age.
    /// With `ideal`, reads the ideal curve instead of the assigned one.
    pub fn output(&self, ideal: bool) -> f64 {
        if self.is_dead() {
            return 0.0;
        }
        let curve = if ideal { &self.ideal_curve } else { &self.curve };
        curve.get(self.age_months).copied().unwrap_or(0.0)
    }

    /// Current efficiency: 0 when dead, else the efficiency series value at
    /// the current age (the last value once the series is exhausted).
    pub fn efficiency(&self) -> f64 {
        if self.is_dead() {
            return 0.0;
        }
        self.efficiency_curve
            .get(self.age_months)
            .or(self.efficiency_curve.last())
            .copied()
            .unwrap_or(0.0)
    }

    /// A module is dead once its age reaches the end of its assigned curve.
    pub fn is_dead(&self) -> bool {
        self.age_months >= self.curve.len()
    }

    /// Output has fallen more than `threshold` below the rating.
    pub fn is_degraded(&self, threshold: f64) -> bool {
        self.output(false) < self.rating - threshold
    }

    /// Efficiency has fallen more than `threshold` below the peak.
    pub fn is_inefficient(&self, threshold: f64) -> bool {
        self.efficiency() < self.peak_efficiency - threshold
    }

    /// The unit trails its ideal trajectory by more than `threshold`
    /// (fractional), flagging it as worth pulling for repair. Dead modules are
    /// never deviated; they are replaced, not repaired.
    pub fn is_deviated(&self, threshold: f64) -> bool {
        if self.is_dead() {
            return false;
        }
        let ideal = self.output(true);
        if ideal <= 0.0 {
            return false;
        }
        1.0 - self.output(false) / ideal > threshold
    }

    /// Advances age by one on-grid month.
    pub fn degrade(&mut self) {
        self.age_months += 1;
    }

    /// Advances age by `months` of off-grid storage (no output produced).
    pub fn store(&mut self, months: usize) {
        self.age_months += months;
    }

    /// Reassigns the degradation curve from the upper percentile band,
    /// modeling refurbishment. Dead modules are beyond repair.
    pub fn repair(&mut self, curves: &PowerCurveSet, rng: &mut StdRng) {
        if self.is_dead() {
            return;
        }
        self.curve = curves.pick_curve(
            CurveSelector::Band(REPAIR_BAND.0, REPAIR_BAND.1),
            None,
            rng,
        );
    }

    /// Remaining months on the assigned curve from the current age.
    pub fn expected_life(&self) -> usize {
        self.curve.len().saturating_sub(self.age_months)
    }

    /// Forecast energy over `horizon` months (to curve end when `None`),
    /// following the assigned curve from the current age.
    pub fn expected_energy(&self, horizon: Option<usize>) -> f64 {
        if self.is_dead() {
            return 0.0;
        }
        let remaining = &self.curve[self.age_months..];
        let months = horizon.unwrap_or(remaining.len()).min(remaining.len());
        remaining[..months].iter().sum()
    }

    /// The assigned curve (read-only; tests and forecasting).
    pub fn curve(&self) -> &[f64] {
        &self.curve
    }

    /// Overrides the assigned curve, e.g. when bootstrapping a pre-existing
    /// unit from an observed fit.
    pub fn set_curve(&mut self, curve: Vec<f64>) {
        assert!(!curve.is_empty());
        self.curve = curve;
    }
}
