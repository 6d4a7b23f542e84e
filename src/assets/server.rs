//! Servers and their module enclosures.

use super::module::Module;

/// One slot in a server; holds at most one module.
#[derive(Debug, Clone)]
pub struct Enclosure {
    /// Slot index within the owning server.
    pub slot: usize,
    /// The installed module, if any. The module value lives here or in a Shop
    /// pool, never both.
    pub module: Option<Module>,
}

impl Enclosure {
    pub fn new(slot: usize) -> Self {
        Self { slot, module: None }
    }

    /// Installs a module, returning the displaced occupant if the slot was
    /// filled.
    pub fn install(&mut self, module: Module) -> Option<Module> {
        self.module.replace(module)
    }

    /// Removes and returns the occupant.
    pub fn remove(&mut self) -> Option<Module> {
        self.module.take()
    }
}

/// An ordered sequence of enclosures with a nameplate output cap.
///
/// Reported output is capped at the nameplate; the surplus lost to the cap is
/// the server's ceiling loss, always >= 0.
#[derive(Debug, Clone)]
pub struct Server {
    /// Serial, issued by the Shop.
    pub serial: u64,
    /// Server model identifier.
    pub model: String,
    /// Rated maximum output.
    pub nameplate: f64,
    /// Ordered slots.
    pub enclosures: Vec<Enclosure>,
}

impl Server {
    /// Creates a server with `slots` empty enclosures.
    ///
    /// # Panics
    ///
    /// Panics if the nameplate is not positive or `slots` is zero.
    pub fn new(serial: u64, model: impl Into<String>, nameplate: f64, slots: usize) -> Self {
        assert!(nameplate > 0.0, "nameplate must be > 0");
        assert!(slots > 0, "a server needs at least one enclosure");
        Self {
            serial,
            model: model.into(),
            nameplate,
            enclosures: (0..slots).map(Enclosure::new).collect(),
        }
    }

    /// Sum of module outputs before the nameplate cap.
    pub fn output_uncapped(&self) -> f64 {
        self.enclosures
            .iter()
            .filter_map(|e| e.module.as_ref())
            .map(|m| m.output(false))
            .sum()
    }

    /// Reported output, capped at the nameplate.
    pub fn output_capped(&self) -> f64 {
        self.output_uncapped().min(self.nameplate)
    }

    /// Output lost to the nameplate cap.
    pub fn ceiling_loss(&self) -> f64 {
        self.output_uncapped() - self.output_capped()
    }

    /// Nameplate headroom above the current capped output.
    pub fn headroom(&self) -> f64 {
        self.nameplate - self.output_capped()
    }

    /// Fuel consumed this month: per-module output over efficiency.
    pub fn fuel(&self) -> f64 {
        self.enclosures
            .iter()
            .filter_map(|e| e.module.as_ref())
            .map(|m| {
                let eff = m.efficiency();
                if eff > 0.0 { m.output(false) / eff } else { 0.0 }
            })
            .sum()
    }

    /// Whether any enclosure is open (or holds a dead module, with
    /// `include_dead`).
    pub fn has_empty(&self, include_dead: bool) -> bool {
        self.empty_enclosure_index(include_dead).is_some()
    }

    /// Whether every enclosure is filled; with `plus_one_empty`, one open
    /// slot still counts as full (the spare slot convention).
    pub fn is_full(&self, plus_one_empty: bool) -> bool {
        let open = self.enclosures.iter().filter(|e| e.module.is_none()).count();
        if plus_one_empty { open <= 1 } else { open == 0 }
    }

    /// The lowest-numbered open slot, or with `include_dead` the first
    /// dead-module slot when no slot is open.
    pub fn empty_enclosure_index(&self, include_dead: bool) -> Option<usize> {
        let open = self
            .enclosures
            .iter()
            .position(|e| e.module.is_none());
        if open.is_some() {
            return open;
        }
        if include_dead {
            return self
                .enclosures
                .iter()
                .position(|e| e.module.as_ref().is_some_and(Module::is_dead));
        }
        None
    }

    /// Number of installed modules.
    pub fn module_count(&self) -> usize {
        self.enclosures.iter().filter(|e| e.module.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(serial: u64, output: f64) -> Module {
        Module::new(
            serial, "M10", "M", "A", 0, output.max(1.0), 0.5,
            vec![output; 12], vec![output; 12], vec![0.5; 12],
        )
    }

    fn dead_module(serial: u64) -> Module {
        let mut m = module(serial, 50.0);
        m.store(12);
        m
    }

    #[test]
    fn output_is_capped_and_ceiling_loss_non_negative() {
        let mut s = Server::new(1, "S400", 100.0, 3);
        s.enclosures[0].install(module(1, 60.0));
        s.enclosures[1].install(module(2, 60.0));
        assert!((s.output_capped() - 100.0).abs() < 1e-9);
        assert!((s.ceiling_loss() - 20.0).abs() < 1e-9);
        assert!(s.ceiling_loss() >= 0.0);
    }

    #[test]
    fn under_nameplate_has_no_ceiling_loss() {
        let mut s = Server::new(1, "S400", 100.0, 2);
        s.enclosures[0].install(module(1, 40.0));
        assert_eq!(s.ceiling_loss(), 0.0);
        assert!((s.headroom() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_slot_search_prefers_open_over_dead() {
        let mut s = Server::new(1, "S400", 100.0, 3);
        s.enclosures[0].install(dead_module(1));
        s.enclosures[1].install(module(2, 40.0));
        // Slot 2 is open.
        assert_eq!(s.empty_enclosure_index(true), Some(2));
        s.enclosures[2].install(module(3, 40.0));
        // No open slot left; dead slot 0 is found only with include_dead.
        assert_eq!(s.empty_enclosure_index(false), None);
        assert_eq!(s.empty_enclosure_index(true), Some(0));
    }

    #[test]
    fn is_full_respects_plus_one_convention() {
        let mut s = Server::new(1, "S400", 100.0, 3);
        s.enclosures[0].install(module(1, 40.0));
        s.enclosures[1].install(module(2, 40.0));
        assert!(!s.is_full(false));
        assert!(s.is_full(true));
    }

    #[test]
    fn fuel_accounts_for_efficiency() {
        let mut s = Server::new(1, "S400", 200.0, 2);
        s.enclosures[0].install(module(1, 50.0));
        // 50 output at 0.5 efficiency burns 100 fuel.
        assert!((s.fuel() - 100.0).abs() < 1e-9);
    }
}
