//! Append-only transaction ledger.
//!
//! Every module movement through the Shop produces exactly one entry (two for
//! a rebalancing transfer, which splits its cost across a pull and a move).
//! Entries are reproducible: for a fixed seed and scenario the ledger is
//! byte-identical across runs.

use std::fmt;

/// What happened to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Manufactured new (or cloned from the template cache).
    Created,
    /// Issued from the deployable pool into a slot.
    Deployed,
    /// Returned from a slot into storage.
    Stored,
    /// Resampled onto an upper-band curve while returning.
    Repaired,
    /// Scrapped: below the junk threshold or too little life left.
    Junked,
    /// Retained at contract end for residual value.
    Salvaged,
    /// First half of a rebalancing transfer (out of the donor slot).
    Pulled,
    /// Second half of a rebalancing transfer (into the recipient slot).
    Moved,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Deployed => "deployed",
            Action::Stored => "stored",
            Action::Repaired => "repaired",
            Action::Junked => "junked",
            Action::Salvaged => "salvaged",
            Action::Pulled => "pulled",
            Action::Moved => "moved",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the module moved toward or away from a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    To,
    From,
    /// Movement with no slot side, e.g. salvage at simulation end.
    None,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::To => "to",
            Direction::From => "from",
            Direction::None => "",
        }
    }
}

/// Address of one enclosure in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub site: usize,
    pub server: usize,
    pub enclosure: usize,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Fleet month the movement happened.
    pub month: usize,
    pub serial: u64,
    pub model: String,
    pub mark: String,
    /// Module output at the time of the movement.
    pub power: f64,
    /// Module efficiency at the time of the movement.
    pub efficiency: f64,
    pub action: Action,
    pub direction: Direction,
    pub site: Option<usize>,
    pub server: Option<usize>,
    pub enclosure: Option<usize>,
    /// Service cost of the movement (0 when no cost row matches).
    pub cost: f64,
}

impl LedgerEntry {
    /// Builds an entry for a movement at a slot.
    #[expect(clippy::too_many_arguments)]
    pub fn at_slot(
        month: usize,
        serial: u64,
        model: &str,
        mark: &str,
        power: f64,
        efficiency: f64,
        action: Action,
        direction: Direction,
        slot: SlotRef,
        cost: f64,
    ) -> Self {
        Self {
            month,
            serial,
            model: model.to_string(),
            mark: mark.to_string(),
            power,
            efficiency,
            action,
            direction,
            site: Some(slot.site),
            server: Some(slot.server),
            enclosure: Some(slot.enclosure),
            cost,
        }
    }

    /// Builds an entry for a movement with no slot side (e.g. salvage).
    #[expect(clippy::too_many_arguments)]
    pub fn unslotted(
        month: usize,
        serial: u64,
        model: &str,
        mark: &str,
        power: f64,
        efficiency: f64,
        action: Action,
        cost: f64,
    ) -> Self {
        Self {
            month,
            serial,
            model: model.to_string(),
            mark: mark.to_string(),
            power,
            efficiency,
            action,
            direction: Direction::None,
            site: None,
            server: None,
            enclosure: None,
            cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_strings_match_reporting_vocabulary() {
        assert_eq!(Action::Junked.as_str(), "junked");
        assert_eq!(Action::Created.as_str(), "created");
        assert_eq!(Direction::From.as_str(), "from");
        assert_eq!(Direction::None.as_str(), "");
    }

    #[test]
    fn slotted_entry_carries_full_address() {
        let slot = SlotRef { site: 2, server: 1, enclosure: 3 };
        let e = LedgerEntry::at_slot(
            5, 77, "M10", "A", 88.0, 0.48, Action::Deployed, Direction::To, slot, 12.5,
        );
        assert_eq!(e.site, Some(2));
        assert_eq!(e.server, Some(1));
        assert_eq!(e.enclosure, Some(3));
        assert_eq!(e.action, Action::Deployed);
    }
}
