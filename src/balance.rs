//! Greedy ceiling-loss reducer.
//!
//! Moves modules from nameplate-saturated servers into servers with spare
//! headroom and an open enclosure, one module at a time, committing each move
//! only when it strictly lowers the site's total ceiling loss.

use tracing::debug;

use crate::assets::Server;
use crate::ledger::SlotRef;
use crate::shop::Shop;
use crate::site::Site;

/// Rebalances modules within one site. Returns the number of moves committed.
pub fn balance(site: &mut Site, shop: &mut Shop) -> usize {
    let mut moves = 0;
    loop {
        let total_before: f64 = site.servers.iter().map(Server::ceiling_loss).sum();

        let Some(donor_idx) = donor(&site.servers) else {
            break;
        };
        let Some(recipient_idx) = recipient(&site.servers, donor_idx) else {
            break;
        };
        let Some(module_idx) = smallest_module(&site.servers[donor_idx]) else {
            break;
        };
        let Some(open_idx) = site.servers[recipient_idx].empty_enclosure_index(false) else {
            break;
        };

        // Tentative move: commit only on strict improvement.
        let module = match site.servers[donor_idx].enclosures[module_idx].remove() {
            Some(m) => m,
            None => break,
        };
        let replaced = site.servers[recipient_idx].enclosures[open_idx].install(module);
        debug_assert!(replaced.is_none(), "recipient slot was reported open");

        let total_after: f64 = site.servers.iter().map(Server::ceiling_loss).sum();
        if total_after < total_before {
            let moved = site.servers[recipient_idx].enclosures[open_idx]
                .module
                .as_ref()
                .map(|m| (m.serial, m.output(false)));
            if let Some(module) = site.servers[recipient_idx].enclosures[open_idx].module.as_ref() {
                shop.balance_transfer(
                    module,
                    SlotRef {
                        site: site.number,
                        server: donor_idx,
                        enclosure: module_idx,
                    },
                    SlotRef {
                        site: site.number,
                        server: recipient_idx,
                        enclosure: open_idx,
                    },
                );
            }
            if let Some((serial, output)) = moved {
                debug!(site = site.number, serial, output, "balance move committed");
            }
            moves += 1;
        } else {
            // Undo and stop: the greedy pair no longer improves anything.
            if let Some(module) = site.servers[recipient_idx].enclosures[open_idx].remove() {
                site.servers[donor_idx].enclosures[module_idx].install(module);
            }
            break;
        }
    }
    moves
}

/// Server losing the most output to its nameplate cap.
fn donor(servers: &[Server]) -> Option<usize> {
    servers
        .iter()
        .enumerate()
        .filter(|(_, s)| s.ceiling_loss() > 0.0)
        .max_by(|(_, a), (_, b)| a.ceiling_loss().total_cmp(&b.ceiling_loss()))
        .map(|(i, _)| i)
}

/// Server with the most headroom that still has an open enclosure.
fn recipient(servers: &[Server], donor_idx: usize) -> Option<usize> {
    servers
        .iter()
        .enumerate()
        .filter(|(i, s)| *i != donor_idx && s.has_empty(false) && s.headroom() > 0.0)
        .max_by(|(_, a), (_, b)| a.headroom().total_cmp(&b.headroom()))
        .map(|(i, _)| i)
}

/// Index of the donor's lowest-output live module.
fn smallest_module(server: &Server) -> Option<usize> {
    server
        .enclosures
        .iter()
        .enumerate()
        .filter_map(|(i, e)| {
            e.module
                .as_ref()
                .filter(|m| !m.is_dead())
                .map(|m| (i, m.output(false)))
        })
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}
