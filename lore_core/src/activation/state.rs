//! Per-entry decay counters - the activation ledger.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Decay state for one knowledge entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryActivation {
    /// Turns of guaranteed activation left.
    pub sticky_remaining: u32,

    /// Turns of re-trigger ineligibility left.
    pub cooldown_remaining: u32,

    /// Turn the entry last activated through a match or external
    /// selection. `None` means never.
    pub last_active_turn: Option<u64>,
}

/// Session-lived map from entry uid to decay state.
///
/// States appear lazily on first touch and are never removed; an entry
/// that stops being touched simply ages out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationLedger {
    entries: HashMap<String, EntryActivation>,
}

impl ActivationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: &str) -> Option<&EntryActivation> {
        self.entries.get(uid)
    }

    pub fn sticky_remaining(&self, uid: &str) -> u32 {
        self.entries.get(uid).map(|e| e.sticky_remaining).unwrap_or(0)
    }

    pub fn cooldown_remaining(&self, uid: &str) -> u32 {
        self.entries.get(uid).map(|e| e.cooldown_remaining).unwrap_or(0)
    }

    /// Turns since the entry last activated. An entry never touched reads
    /// as age zero rather than ancient, so fresh Live-Link entries are not
    /// born dormant.
    pub fn age(&self, uid: &str, current_turn: u64) -> u64 {
        match self.entries.get(uid).and_then(|e| e.last_active_turn) {
            Some(last) => current_turn.saturating_sub(last),
            None => 0,
        }
    }

    /// Record an activation via match or external selection.
    ///
    /// The sticky grant is a floor: an already-larger remainder survives.
    /// A nonzero authored cooldown resets the cooldown counter.
    pub fn touch(&mut self, uid: &str, turn: u64, sticky_floor: u32, cooldown: u32) {
        let entry = self.entries.entry(uid.to_string()).or_default();
        entry.last_active_turn = Some(turn);
        entry.sticky_remaining = entry.sticky_remaining.max(sticky_floor);
        if cooldown > 0 {
            entry.cooldown_remaining = cooldown;
        }
    }

    /// Decrement both counters on every entry not touched this turn,
    /// floored at zero.
    pub fn decay_untouched(&mut self, touched: &HashSet<String>) {
        for (uid, entry) in &mut self.entries {
            if touched.contains(uid) {
                continue;
            }
            entry.sticky_remaining = entry.sticky_remaining.saturating_sub(1);
            entry.cooldown_remaining = entry.cooldown_remaining.saturating_sub(1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
