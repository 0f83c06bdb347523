//! Context Activation Engine - decides which lore entries a turn shows the
//! generator.
//!
//! Selection per scan is a union:
//! 1. Disabled entries (manual override, else card default) never activate
//! 2. Constant entries activate unconditionally
//! 3. Pinned entries activate unconditionally
//! 4. Entries with a running sticky grant activate
//! 5. Externally selected entries activate, bypassing cooldown and dormancy
//! 6. Text matching against the scan buffer, gated by cooldown
//! 7. Dormant Live-Link entries are excluded from matching
//! 8. Content of newly activated entries feeds further matching passes
//!
//! The decay ledger is threaded through [`ActivationEngine::scan`] as an
//! explicit input and output, never a hidden singleton.

mod state;

pub use state::*;

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;

use crate::lorebook::{KeySet, KnowledgeEntry};

/// Configuration for the activation scan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Extra matching passes fed by newly activated content.
    pub recursion_passes: u32,

    /// Maximum turns since last activation before a Live-Link entry goes
    /// dormant. The boundary is inclusive: an entry exactly this old is
    /// still eligible.
    pub dormancy_window: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            recursion_passes: 2,
            dormancy_window: 10,
        }
    }
}

impl ActivationConfig {
    /// Load overrides from a TOML document.
    pub fn from_toml_str(doc: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(doc)
    }
}

/// Inputs for one activation scan.
#[derive(Debug)]
pub struct ScanRequest<'a> {
    /// Rolling conversational text for this turn.
    pub turn_text: &'a str,

    /// Full entry corpus: authored lore plus the current Live-Link
    /// generation.
    pub corpus: &'a [KnowledgeEntry],

    /// Decay state carried over from the previous turn.
    pub ledger: &'a ActivationLedger,

    /// Per-session enable/disable overrides by uid, taking precedence
    /// over each entry's card default.
    pub manual_overrides: &'a HashMap<String, bool>,

    /// Entries forced active regardless of matching.
    pub pinned: &'a HashSet<String>,

    /// Entries chosen by a delegated relevance-ranking step. These bypass
    /// cooldown and dormancy.
    pub externally_selected: &'a HashSet<String>,

    /// Skip text matching entirely; only the unconditional rules apply.
    pub bypass_text_matching: bool,

    pub current_turn: u64,

    /// Sticky grant applied to externally selected entries on top of
    /// their authored sticky.
    pub external_sticky_override: Option<u32>,
}

/// The result of one activation scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Activated entries, sorted by insertion order.
    pub active: Vec<KnowledgeEntry>,

    /// Updated decay state to carry into the next turn.
    pub ledger: ActivationLedger,
}

/// The activation engine. Holds configuration only; all state flows
/// through [`ScanRequest`] and [`ScanOutcome`].
#[derive(Debug, Clone)]
pub struct ActivationEngine {
    config: ActivationConfig,
}

impl ActivationEngine {
    pub fn new(config: ActivationConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ActivationConfig::default())
    }

    /// Run one activation scan.
    ///
    /// Touch bookkeeping covers entries matched or externally selected. A
    /// match touches even when sticky, a pin, or a constant already
    /// carries the entry; only inclusion without a match leaves counters
    /// decaying.
    pub fn scan(&self, req: ScanRequest<'_>) -> ScanOutcome {
        let mut ledger = req.ledger.clone();
        let by_uid: HashMap<&str, &KnowledgeEntry> =
            req.corpus.iter().map(|e| (e.uid.as_str(), e)).collect();
        let enabled = |entry: &KnowledgeEntry| {
            req.manual_overrides
                .get(entry.uid.as_str())
                .copied()
                .unwrap_or(entry.enabled)
        };

        let mut active: HashSet<&str> = HashSet::new();
        let mut touched: HashSet<String> = HashSet::new();
        let mut buffer = req.turn_text.to_lowercase();

        // Unconditional inclusions: constants, pins, running sticky
        // grants, and external selections.
        for entry in req.corpus {
            if !enabled(entry) {
                continue;
            }
            let unconditional = entry.constant
                || req.pinned.contains(entry.uid.as_str())
                || ledger.sticky_remaining(&entry.uid) > 0;
            let external = req.externally_selected.contains(entry.uid.as_str());
            if !unconditional && !external {
                continue;
            }
            if active.insert(entry.uid.as_str()) {
                if external {
                    touched.insert(entry.uid.clone());
                }
                if !entry.constant {
                    buffer.push('\n');
                    buffer.push_str(&entry.content.to_lowercase());
                }
            }
        }

        if !req.bypass_text_matching {
            // Keys compile once per scan; the pass loop below runs over
            // the whole corpus up to three times.
            let compiled: HashMap<&str, (KeySet, KeySet)> = req
                .corpus
                .iter()
                .filter(|entry| enabled(entry) && !entry.keys.is_empty())
                .map(|entry| {
                    (
                        entry.uid.as_str(),
                        (
                            KeySet::compile(&entry.keys, entry.use_regex),
                            KeySet::compile(&entry.secondary_keys, entry.use_regex),
                        ),
                    )
                })
                .collect();

            for _pass in 0..=self.config.recursion_passes {
                let mut matched: Vec<&KnowledgeEntry> = Vec::new();
                for entry in req.corpus {
                    // Already-active entries are still evaluated: a match
                    // while sticky or pinned carries the entry must keep
                    // refreshing its counters and dormancy age.
                    if touched.contains(entry.uid.as_str()) {
                        continue;
                    }
                    let Some((primary, secondary)) = compiled.get(entry.uid.as_str()) else {
                        continue;
                    };
                    if !primary.matches(&buffer) {
                        continue;
                    }
                    if !entry.secondary_keys.is_empty() && !secondary.matches(&buffer) {
                        continue;
                    }
                    if ledger.cooldown_remaining(&entry.uid) > 0 {
                        debug!(uid = entry.uid.as_str(), "match suppressed by cooldown");
                        continue;
                    }
                    if entry.is_live_link()
                        && ledger.age(&entry.uid, req.current_turn) > self.config.dormancy_window
                    {
                        debug!(uid = entry.uid.as_str(), "match suppressed by dormancy");
                        continue;
                    }
                    matched.push(entry);
                }

                let mut buffer_grew = false;
                for entry in matched {
                    touched.insert(entry.uid.clone());
                    if active.insert(entry.uid.as_str()) && !entry.constant {
                        buffer.push('\n');
                        buffer.push_str(&entry.content.to_lowercase());
                        buffer_grew = true;
                    }
                }
                // Nothing new to match against means further passes would
                // only re-evaluate the same buffer.
                if !buffer_grew {
                    break;
                }
            }
        }

        for uid in &touched {
            if let Some(entry) = by_uid.get(uid.as_str()) {
                let mut sticky_floor = entry.sticky;
                if req.externally_selected.contains(uid) {
                    if let Some(grant) = req.external_sticky_override {
                        sticky_floor = sticky_floor.max(grant);
                    }
                }
                ledger.touch(uid, req.current_turn, sticky_floor, entry.cooldown);
            }
        }
        ledger.decay_untouched(&touched);

        let mut entries: Vec<KnowledgeEntry> = active
            .iter()
            .filter_map(|uid| by_uid.get(uid).map(|e| (*e).clone()))
            .collect();
        entries.sort_by(|a, b| {
            a.insertion_order
                .cmp(&b.insertion_order)
                .then_with(|| a.uid.cmp(&b.uid))
        });

        ScanOutcome {
            active: entries,
            ledger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorebook::EntryOrigin;

    struct Harness {
        engine: ActivationEngine,
        manual_overrides: HashMap<String, bool>,
        pinned: HashSet<String>,
        externally_selected: HashSet<String>,
        bypass_text_matching: bool,
        external_sticky_override: Option<u32>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                engine: ActivationEngine::with_defaults(),
                manual_overrides: HashMap::new(),
                pinned: HashSet::new(),
                externally_selected: HashSet::new(),
                bypass_text_matching: false,
                external_sticky_override: None,
            }
        }

        fn scan(
            &self,
            text: &str,
            corpus: &[KnowledgeEntry],
            ledger: &ActivationLedger,
            turn: u64,
        ) -> ScanOutcome {
            self.engine.scan(ScanRequest {
                turn_text: text,
                corpus,
                ledger,
                manual_overrides: &self.manual_overrides,
                pinned: &self.pinned,
                externally_selected: &self.externally_selected,
                bypass_text_matching: self.bypass_text_matching,
                current_turn: turn,
                external_sticky_override: self.external_sticky_override,
            })
        }
    }

    fn uids(outcome: &ScanOutcome) -> Vec<&str> {
        outcome.active.iter().map(|e| e.uid.as_str()).collect()
    }

    fn keyed(uid: &str, key: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(format!("content of {uid}"))
            .with_uid(uid)
            .with_keys([key])
    }

    #[test]
    fn test_constant_always_active() {
        let harness = Harness::new();
        let corpus = vec![KnowledgeEntry::new("always").with_uid("c").constant()];
        let outcome = harness.scan("unrelated text", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["c"]);
    }

    #[test]
    fn test_disabled_never_active() {
        let harness = Harness::new();
        let corpus = vec![
            KnowledgeEntry::new("off").with_uid("off").constant().disabled(),
            keyed("k", "dragon").disabled(),
        ];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_manual_override_beats_card_default() {
        let mut harness = Harness::new();
        harness.manual_overrides.insert("off".to_string(), true);
        harness.manual_overrides.insert("on".to_string(), false);
        let corpus = vec![
            keyed("off", "dragon").disabled(),
            keyed("on", "dragon"),
        ];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["off"]);
    }

    #[test]
    fn test_pinned_included_without_match() {
        let mut harness = Harness::new();
        harness.pinned.insert("p".to_string());
        let corpus = vec![keyed("p", "dragon")];
        let outcome = harness.scan("no trigger here", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["p"]);
    }

    #[test]
    fn test_text_match_and_secondary_gate() {
        let harness = Harness::new();
        let corpus = vec![
            keyed("plain", "dragon"),
            keyed("gated", "dragon").with_secondary_keys(["mountain"]),
        ];

        let outcome = harness.scan("a dragon in the valley", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["plain"]);

        let outcome = harness.scan(
            "a dragon on the mountain",
            &corpus,
            &ActivationLedger::new(),
            1,
        );
        assert_eq!(uids(&outcome), vec!["gated", "plain"]);
    }

    #[test]
    fn test_boolean_key_composition() {
        let harness = Harness::new();
        let corpus = vec![keyed("k", "sword & !broken")];

        let hit = harness.scan("she draws the sword", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&hit), vec!["k"]);

        let miss = harness.scan(
            "the sword lies broken",
            &corpus,
            &ActivationLedger::new(),
            1,
        );
        assert!(miss.active.is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_open() {
        let harness = Harness::new();
        let corpus = vec![keyed("bad", "dragon(").with_regex_keys()];
        let outcome = harness.scan("a dragon appears", &corpus, &ActivationLedger::new(), 1);
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_scenario_sticky_carries_two_turns() {
        // Matched on turn 1 with sticky 2: active turns 2 and 3 purely on
        // the grant (2 then 1 remaining at scan time), gone on turn 4.
        let harness = Harness::new();
        let corpus = vec![keyed("d", "dragon").with_sticky(2)];
        let mut ledger = ActivationLedger::new();

        let outcome = harness.scan("a dragon lands", &corpus, &ledger, 1);
        assert_eq!(uids(&outcome), vec!["d"]);
        ledger = outcome.ledger;

        for turn in [2, 3] {
            let outcome = harness.scan("quiet weather talk", &corpus, &ledger, turn);
            assert_eq!(uids(&outcome), vec!["d"], "turn {turn}");
            ledger = outcome.ledger;
        }

        let outcome = harness.scan("quiet weather talk", &corpus, &ledger, 4);
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_sticky_decays_by_one_per_untouched_turn() {
        let harness = Harness::new();
        let corpus = vec![keyed("d", "dragon").with_sticky(3)];
        let mut ledger = ActivationLedger::new();

        ledger = harness.scan("a dragon lands", &corpus, &ledger, 1).ledger;
        assert_eq!(ledger.sticky_remaining("d"), 3);

        ledger = harness.scan("nothing", &corpus, &ledger, 2).ledger;
        assert_eq!(ledger.sticky_remaining("d"), 2);

        ledger = harness.scan("nothing", &corpus, &ledger, 3).ledger;
        assert_eq!(ledger.sticky_remaining("d"), 1);
    }

    #[test]
    fn test_cooldown_blocks_rematch_then_recovers() {
        let harness = Harness::new();
        let corpus = vec![keyed("d", "dragon").with_cooldown(2)];
        let mut ledger = ActivationLedger::new();

        ledger = harness.scan("a dragon lands", &corpus, &ledger, 1).ledger;
        assert_eq!(ledger.cooldown_remaining("d"), 2);

        // Still matched by text, but the cooldown gate holds; a blocked
        // match is not a touch, so the counter keeps draining.
        let outcome = harness.scan("the dragon roars", &corpus, &ledger, 2);
        assert!(outcome.active.is_empty());
        ledger = outcome.ledger;

        let outcome = harness.scan("the dragon roars", &corpus, &ledger, 3);
        assert!(outcome.active.is_empty());
        ledger = outcome.ledger;

        let outcome = harness.scan("the dragon roars", &corpus, &ledger, 4);
        assert_eq!(uids(&outcome), vec!["d"]);
    }

    #[test]
    fn test_dormancy_boundary_inclusive() {
        let harness = Harness::new();
        let corpus = vec![keyed("link", "dragon").with_origin(EntryOrigin::LiveLink)];

        let mut ledger = ActivationLedger::new();
        ledger.touch("link", 10, 0, 0);

        // Age 10 is exactly the window: still eligible.
        let outcome = harness.scan("a dragon", &corpus, &ledger, 20);
        assert_eq!(uids(&outcome), vec!["link"]);

        // Age 11 is past it.
        let mut ledger = ActivationLedger::new();
        ledger.touch("link", 10, 0, 0);
        let outcome = harness.scan("a dragon", &corpus, &ledger, 21);
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_dormancy_default_to_fresh() {
        // A Live-Link entry that has never activated is not born dormant,
        // however large the turn counter.
        let harness = Harness::new();
        let corpus = vec![keyed("link", "dragon").with_origin(EntryOrigin::LiveLink)];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 500);
        assert_eq!(uids(&outcome), vec!["link"]);
    }

    #[test]
    fn test_rematch_while_sticky_keeps_entry_fresh() {
        // A Live-Link entry mentioned every turn is touched every turn,
        // even though the sticky grant already carries it, so its
        // dormancy age never grows past one and its counters keep
        // refreshing. Well past the dormancy window it is still active.
        let harness = Harness::new();
        let corpus = vec![keyed("link", "dragon")
            .with_origin(EntryOrigin::LiveLink)
            .with_sticky(2)];
        let mut ledger = ActivationLedger::new();

        for turn in 1..=15 {
            let outcome = harness.scan("the dragon circles", &corpus, &ledger, turn);
            assert_eq!(uids(&outcome), vec!["link"], "turn {turn}");
            ledger = outcome.ledger;
        }

        assert_eq!(ledger.age("link", 15), 0);
        assert_eq!(ledger.sticky_remaining("link"), 2);
    }

    #[test]
    fn test_dormancy_spares_authored_entries() {
        let harness = Harness::new();
        let corpus = vec![keyed("auth", "dragon")];
        let mut ledger = ActivationLedger::new();
        ledger.touch("auth", 1, 0, 0);
        let outcome = harness.scan("a dragon", &corpus, &ledger, 100);
        assert_eq!(uids(&outcome), vec!["auth"]);
    }

    #[test]
    fn test_external_selection_bypasses_cooldown_and_dormancy() {
        let mut harness = Harness::new();
        harness.externally_selected.insert("link".to_string());
        let corpus = vec![keyed("link", "dragon")
            .with_origin(EntryOrigin::LiveLink)
            .with_cooldown(5)];

        let mut ledger = ActivationLedger::new();
        ledger.touch("link", 1, 0, 5);
        // Dormant by age and on cooldown; external selection wins anyway,
        // with no text trigger at all.
        let outcome = harness.scan("nothing relevant", &corpus, &ledger, 50);
        assert_eq!(uids(&outcome), vec!["link"]);
    }

    #[test]
    fn test_external_sticky_override() {
        let mut harness = Harness::new();
        harness.externally_selected.insert("e".to_string());
        harness.external_sticky_override = Some(4);
        let corpus = vec![keyed("e", "dragon").with_sticky(1)];

        let outcome = harness.scan("nothing", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(outcome.ledger.sticky_remaining("e"), 4);

        // The override only reaches externally selected entries.
        let mut plain = Harness::new();
        plain.external_sticky_override = Some(4);
        let outcome = plain.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(outcome.ledger.sticky_remaining("e"), 1);
    }

    #[test]
    fn test_bypass_text_matching() {
        let mut harness = Harness::new();
        harness.bypass_text_matching = true;
        let corpus = vec![
            keyed("k", "dragon"),
            KnowledgeEntry::new("always").with_uid("c").constant(),
        ];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["c"]);
    }

    #[test]
    fn test_recursive_propagation_depth_limited() {
        // a matches the turn text; b triggers off a's content, c off b's.
        // d would trigger off c's content but the default two extra passes
        // are exhausted by then.
        let harness = Harness::new();
        let corpus = vec![
            KnowledgeEntry::new("the amulet glows").with_uid("a").with_keys(["dragon"]),
            KnowledgeEntry::new("the crypt opens").with_uid("b").with_keys(["amulet"]),
            KnowledgeEntry::new("the lich wakes").with_uid("c").with_keys(["crypt"]),
            KnowledgeEntry::new("too deep").with_uid("d").with_keys(["lich"]),
        ];

        let outcome = harness.scan("a dragon lands", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_recursion_skips_constant_content() {
        // Constant entries activate but their content does not cascade.
        let harness = Harness::new();
        let corpus = vec![
            KnowledgeEntry::new("the amulet glows").with_uid("c").constant(),
            keyed("b", "amulet"),
        ];
        let outcome = harness.scan("quiet talk", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["c"]);
    }

    #[test]
    fn test_output_sorted_by_insertion_order() {
        let harness = Harness::new();
        let corpus = vec![
            keyed("late", "dragon").with_insertion_order(50),
            keyed("early", "dragon").with_insertion_order(-10),
            keyed("mid", "dragon").with_insertion_order(0),
        ];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_config_from_toml() {
        let config = ActivationConfig::from_toml_str("recursion_passes = 0\n").unwrap();
        assert_eq!(config.recursion_passes, 0);
        assert_eq!(config.dormancy_window, 10);
    }

    #[test]
    fn test_zero_recursion_passes_still_scans_once() {
        let harness = Harness {
            engine: ActivationEngine::new(ActivationConfig {
                recursion_passes: 0,
                ..Default::default()
            }),
            ..Harness::new()
        };
        let corpus = vec![keyed("k", "dragon"), keyed("chained", "content of k")];
        let outcome = harness.scan("a dragon", &corpus, &ActivationLedger::new(), 1);
        assert_eq!(uids(&outcome), vec!["k"]);
    }
}
