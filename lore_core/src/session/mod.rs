//! Session facade - wires the per-turn pipeline together.
//!
//! One turn runs: scan → view build → (external generation call, owned by
//! the caller) → parse → apply → Live-Link sync. The pipeline is split in
//! two so that suspension point stays outside this crate:
//!
//! - [`SessionCore::prepare_turn`] is pure: it computes the activation set
//!   and the view without committing anything. A cancelled or failed
//!   generation call simply drops the [`PreparedTurn`], leaving the
//!   session bit-for-bit as it was, and the same prepared value can serve
//!   a retry.
//! - [`SessionCore::commit_turn`] applies the reply and swaps the new
//!   database in whole; no reader observes a partially-applied batch.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use chat_ledger::{ChangeRecord, StructuredDatabase};

use crate::activation::{ActivationEngine, ActivationLedger, ScanRequest};
use crate::commands::parse_commands;
use crate::livelink::sync_entries;
use crate::lorebook::KnowledgeEntry;
use crate::view::{build_view, DatabaseView};

/// Per-turn activation inputs owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct TurnInputs {
    /// Per-session enable/disable overrides by uid.
    pub manual_overrides: HashMap<String, bool>,

    /// Entries forced active.
    pub pinned: HashSet<String>,

    /// Entries chosen by a delegated relevance-ranking step.
    pub externally_selected: HashSet<String>,

    pub bypass_text_matching: bool,

    /// Sticky grant for externally selected entries.
    pub external_sticky_override: Option<u32>,
}

/// A prepared-but-uncommitted turn.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    /// Entries activated for this turn, in insertion order.
    pub active: Vec<KnowledgeEntry>,

    /// The filtered view, its hybrid text, and its row snapshot.
    pub view: DatabaseView,

    ledger: ActivationLedger,
}

/// Summary of one committed turn.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    /// Human-readable notification lines.
    pub notices: Vec<String>,

    /// Typed audit trail of the applied batch.
    pub log: Vec<ChangeRecord>,

    pub commands_applied: usize,
    pub commands_skipped: usize,

    /// False when the reply carried no applicable commands. A turn with
    /// no state change is legitimate, not an error.
    pub state_changed: bool,
}

/// Deep copy of everything a rewind must restore.
///
/// One of these rides along with every committed turn record, so memory
/// stays a small constant multiple of database size times transcript
/// length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub database: StructuredDatabase,
    pub ledger: ActivationLedger,
    pub turn: u64,
}

/// The retained-state core of one chat session.
///
/// Owns the database and the activation ledger exclusively; sessions share
/// nothing, so there is no locking anywhere in this crate.
#[derive(Debug)]
pub struct SessionCore {
    engine: ActivationEngine,
    database: StructuredDatabase,
    ledger: ActivationLedger,
    authored: Vec<KnowledgeEntry>,
    linked: Vec<KnowledgeEntry>,
    turn: u64,
}

impl SessionCore {
    pub fn new(database: StructuredDatabase, authored: Vec<KnowledgeEntry>) -> Self {
        let linked = sync_entries(&database);
        Self {
            engine: ActivationEngine::with_defaults(),
            database,
            ledger: ActivationLedger::new(),
            authored,
            linked,
            turn: 0,
        }
    }

    pub fn with_engine(mut self, engine: ActivationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn database(&self) -> &StructuredDatabase {
        &self.database
    }

    pub fn ledger(&self) -> &ActivationLedger {
        &self.ledger
    }

    /// Committed turns so far.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// The corpus the next scan will read: authored lore plus the current
    /// Live-Link generation.
    pub fn corpus(&self) -> Vec<KnowledgeEntry> {
        self.authored.iter().chain(self.linked.iter()).cloned().collect()
    }

    /// Replace the authored lorebook (an explicit user edit).
    pub fn replace_authored(&mut self, entries: Vec<KnowledgeEntry>) {
        self.authored = entries;
    }

    /// Compute the activation set and view for the upcoming turn without
    /// committing anything.
    pub fn prepare_turn(&self, turn_text: &str, inputs: &TurnInputs) -> PreparedTurn {
        let corpus = self.corpus();
        let outcome = self.engine.scan(ScanRequest {
            turn_text,
            corpus: &corpus,
            ledger: &self.ledger,
            manual_overrides: &inputs.manual_overrides,
            pinned: &inputs.pinned,
            externally_selected: &inputs.externally_selected,
            bypass_text_matching: inputs.bypass_text_matching,
            current_turn: self.turn + 1,
            external_sticky_override: inputs.external_sticky_override,
        });
        let view = build_view(&self.database, &outcome.active);

        PreparedTurn {
            active: outcome.active,
            view,
            ledger: outcome.ledger,
        }
    }

    /// Commit a generation reply against the snapshot it was produced
    /// from, swapping in the new database, ledger, and Live-Link corpus.
    pub fn commit_turn(&mut self, prepared: PreparedTurn, model_output: &str) -> TurnSummary {
        let parsed = parse_commands(model_output, &prepared.view.snapshot);
        if parsed.is_empty() {
            debug!(block_found = parsed.block_found, "no state change this turn");
        }
        let outcome = self.database.apply(&parsed.commands);
        let commands_applied = outcome.applied();
        let commands_skipped = outcome.skipped() + parsed.skipped as usize;

        self.database = outcome.database;
        self.ledger = prepared.ledger;
        self.turn += 1;
        self.linked = sync_entries(&self.database);

        TurnSummary {
            notices: outcome.notices,
            log: outcome.log,
            commands_applied,
            commands_skipped,
            state_changed: commands_applied > 0,
        }
    }

    /// Snapshot the session state for a turn record.
    pub fn checkpoint(&self) -> SessionCheckpoint {
        SessionCheckpoint {
            database: self.database.clone(),
            ledger: self.ledger.clone(),
            turn: self.turn,
        }
    }

    /// Rewind to an earlier turn record.
    pub fn restore(&mut self, checkpoint: SessionCheckpoint) {
        self.database = checkpoint.database;
        self.ledger = checkpoint.ledger;
        self.turn = checkpoint.turn;
        self.linked = sync_entries(&self.database);
    }
}
