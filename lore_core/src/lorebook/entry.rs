//! Knowledge entry definitions - the units of lore shown to the generator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrigin {
    /// Authored lore. User-edited, immutable except by explicit edit.
    Authored,
    /// Derived from one database row and regenerated wholesale whenever
    /// that row changes. Subject to dormancy.
    LiveLink,
}

/// A discrete, independently activatable unit of lore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Stable identifier. For Live-Link entries this is a deterministic
    /// function of the source row, so activation state survives
    /// regeneration.
    pub uid: String,

    /// Trigger phrases. Each is a boolean expression: tokens joined by
    /// `&` must all be present, a token prefixed `!` must be absent.
    pub keys: Vec<String>,

    /// Optional second AND-gate: when non-empty, a primary hit also needs
    /// one of these to hit.
    pub secondary_keys: Vec<String>,

    pub content: String,

    /// Always active while enabled.
    pub constant: bool,

    /// Card default; overridable per session.
    pub enabled: bool,

    /// Treat keys as user regex patterns instead of substring expressions.
    pub use_regex: bool,

    /// Final ordering of activated entries.
    pub insertion_order: i32,

    /// Stay active this many extra turns after a trigger.
    pub sticky: u32,

    /// Ineligible for re-trigger this many turns after a trigger.
    pub cooldown: u32,

    pub origin: EntryOrigin,
}

impl KnowledgeEntry {
    /// Create a new authored entry with a freshly minted uid.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            keys: Vec::new(),
            secondary_keys: Vec::new(),
            content: content.into(),
            constant: false,
            enabled: true,
            use_regex: false,
            insertion_order: 0,
            sticky: 0,
            cooldown: 0,
            origin: EntryOrigin::Authored,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secondary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the entry always-active.
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Disable the entry by card default.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Treat keys as regex patterns.
    pub fn with_regex_keys(mut self) -> Self {
        self.use_regex = true;
        self
    }

    pub fn with_insertion_order(mut self, order: i32) -> Self {
        self.insertion_order = order;
        self
    }

    pub fn with_sticky(mut self, turns: u32) -> Self {
        self.sticky = turns;
        self
    }

    pub fn with_cooldown(mut self, turns: u32) -> Self {
        self.cooldown = turns;
        self
    }

    pub fn with_origin(mut self, origin: EntryOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_live_link(&self) -> bool {
        self.origin == EntryOrigin::LiveLink
    }
}
