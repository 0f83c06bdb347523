//! # Lore Core (The Loom)
//!
//! The retained-state core of an AI-driven roleplay chat. Each turn it
//! decides which discrete pieces of long-term lore are relevant enough to
//! show the generator, and it turns the generator's free-text reply back
//! into durable, structured state changes against the [`chat_ledger`]
//! database.
//!
//! ## Core Components
//!
//! - **lorebook**: knowledge entries and their trigger-key expressions
//! - **activation**: the per-turn activation engine and its decay ledger
//! - **view**: filtered database views, hybrid text, and row snapshots
//! - **commands**: parsing generator output into typed mutations
//! - **livelink**: regenerating row-derived entries after every change
//! - **session**: the per-session facade wiring one turn end to end
//!
//! ## Design Philosophy
//!
//! - **Identity over position**: rows are addressed by permanent ids; a
//!   view position lives exactly one generation cycle
//! - **Nothing fatal**: untrusted generator output can at worst skip a
//!   turn's update, never corrupt the database
//! - **Explicit state**: decay counters thread through `scan` as values,
//!   never hidden in globals

pub mod activation;
pub mod commands;
pub mod livelink;
pub mod lorebook;
pub mod session;
pub mod view;

pub use activation::*;
pub use commands::*;
pub use livelink::*;
pub use lorebook::*;
pub use session::*;
pub use view::*;
