//! Lorebook module - discrete lore entries and their trigger keys.
//!
//! The lorebook holds:
//! - **Entries**: independently activatable units of lore text
//! - **Keys**: boolean trigger expressions (or user regex patterns)
//!   matched against rolling conversational text

mod entry;
mod key;

pub use entry::*;
pub use key::*;
