//! # Chat Ledger
//!
//! The "Ledger" crate - the single source of truth for a chat session's
//! structured state. It holds the relational-like database (tables, rows,
//! permanent row identities), the typed mutation commands applied against
//! it, and TOML schema loading. This crate does not contain any AI logic.

pub mod database;
pub mod mutation;
pub mod schema;

pub use database::*;
pub use mutation::*;
pub use schema::*;
