// src/storage/mod.rs

//! Durable state: record files and run ledgers.
//!
//! These are the only two writers of persistent state. Everything else in the
//! crate is a function over their contents.

pub mod layout;
pub mod ledger;
pub mod local;

// Re-export for convenience
pub use layout::{Layout, format_id};
pub use ledger::{ErrorEntry, Ledger, LogKind};
pub use local::{RecordStore, read_and_validate};
