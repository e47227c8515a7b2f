#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Account state for the retrace trace engine.
//!
//! Two layers:
//!
//! - [`TrieDb`]: a process-wide, content-addressed store of trie nodes with a
//!   reference-counted in-memory cache. Roots that are pinned stay resident;
//!   a root dereferenced to zero is evicted together with any children no
//!   other root shares.
//! - [`StateDb`]: a mutable snapshot of all accounts rooted at a state root.
//!   A snapshot exclusively owns its change journal while sharing trie nodes
//!   with every other snapshot through the cache. It holds a strong pin on
//!   its root for as long as it (or any copy of it) is alive.

mod db;
mod error;
mod trie;

pub use db::StateDb;
pub use error::StateError;
pub use trie::{TrieDb, TrieGuard};
