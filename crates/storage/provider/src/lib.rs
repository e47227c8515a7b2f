#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Collaborator interfaces the trace engine consumes: the block store, the
//! chain spec lookup, the state factory and the consensus seam, plus an
//! in-memory implementation for tests.

mod consensus;
mod error;
mod traits;

pub use consensus::{Consensus, ConsensusError, NoopConsensus};
pub use error::{ProviderError, ProviderResult};
pub use traits::{
    BlockReader, ChainSpecProvider, HeaderProvider, StateProviderFactory, TransactionMeta,
};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
