use retrace_primitives::{Address, B256};

/// Errors raised by state snapshots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A trie node required to resolve the state is neither cached nor
    /// persisted. When raised for a root this means the historical state was
    /// pruned and has to be regenerated.
    #[error("missing trie node {0}")]
    MissingNode(B256),
    /// A resolvable trie node failed to decode.
    #[error("malformed trie node {0}")]
    MalformedNode(B256),
    /// A balance subtraction would underflow.
    #[error("insufficient balance for {0}")]
    InsufficientBalance(Address),
}
