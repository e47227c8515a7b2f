use retrace_primitives::SignatureError;
use retrace_state::StateError;

/// Errors raised while applying a message.
///
/// These are engine errors, distinct from a reverted execution: a revert is a
/// successful application whose result is marked failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvmError {
    /// The message's nonce is below the sender's account nonce.
    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow {
        /// The sender's account nonce.
        expected: u64,
        /// The message's nonce.
        got: u64,
    },
    /// The message's nonce is above the sender's account nonce.
    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh {
        /// The sender's account nonce.
        expected: u64,
        /// The message's nonce.
        got: u64,
    },
    /// The sender cannot cover `gas_limit * gas_price + value`.
    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,
    /// The fee cap is below the block's base fee.
    #[error("max fee per gas less than block base fee")]
    FeeCapTooLow,
    /// The gas limit does not cover the intrinsic cost of the message.
    #[error("intrinsic gas too low")]
    IntrinsicGasTooLow,
    /// The run was aborted by a tracer stop.
    #[error("{reason}")]
    Aborted {
        /// The stop reason passed to the tracer.
        reason: String,
    },
    /// Reading or writing the state snapshot failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors raised while replaying a whole block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockExecutionError {
    /// Applying a transaction of the block failed.
    #[error("applying transaction {index} failed: {source}")]
    Transaction {
        /// In-block index of the failing transaction.
        index: usize,
        /// The underlying engine error.
        #[source]
        source: EvmError,
    },
    /// A transaction's sender could not be recovered.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}
