//! Error variants of the trace engine.

use crate::result::{internal_rpc_err, invalid_params_rpc_err};
use jsonrpsee::types::ErrorObjectOwned;
use retrace_evm::{tracers::TracerError, BlockExecutionError, EvmError};
use retrace_primitives::SignatureError;
use retrace_provider::{ConsensusError, ProviderError};
use retrace_state::StateError;
use std::fmt;

/// What a [`DebugApiError::NotFound`] failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// The requested block.
    Block,
    /// The parent of the block being traced.
    Parent,
    /// The requested transaction.
    Transaction,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Block => "block",
            Self::Parent => "parent",
            Self::Transaction => "transaction",
        };
        f.write_str(kind)
    }
}

/// Errors that can occur when serving `debug` trace requests.
#[derive(Debug, thiserror::Error)]
pub enum DebugApiError {
    /// A block, parent or transaction could not be resolved.
    #[error("{kind} {id} not found")]
    NotFound {
        /// What was looked up.
        kind: NotFoundKind,
        /// The identifier that failed to resolve.
        id: String,
    },
    /// No usable base state was found within the re-execution limit.
    #[error("required historical state unavailable (reexec={reexec})")]
    HistoricalStateUnavailable {
        /// The exhausted ancestor-walk limit.
        reexec: u64,
    },
    /// Re-executing an ancestor block during state regeneration failed.
    #[error("processing block {number} failed: {source}")]
    ReplayFailed {
        /// Height of the failing block.
        number: u64,
        /// The underlying execution failure.
        #[source]
        source: BlockExecutionError,
    },
    /// Malformed input to `debug_traceBlock`.
    #[error("could not decode block: {0}")]
    DecodeFailed(String),
    /// The execution engine returned an error during a traced call. Distinct
    /// from a revert, which is a successful trace with `failed` set.
    #[error("tracing failed: {0}")]
    TracingFailed(String),
    /// A scripted tracer was stopped by its deadline.
    #[error("execution timeout")]
    ExecutionTimeout,
    /// The transaction is structurally ineligible for tracing.
    #[error("genesis is not traceable")]
    NotTraceable,
    /// `end <= start` on a chain trace.
    #[error("end block (#{end}) needs to come after start block (#{start})")]
    RangeInvalid {
        /// The requested start height.
        start: u64,
        /// The requested end height.
        end: u64,
    },
    /// Chain tracing requires a subscription-capable transport.
    #[error("notifications not supported")]
    NotificationsUnsupported,
    /// An invalid tracer deadline duration string.
    #[error("invalid tracer timeout: {0}")]
    InvalidTimeout(String),
    /// Storage collaborator failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Header rejected by the consensus collaborator.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// State snapshot failure outside message execution.
    #[error(transparent)]
    State(#[from] StateError),
    /// A transaction's sender could not be recovered.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// Scripted tracer construction or result failure.
    #[error(transparent)]
    Tracer(#[from] TracerError),
    /// Other internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DebugApiError {
    /// Maps an execution-engine failure of a traced call.
    ///
    /// A deadline stop surfaces as [`DebugApiError::ExecutionTimeout`];
    /// everything else is a tracing failure.
    pub(crate) fn from_evm(err: EvmError) -> Self {
        match err {
            EvmError::Aborted { reason }
                if reason == retrace_evm::tracers::EXECUTION_TIMEOUT =>
            {
                Self::ExecutionTimeout
            }
            err => Self::TracingFailed(err.to_string()),
        }
    }
}

impl From<DebugApiError> for ErrorObjectOwned {
    fn from(error: DebugApiError) -> Self {
        match error {
            DebugApiError::NotFound { .. } |
            DebugApiError::DecodeFailed(_) |
            DebugApiError::NotTraceable |
            DebugApiError::RangeInvalid { .. } |
            DebugApiError::InvalidTimeout(_) => invalid_params_rpc_err(error.to_string()),
            error => internal_rpc_err(error.to_string()),
        }
    }
}
