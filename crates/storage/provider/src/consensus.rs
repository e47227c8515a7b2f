use retrace_primitives::SealedHeader;

/// The consensus collaborator: validates headers before a block is traced.
pub trait Consensus: Send + Sync {
    /// Validates the header, rejecting blocks that must not be executed.
    fn validate_header(&self, header: &SealedHeader) -> Result<(), ConsensusError>;
}

/// Header rejection raised by the consensus collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// The header violates a consensus rule.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// Why the header was rejected.
        reason: String,
    },
}

/// A consensus implementation accepting every header.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsensus;

impl Consensus for NoopConsensus {
    fn validate_header(&self, _header: &SealedHeader) -> Result<(), ConsensusError> {
        Ok(())
    }
}
