use retrace_state::StateError;

/// Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by the storage collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Resolving state from the node store failed. A missing root means the
    /// historical state was pruned and has to be regenerated.
    #[error(transparent)]
    State(#[from] StateError),
}

impl ProviderError {
    /// Returns `true` when the error means the requested state root is not
    /// resolvable, the signal to fall back to regeneration.
    pub const fn is_state_unavailable(&self) -> bool {
        matches!(self, Self::State(StateError::MissingNode(_)))
    }
}
