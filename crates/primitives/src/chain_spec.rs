use serde::{Deserialize, Serialize};

/// The chain configuration: chain id plus fork activation heights.
///
/// The engine treats a shared spec as immutable; trace-level fork overrides
/// deep-copy it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// The chain id, part of every transaction's signed payload.
    pub chain_id: u64,
    /// Height at which empty accounts are deleted on finalise.
    pub spurious_dragon_block: Option<u64>,
    /// Height at which cold/warm storage access pricing activates.
    pub berlin_block: Option<u64>,
}

impl ChainSpec {
    /// Returns `true` if the spurious-dragon fork is active at the block.
    pub fn is_spurious_dragon_active_at_block(&self, number: u64) -> bool {
        self.spurious_dragon_block.is_some_and(|fork| fork <= number)
    }

    /// Returns `true` if the berlin fork is active at the block.
    pub fn is_berlin_active_at_block(&self, number: u64) -> bool {
        self.berlin_block.is_some_and(|fork| fork <= number)
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self { chain_id: 1337, spurious_dragon_block: Some(0), berlin_block: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_predicates() {
        let spec = ChainSpec { chain_id: 1, spurious_dragon_block: Some(5), berlin_block: None };
        assert!(!spec.is_spurious_dragon_active_at_block(4));
        assert!(spec.is_spurious_dragon_active_at_block(5));
        assert!(!spec.is_berlin_active_at_block(u64::MAX));

        let spec = ChainSpec::default();
        assert!(spec.is_spurious_dragon_active_at_block(0));
    }
}
