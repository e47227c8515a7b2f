use retrace_primitives::{Address, BlockHash, ChainSpec, SealedHeader};
use std::sync::Arc;

/// Chain-level execution configuration.
#[derive(Clone, Debug)]
pub struct CfgEnv {
    /// The chain spec gating fork predicates. Shared and immutable; fork
    /// overrides clone the inner spec before mutation.
    pub chain_spec: Arc<ChainSpec>,
    /// Disables the fee-cap-versus-base-fee validity check. Tracing runs set
    /// this so historical transactions replay regardless of the current base
    /// fee rules.
    pub no_base_fee: bool,
}

impl CfgEnv {
    /// Creates a config over the given chain spec.
    pub const fn new(chain_spec: Arc<ChainSpec>) -> Self {
        Self { chain_spec, no_base_fee: false }
    }

    /// Disables base-fee enforcement.
    pub fn with_no_base_fee(mut self) -> Self {
        self.no_base_fee = true;
        self
    }
}

/// The block-level execution environment.
#[derive(Clone, Debug, Default)]
pub struct BlockEnv {
    /// Height of the enclosing block.
    pub number: u64,
    /// The fee recipient of the enclosing block.
    pub beneficiary: Address,
    /// Timestamp of the enclosing block.
    pub timestamp: u64,
    /// Gas limit of the enclosing block.
    pub gas_limit: u64,
    /// Base fee of the enclosing block.
    pub base_fee: u64,
    /// Hash of the enclosing block.
    pub hash: BlockHash,
}

impl BlockEnv {
    /// Builds the environment from a sealed header.
    pub fn new(header: &SealedHeader) -> Self {
        Self {
            number: header.number,
            beneficiary: header.beneficiary,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            base_fee: header.base_fee_per_gas,
            hash: header.hash(),
        }
    }
}
