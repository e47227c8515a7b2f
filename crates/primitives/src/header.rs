use alloy_primitives::{keccak256, Address, BlockHash, BlockNumber, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Block header.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// The keccak hash of the parent block's header.
    pub parent_hash: B256,
    /// The root of the account state after executing this block.
    pub state_root: B256,
    /// The address that receives the transaction fees of this block.
    pub beneficiary: Address,
    /// The height of this block.
    pub number: BlockNumber,
    /// The maximum amount of gas the block's transactions may consume.
    pub gas_limit: u64,
    /// The protocol base fee per gas unit, burned on execution.
    pub base_fee_per_gas: u64,
    /// The unix timestamp at which this block was sealed.
    pub timestamp: u64,
}

impl Header {
    /// Computes the hash of the header's RLP encoding.
    ///
    /// This is a full keccak pass over the encoding, hence `slow`.
    pub fn hash_slow(&self) -> BlockHash {
        keccak256(alloy_rlp::encode(self))
    }

    /// Seals the header with its computed hash.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        SealedHeader { header: self, hash }
    }
}

/// A [`Header`] together with its memoized hash.
///
/// The hash is only ever derived from the header, so the inner fields are not
/// publicly mutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedHeader {
    header: Header,
    hash: BlockHash,
}

impl SealedHeader {
    /// Assembles a sealed header from its parts.
    ///
    /// The caller is responsible for `hash` matching the header.
    pub const fn new(header: Header, hash: BlockHash) -> Self {
        Self { header, hash }
    }

    /// Returns the header's hash.
    pub const fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Returns the header, dropping the seal.
    pub fn unseal(self) -> Header {
        self.header
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}
