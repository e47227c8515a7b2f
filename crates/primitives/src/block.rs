use crate::{Header, SealedHeader, TransactionSigned};
use alloy_primitives::BlockHash;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// A block: header plus transaction body.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct Block {
    /// The block's header.
    pub header: Header,
    /// The transactions of the block, in execution order.
    pub body: Vec<TransactionSigned>,
}

impl Block {
    /// Seals the block by computing the header hash.
    pub fn seal_slow(self) -> SealedBlock {
        SealedBlock { header: self.header.seal_slow(), body: self.body }
    }
}

/// A sealed block: the header carries its hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    /// The sealed header.
    pub header: SealedHeader,
    /// The transactions of the block, in execution order.
    pub body: Vec<TransactionSigned>,
}

impl SealedBlock {
    /// Returns the block hash.
    pub const fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Unseals the block again.
    pub fn unseal(self) -> Block {
        Block { header: self.header.unseal(), body: self.body }
    }
}

impl Deref for SealedBlock {
    type Target = SealedHeader;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Signature, Transaction};
    use alloy_primitives::{Bytes, TxKind, U256};
    use alloy_rlp::Decodable;

    #[test]
    fn block_rlp_roundtrip() {
        let tx = TransactionSigned {
            transaction: Transaction {
                chain_id: 1337,
                nonce: 0,
                gas_limit: 100_000,
                max_fee_per_gas: 10,
                max_priority_fee_per_gas: 1,
                to: TxKind::Call(Default::default()),
                value: U256::from(1u64),
                input: Bytes::from_static(b"\x00"),
                access_list: vec![],
            },
            signature: Signature::default(),
        };
        let block = Block { header: Header { number: 3, ..Default::default() }, body: vec![tx] };

        let encoded = alloy_rlp::encode(&block);
        let decoded = Block::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(block, decoded);

        let sealed = block.clone().seal_slow();
        assert_eq!(sealed.hash(), block.header.hash_slow());
        assert_eq!(sealed.number, 3);
    }
}
