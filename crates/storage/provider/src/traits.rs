use crate::ProviderResult;
use retrace_primitives::{
    BlockHash, BlockNumber, BlockNumberOrTag, ChainSpec, Header, SealedBlock, TransactionSigned,
    TxHash, B256,
};
use retrace_state::{StateDb, TrieDb};
use std::sync::Arc;

/// Header access by hash or number.
pub trait HeaderProvider: Send + Sync {
    /// The header with the given hash.
    fn header(&self, hash: BlockHash) -> ProviderResult<Option<Header>>;

    /// The canonical header at the given height.
    fn header_by_number(&self, number: BlockNumber) -> ProviderResult<Option<Header>>;
}

/// Block and transaction access.
pub trait BlockReader: HeaderProvider {
    /// The block with the given hash.
    fn block_by_hash(&self, hash: BlockHash) -> ProviderResult<Option<SealedBlock>>;

    /// The canonical block at the given height.
    fn block_by_number(&self, number: BlockNumber) -> ProviderResult<Option<SealedBlock>>;

    /// The height of the best known block.
    fn best_block_number(&self) -> ProviderResult<BlockNumber>;

    /// Resolves `latest`/`pending`/`earliest` sentinels against the
    /// canonical chain. `pending` resolves to the best block: the engine
    /// does not build blocks.
    fn block_by_number_or_tag(&self, id: BlockNumberOrTag) -> ProviderResult<Option<SealedBlock>> {
        match id {
            BlockNumberOrTag::Latest | BlockNumberOrTag::Pending => {
                self.block_by_number(self.best_block_number()?)
            }
            BlockNumberOrTag::Earliest => self.block_by_number(0),
            BlockNumberOrTag::Number(number) => self.block_by_number(number),
        }
    }

    /// The transaction with the given hash, together with its inclusion
    /// metadata.
    fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> ProviderResult<Option<(TransactionSigned, TransactionMeta)>>;
}

/// Where a transaction is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMeta {
    /// The transaction hash.
    pub tx_hash: TxHash,
    /// Position within the enclosing block.
    pub index: usize,
    /// Hash of the enclosing block.
    pub block_hash: BlockHash,
    /// Height of the enclosing block.
    pub block_number: BlockNumber,
}

/// Opens state snapshots against the shared trie-node store.
pub trait StateProviderFactory: Send + Sync {
    /// A snapshot rooted at the given state root. Fails with a missing-node
    /// error when the root was pruned.
    fn state_at(&self, root: B256) -> ProviderResult<StateDb>;

    /// The shared trie-node store.
    fn trie_db(&self) -> Arc<TrieDb>;
}

/// Chain spec lookup.
pub trait ChainSpecProvider: Send + Sync {
    /// The chain spec of the canonical chain.
    fn chain_spec(&self) -> Arc<ChainSpec>;
}
