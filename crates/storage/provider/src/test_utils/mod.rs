//! In-memory chain fixtures: a mock provider plus a builder that produces a
//! real executed chain with selectively retained historical state.

use crate::{
    BlockReader, ChainSpecProvider, HeaderProvider, ProviderResult, StateProviderFactory,
    TransactionMeta,
};
use parking_lot::Mutex;
use retrace_evm::execute_block;
use retrace_primitives::{
    public_key_to_address, sign_message, Address, Block, BlockHash, BlockNumber, Bytes, ChainSpec,
    Header, SealedBlock, SealedHeader, Transaction, TransactionSigned, TxHash, TxKind, B256, U256,
};
use retrace_state::{StateDb, TrieDb};
use secp256k1::SECP256K1;
use std::{collections::HashMap, sync::Arc};

/// The base fee every fixture block carries.
pub const BASE_FEE: u64 = 7;
/// The fee recipient of every fixture block.
pub const COINBASE: Address = Address::repeat_byte(0xcb);

/// A keypair-backed account for signing fixture transactions.
#[derive(Debug, Clone, Copy)]
pub struct TestAccount {
    /// The secp256k1 secret key.
    pub secret: B256,
    /// The address recovered from the public key.
    pub address: Address,
}

impl TestAccount {
    /// Generates a fresh random account.
    pub fn random() -> Self {
        let (secret, public) = SECP256K1.generate_keypair(&mut secp256k1::rand::thread_rng());
        Self {
            secret: B256::from_slice(&secret.secret_bytes()),
            address: public_key_to_address(public),
        }
    }
}

/// An in-memory implementation of the storage collaborator interfaces.
#[derive(Clone, Debug)]
pub struct MockChainProvider {
    blocks: Arc<Mutex<HashMap<BlockHash, SealedBlock>>>,
    canonical: Arc<Mutex<HashMap<BlockNumber, BlockHash>>>,
    transactions: Arc<Mutex<HashMap<TxHash, TransactionMeta>>>,
    chain_spec: Arc<ChainSpec>,
    trie: Arc<TrieDb>,
}

impl MockChainProvider {
    /// Creates an empty provider over the given chain spec.
    pub fn new(chain_spec: ChainSpec) -> Self {
        Self {
            blocks: Default::default(),
            canonical: Default::default(),
            transactions: Default::default(),
            chain_spec: Arc::new(chain_spec),
            trie: Arc::new(TrieDb::new()),
        }
    }

    /// Adds a block to the store and indexes its transactions.
    pub fn add_block(&self, block: SealedBlock) {
        let block_hash = block.hash();
        self.canonical.lock().insert(block.number, block_hash);
        let mut transactions = self.transactions.lock();
        for (index, tx) in block.body.iter().enumerate() {
            let tx_hash = tx.hash();
            transactions.insert(
                tx_hash,
                TransactionMeta { tx_hash, index, block_hash, block_number: block.number },
            );
        }
        drop(transactions);
        self.blocks.lock().insert(block_hash, block);
    }
}

impl HeaderProvider for MockChainProvider {
    fn header(&self, hash: BlockHash) -> ProviderResult<Option<Header>> {
        Ok(self.blocks.lock().get(&hash).map(|block| (*block.header).clone()))
    }

    fn header_by_number(&self, number: BlockNumber) -> ProviderResult<Option<Header>> {
        let hash = self.canonical.lock().get(&number).copied();
        match hash {
            Some(hash) => self.header(hash),
            None => Ok(None),
        }
    }
}

impl BlockReader for MockChainProvider {
    fn block_by_hash(&self, hash: BlockHash) -> ProviderResult<Option<SealedBlock>> {
        Ok(self.blocks.lock().get(&hash).cloned())
    }

    fn block_by_number(&self, number: BlockNumber) -> ProviderResult<Option<SealedBlock>> {
        let hash = self.canonical.lock().get(&number).copied();
        match hash {
            Some(hash) => self.block_by_hash(hash),
            None => Ok(None),
        }
    }

    fn best_block_number(&self) -> ProviderResult<BlockNumber> {
        Ok(self.canonical.lock().keys().max().copied().unwrap_or_default())
    }

    fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> ProviderResult<Option<(TransactionSigned, TransactionMeta)>> {
        let meta = self.transactions.lock().get(&hash).copied();
        let Some(meta) = meta else { return Ok(None) };
        let block = self.blocks.lock().get(&meta.block_hash).cloned();
        Ok(block.and_then(|block| block.body.get(meta.index).cloned()).map(|tx| (tx, meta)))
    }
}

impl StateProviderFactory for MockChainProvider {
    fn state_at(&self, root: B256) -> ProviderResult<StateDb> {
        Ok(StateDb::open(self.trie.clone(), root)?)
    }

    fn trie_db(&self) -> Arc<TrieDb> {
        self.trie.clone()
    }
}

impl ChainSpecProvider for MockChainProvider {
    fn chain_spec(&self) -> Arc<ChainSpec> {
        self.chain_spec.clone()
    }
}

/// Builds a chain by actually executing signed transactions block by block.
///
/// The genesis state is always persisted; later states are only persisted on
/// request, so regeneration paths see realistically pruned history.
#[derive(Debug)]
pub struct ChainBuilder {
    provider: MockChainProvider,
    state: StateDb,
    nonces: HashMap<Address, u64>,
    tip: SealedHeader,
}

impl ChainBuilder {
    /// Creates the genesis block holding the given balances.
    pub fn new(chain_spec: ChainSpec, balances: &[(&TestAccount, u64)]) -> Self {
        let provider = MockChainProvider::new(chain_spec);
        let trie = provider.trie_db();

        let mut state = StateDb::empty(trie.clone());
        for (account, balance) in balances {
            state
                .add_balance(account.address, U256::from(*balance))
                .expect("fresh state is resolvable");
        }
        let root = state.commit().expect("genesis state commits");
        state.reset(root).expect("committed root is resolvable");
        trie.commit(root);

        let genesis = Header {
            parent_hash: B256::ZERO,
            state_root: root,
            beneficiary: COINBASE,
            number: 0,
            gas_limit: 30_000_000,
            base_fee_per_gas: BASE_FEE,
            timestamp: 0,
        };
        let sealed = Block { header: genesis, body: Vec::new() }.seal_slow();
        provider.add_block(sealed.clone());

        Self { provider, state, nonces: HashMap::new(), tip: sealed.header }
    }

    /// Signs a call transaction from `account`, tracking its nonce.
    pub fn tx(
        &mut self,
        account: &TestAccount,
        to: Address,
        value: u64,
        input: Bytes,
    ) -> TransactionSigned {
        let nonce = self.nonces.entry(account.address).or_default();
        let transaction = Transaction {
            chain_id: self.provider.chain_spec.chain_id,
            nonce: *nonce,
            gas_limit: 200_000,
            max_fee_per_gas: BASE_FEE + 10,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(to),
            value: U256::from(value),
            input,
            access_list: Vec::new(),
        };
        *nonce += 1;
        let signature = sign_message(account.secret, transaction.signature_hash())
            .expect("test secret is a valid key");
        TransactionSigned { transaction, signature }
    }

    /// Executes the transactions on top of the tip, sealing and storing the
    /// next canonical block.
    pub fn add_block(&mut self, txs: Vec<TransactionSigned>) -> SealedBlock {
        let mut header = Header {
            parent_hash: self.tip.hash(),
            state_root: B256::ZERO,
            beneficiary: COINBASE,
            number: self.tip.number + 1,
            gas_limit: 30_000_000,
            base_fee_per_gas: BASE_FEE,
            timestamp: self.tip.timestamp + 12,
        };

        let provisional = Block { header: header.clone(), body: txs.clone() }.seal_slow();
        execute_block(&mut self.state, &provisional, &self.provider.chain_spec)
            .expect("fixture transactions execute");
        let root = self.state.commit().expect("fixture state commits");
        self.state.reset(root).expect("committed root is resolvable");

        header.state_root = root;
        let sealed = Block { header, body: txs }.seal_slow();
        self.provider.add_block(sealed.clone());
        self.tip = sealed.header.clone();
        sealed
    }

    /// Persists the state of the tip block, retaining it across pruning.
    pub fn persist_latest(&self) {
        self.provider.trie_db().commit(self.state.root());
    }

    /// The tip header.
    pub const fn tip(&self) -> &SealedHeader {
        &self.tip
    }

    /// A handle to the underlying provider.
    pub fn provider(&self) -> MockChainProvider {
        self.provider.clone()
    }

    /// Finishes building. The tip snapshot is dropped, so any state that was
    /// not persisted becomes unavailable, exactly like pruned history.
    pub fn finish(self) -> MockChainProvider {
        self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_evm::test_utils as programs;
    use retrace_state::StateError;

    #[test]
    fn builder_executes_and_indexes() {
        let alice = TestAccount::random();
        let bob = TestAccount::random();
        let mut builder =
            ChainBuilder::new(ChainSpec::default(), &[(&alice, 1_000_000_000)]);

        let tx = builder.tx(&alice, bob.address, 1_000, Bytes::new());
        let tx_hash = tx.hash();
        let block = builder.add_block(vec![tx]);
        builder.persist_latest();
        let provider = builder.finish();

        assert_eq!(block.number, 1);
        let (found, meta) = provider.transaction_by_hash(tx_hash).unwrap().unwrap();
        assert_eq!(found.hash(), tx_hash);
        assert_eq!(meta.block_number, 1);
        assert_eq!(meta.index, 0);

        // the persisted tip state resolves and reflects execution
        let mut state = provider.state_at(block.state_root).unwrap();
        assert_eq!(state.balance(bob.address).unwrap(), U256::from(1_000u64));
        assert!(state.balance(COINBASE).unwrap() > U256::ZERO);
    }

    #[test]
    fn unpersisted_states_are_pruned() {
        let alice = TestAccount::random();
        let mut builder =
            ChainBuilder::new(ChainSpec::default(), &[(&alice, 1_000_000_000)]);

        let to = Address::repeat_byte(0x22);
        let tx = builder.tx(&alice, to, 5, programs::sstore_program(1, 2));
        let first = builder.add_block(vec![tx]);
        let tx = builder.tx(&alice, to, 5, Bytes::new());
        let second = builder.add_block(vec![tx]);
        let provider = builder.finish();

        // genesis is retained, intermediate and tip states were pruned
        let genesis = provider.block_by_number(0).unwrap().unwrap();
        assert!(provider.state_at(genesis.state_root).is_ok());
        for block in [first, second] {
            let err = provider.state_at(block.state_root).unwrap_err();
            assert!(matches!(
                err,
                crate::ProviderError::State(StateError::MissingNode(_))
            ));
        }
    }

    #[test]
    fn replaying_a_block_reproduces_its_state_root() {
        let alice = TestAccount::random();
        let mut builder =
            ChainBuilder::new(ChainSpec::default(), &[(&alice, 1_000_000_000)]);
        let tx = builder.tx(&alice, Address::repeat_byte(9), 123, Bytes::new());
        let block = builder.add_block(vec![tx]);
        let provider = builder.finish();

        let genesis = provider.block_by_number(0).unwrap().unwrap();
        let mut state = provider.state_at(genesis.state_root).unwrap();
        execute_block(&mut state, &block, &provider.chain_spec()).unwrap();
        let root = state.commit().unwrap();
        assert_eq!(root, block.state_root);
    }
}
