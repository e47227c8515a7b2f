use crate::{StateError, TrieDb, TrieGuard};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use retrace_primitives::{Account, Address, StorageKey, StorageValue, TxHash, B256, U256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// RLP leaf node holding one account.
#[derive(RlpEncodable, RlpDecodable)]
struct AccountLeaf {
    nonce: u64,
    balance: U256,
    storage: Vec<StorageSlot>,
}

#[derive(RlpEncodable, RlpDecodable)]
struct StorageSlot {
    key: StorageKey,
    value: StorageValue,
}

/// RLP root node: the sorted index of account leaves.
#[derive(RlpEncodable, RlpDecodable)]
struct RootNode {
    entries: Vec<RootEntry>,
}

#[derive(RlpEncodable, RlpDecodable)]
struct RootEntry {
    address: Address,
    leaf: B256,
}

/// A mutable view of all accounts rooted at a state root.
///
/// The snapshot owns its in-memory journal exclusively; trie nodes are shared
/// with other snapshots through the [`TrieDb`] cache. The snapshot pins its
/// root for its whole lifetime — copies share the pin, so the root stays
/// resident until the last copy is dropped.
#[derive(Debug, Clone)]
pub struct StateDb {
    db: Arc<TrieDb>,
    root: B256,
    guard: Arc<TrieGuard>,
    /// Decoded root index, loaded lazily and shared between copies.
    index: Option<Arc<HashMap<Address, B256>>>,
    /// The journal: accounts loaded or modified since the last reset.
    /// `None` marks a deletion.
    cache: HashMap<Address, Option<Account>>,
    /// Accounts touched since the last finalise, candidates for
    /// empty-account deletion.
    touched: HashSet<Address>,
    /// Addresses whose storage is warm for the current transaction.
    accessed: HashSet<Address>,
    tx_hash: TxHash,
    tx_index: usize,
}

impl StateDb {
    /// Opens a snapshot at the given root.
    ///
    /// Fails with [`StateError::MissingNode`] when the root is neither cached
    /// nor persisted, which is the signal that the historical state has to be
    /// regenerated.
    pub fn open(db: Arc<TrieDb>, root: B256) -> Result<Self, StateError> {
        if !db.contains(root) {
            return Err(StateError::MissingNode(root))
        }
        let guard = Arc::new(TrieGuard::new(db.clone(), root));
        Ok(Self {
            db,
            root,
            guard,
            index: None,
            cache: HashMap::new(),
            touched: HashSet::new(),
            accessed: HashSet::new(),
            tx_hash: TxHash::ZERO,
            tx_index: 0,
        })
    }

    /// Creates a snapshot over an empty state, persisting the empty root so
    /// it stays resolvable.
    pub fn empty(db: Arc<TrieDb>) -> Self {
        let data = alloy_rlp::encode(&RootNode { entries: Vec::new() });
        let root = db.insert(data.into(), Vec::new());
        db.commit(root);
        Self::open(db, root).expect("empty root was just persisted")
    }

    /// The root this snapshot is bound to.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// The backing node store.
    pub fn db(&self) -> Arc<TrieDb> {
        self.db.clone()
    }

    /// Produces an independent snapshot sharing read-only trie nodes and the
    /// root pin with `self`.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The hash of the transaction currently being applied.
    pub const fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// The in-block index of the transaction currently being applied.
    pub const fn tx_index(&self) -> usize {
        self.tx_index
    }

    /// Resets per-transaction transient state (access list, tx markers)
    /// ahead of applying the given transaction.
    pub fn prepare(&mut self, tx_hash: TxHash, tx_index: usize) {
        self.tx_hash = tx_hash;
        self.tx_index = tx_index;
        self.accessed.clear();
    }

    /// Marks an address as warm for the current transaction.
    pub fn warm_address(&mut self, address: Address) {
        self.accessed.insert(address);
    }

    /// Returns `true` if the address was warmed in the current transaction.
    pub fn is_warm_address(&self, address: Address) -> bool {
        self.accessed.contains(&address)
    }

    /// Reads an account, `None` when it does not exist.
    pub fn account(&mut self, address: Address) -> Result<Option<Account>, StateError> {
        self.ensure_cached(address)?;
        Ok(self.cache.get(&address).and_then(|slot| slot.clone()))
    }

    /// The account's balance, zero when absent.
    pub fn balance(&mut self, address: Address) -> Result<U256, StateError> {
        Ok(self.account(address)?.map(|account| account.balance).unwrap_or_default())
    }

    /// The account's nonce, zero when absent.
    pub fn nonce(&mut self, address: Address) -> Result<u64, StateError> {
        Ok(self.account(address)?.map(|account| account.nonce).unwrap_or_default())
    }

    /// Reads a storage slot, zero when unset.
    pub fn storage(
        &mut self,
        address: Address,
        key: StorageKey,
    ) -> Result<StorageValue, StateError> {
        Ok(self
            .account(address)?
            .map(|account| account.storage_slot(key))
            .unwrap_or(StorageValue::ZERO))
    }

    /// Credits `amount` to the account, creating it if needed.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let account = self.account_mut(address)?;
        account.balance = account.balance.saturating_add(amount);
        Ok(())
    }

    /// Debits `amount` from the account.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let account = self.account_mut(address)?;
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance(address))?;
        Ok(())
    }

    /// Sets the account's nonce.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        self.account_mut(address)?.nonce = nonce;
        Ok(())
    }

    /// Writes a storage slot; a zero value clears it.
    pub fn set_storage(
        &mut self,
        address: Address,
        key: StorageKey,
        value: StorageValue,
    ) -> Result<(), StateError> {
        self.account_mut(address)?.set_storage_slot(key, value);
        Ok(())
    }

    /// Loads the account into the journal and marks it touched without
    /// modifying it.
    pub fn touch(&mut self, address: Address) -> Result<(), StateError> {
        self.account_mut(address).map(|_| ())
    }

    /// Flushes the per-transaction journal. When `delete_empty` is set
    /// (spurious-dragon active at the enclosing block), touched accounts
    /// that ended up empty are deleted.
    pub fn finalise(&mut self, delete_empty: bool) {
        let touched = std::mem::take(&mut self.touched);
        if !delete_empty {
            return
        }
        for address in touched {
            if let Some(slot) = self.cache.get_mut(&address) {
                if slot.as_ref().is_some_and(Account::is_empty) {
                    *slot = None;
                }
            }
        }
    }

    /// Writes the journal into the node store and returns the new state
    /// root. The snapshot stays bound to its old root until [`Self::reset`].
    pub fn commit(&mut self) -> Result<B256, StateError> {
        let mut index: HashMap<Address, B256> = (*self.index()?).clone();
        for (address, slot) in &self.cache {
            match slot {
                Some(account) => {
                    let leaf = AccountLeaf {
                        nonce: account.nonce,
                        balance: account.balance,
                        storage: account
                            .storage
                            .iter()
                            .map(|(key, value)| StorageSlot { key: *key, value: *value })
                            .collect(),
                    };
                    let hash = self.db.insert(alloy_rlp::encode(&leaf).into(), Vec::new());
                    index.insert(*address, hash);
                }
                None => {
                    index.remove(address);
                }
            }
        }

        let mut entries: Vec<RootEntry> = index
            .into_iter()
            .map(|(address, leaf)| RootEntry { address, leaf })
            .collect();
        entries.sort_by_key(|entry| entry.address);
        let children = entries.iter().map(|entry| entry.leaf).collect();
        let root = self.db.insert(alloy_rlp::encode(&RootNode { entries }).into(), children);
        Ok(root)
    }

    /// Rebinds the snapshot to the given root, discarding the journal.
    ///
    /// The new root is pinned before the old pin is released, so the store
    /// never observes a window with neither held.
    pub fn reset(&mut self, root: B256) -> Result<(), StateError> {
        if !self.db.contains(root) {
            return Err(StateError::MissingNode(root))
        }
        self.guard = Arc::new(TrieGuard::new(self.db.clone(), root));
        self.root = root;
        self.index = None;
        self.cache.clear();
        self.touched.clear();
        self.accessed.clear();
        Ok(())
    }

    fn account_mut(&mut self, address: Address) -> Result<&mut Account, StateError> {
        self.ensure_cached(address)?;
        self.touched.insert(address);
        let slot = self.cache.get_mut(&address).expect("entry was just cached");
        Ok(slot.get_or_insert_with(Account::default))
    }

    fn ensure_cached(&mut self, address: Address) -> Result<(), StateError> {
        if self.cache.contains_key(&address) {
            return Ok(())
        }
        let leaf = self.index()?.get(&address).copied();
        let account = match leaf {
            Some(hash) => Some(self.decode_leaf(hash)?),
            None => None,
        };
        self.cache.insert(address, account);
        Ok(())
    }

    fn index(&mut self) -> Result<Arc<HashMap<Address, B256>>, StateError> {
        if let Some(index) = &self.index {
            return Ok(index.clone())
        }
        let data = self.db.node(self.root).ok_or(StateError::MissingNode(self.root))?;
        let node = RootNode::decode(&mut data.as_ref())
            .map_err(|_| StateError::MalformedNode(self.root))?;
        let index: Arc<HashMap<Address, B256>> = Arc::new(
            node.entries.into_iter().map(|entry| (entry.address, entry.leaf)).collect(),
        );
        self.index = Some(index.clone());
        Ok(index)
    }

    fn decode_leaf(&self, hash: B256) -> Result<Account, StateError> {
        let data = self.db.node(hash).ok_or(StateError::MissingNode(hash))?;
        let leaf =
            AccountLeaf::decode(&mut data.as_ref()).map_err(|_| StateError::MalformedNode(hash))?;
        Ok(Account {
            nonce: leaf.nonce,
            balance: leaf.balance,
            storage: leaf.storage.into_iter().map(|slot| (slot.key, slot.value)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn state() -> StateDb {
        StateDb::empty(Arc::new(TrieDb::new()))
    }

    #[test]
    fn commit_and_reopen() {
        let mut state = state();
        state.add_balance(addr(1), U256::from(100u64)).unwrap();
        state.set_nonce(addr(1), 3).unwrap();
        state.set_storage(addr(1), StorageKey::with_last_byte(9), U256::from(7u64)).unwrap();
        let root = state.commit().unwrap();
        state.reset(root).unwrap();

        assert_eq!(state.balance(addr(1)).unwrap(), U256::from(100u64));
        assert_eq!(state.nonce(addr(1)).unwrap(), 3);
        assert_eq!(
            state.storage(addr(1), StorageKey::with_last_byte(9)).unwrap(),
            U256::from(7u64)
        );

        let reopened = StateDb::open(state.db(), root);
        assert!(reopened.is_ok());
    }

    #[test]
    fn commit_is_deterministic() {
        let mut a = state();
        let mut b = StateDb::empty(a.db());
        for state in [&mut a, &mut b] {
            state.add_balance(addr(1), U256::from(5u64)).unwrap();
            state.add_balance(addr(2), U256::from(6u64)).unwrap();
        }
        assert_eq!(a.commit().unwrap(), b.commit().unwrap());
    }

    #[test]
    fn copies_do_not_observe_each_other() {
        let mut original = state();
        original.add_balance(addr(1), U256::from(10u64)).unwrap();
        let root = original.commit().unwrap();
        original.reset(root).unwrap();

        let mut copy = original.copy();
        copy.add_balance(addr(1), U256::from(90u64)).unwrap();

        assert_eq!(copy.balance(addr(1)).unwrap(), U256::from(100u64));
        assert_eq!(original.balance(addr(1)).unwrap(), U256::from(10u64));
    }

    #[test]
    fn finalise_deletes_touched_empty_accounts() {
        let mut state = state();
        state.touch(addr(1)).unwrap();
        state.add_balance(addr(2), U256::from(1u64)).unwrap();
        state.finalise(true);

        assert_eq!(state.account(addr(1)).unwrap(), None);
        assert!(state.account(addr(2)).unwrap().is_some());

        // without the spurious-dragon predicate the empty account survives
        state.touch(addr(3)).unwrap();
        state.finalise(false);
        assert_eq!(state.account(addr(3)).unwrap(), Some(Account::default()));
    }

    #[test]
    fn unchanged_leaves_are_shared_between_roots() {
        let mut state = state();
        state.add_balance(addr(1), U256::from(1u64)).unwrap();
        state.add_balance(addr(2), U256::from(2u64)).unwrap();
        let first = state.commit().unwrap();
        state.reset(first).unwrap();

        state.add_balance(addr(2), U256::from(40u64)).unwrap();
        let second = state.commit().unwrap();

        let db = state.db();
        // first's leaves: two; second adds one new leaf for addr(2) and a new
        // root, sharing addr(1)'s leaf
        assert_ne!(first, second);
        assert_eq!(db.cached_nodes(), 5);
    }

    #[test]
    fn dropping_all_snapshots_releases_the_root() {
        let db = Arc::new(TrieDb::new());
        let mut state = StateDb::empty(db.clone());
        state.add_balance(addr(1), U256::from(1u64)).unwrap();
        let root = state.commit().unwrap();
        state.reset(root).unwrap();
        assert_eq!(db.refs(root), Some(1));

        let copy = state.copy();
        drop(state);
        assert_eq!(db.refs(root), Some(1));
        drop(copy);
        assert!(!db.contains(root));

        // evicted historical roots can no longer be opened
        assert!(matches!(StateDb::open(db, root), Err(StateError::MissingNode(_))));
    }

    #[test]
    fn prepare_clears_the_access_list() {
        let mut state = state();
        state.warm_address(addr(1));
        assert!(state.is_warm_address(addr(1)));
        state.prepare(TxHash::repeat_byte(1), 2);
        assert!(!state.is_warm_address(addr(1)));
        assert_eq!(state.tx_index(), 2);
        assert_eq!(state.tx_hash(), TxHash::repeat_byte(1));
    }
}
