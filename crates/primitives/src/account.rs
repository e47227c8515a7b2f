use alloy_primitives::{StorageKey, StorageValue, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An account in the chain state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The number of transactions sent from this account.
    pub nonce: u64,
    /// The account balance in wei.
    pub balance: U256,
    /// The account's storage slots. Zero-valued slots are not stored.
    pub storage: BTreeMap<StorageKey, StorageValue>,
}

impl Account {
    /// An account is empty when nonce, balance and storage are all unset.
    ///
    /// Empty accounts are removed on finalise once the spurious-dragon fork
    /// is active.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.storage.is_empty()
    }

    /// Returns the value of a storage slot, zero if unset.
    pub fn storage_slot(&self, key: StorageKey) -> StorageValue {
        self.storage.get(&key).copied().unwrap_or(U256::ZERO)
    }

    /// Sets a storage slot, removing the entry when the value is zero.
    pub fn set_storage_slot(&mut self, key: StorageKey, value: StorageValue) {
        if value.is_zero() {
            self.storage.remove(&key);
        } else {
            self.storage.insert(key, value);
        }
    }
}
