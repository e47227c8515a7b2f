#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Commonly used types for the retrace trace engine.
//!
//! This crate contains the chain's consensus primitives: headers, blocks,
//! signed transactions and the signature machinery to recover their senders,
//! plus the chain spec that gates fork predicates.

mod account;
mod block;
mod block_id;
mod chain_spec;
mod header;
mod transaction;

pub use account::Account;
pub use block::{Block, SealedBlock};
pub use block_id::{BlockNumberOrTag, ParseBlockNumberError};
pub use chain_spec::ChainSpec;
pub use header::{Header, SealedHeader};
pub use transaction::{
    public_key_to_address, sign_message, Message, Signature, SignatureError, Transaction,
    TransactionSigned,
};

pub use alloy_primitives::{
    self, hex, keccak256, Address, BlockHash, BlockNumber, Bytes, StorageKey, StorageValue, TxHash,
    TxKind, B256, U256,
};
pub use alloy_rlp;
