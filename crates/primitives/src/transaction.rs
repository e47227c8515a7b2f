use alloy_primitives::{keccak256, Address, Bytes, TxHash, TxKind, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message as SecpMessage, PublicKey, SecretKey, SECP256K1,
};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// The order of the secp256k1 curve, divided by two. Signatures with an S
/// value above this are rejected per EIP-2.
const SECP256K1N_HALF: U256 = U256::from_be_bytes([
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
]);

/// An unsigned dynamic-fee transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// The chain this transaction is valid on.
    pub chain_id: u64,
    /// The sender's nonce at the time of inclusion.
    pub nonce: u64,
    /// The maximum amount of gas the transaction may consume.
    pub gas_limit: u64,
    /// The maximum total fee per gas unit the sender is willing to pay.
    pub max_fee_per_gas: u64,
    /// The maximum priority fee per gas unit, paid on top of the base fee.
    pub max_priority_fee_per_gas: u64,
    /// The callee, or create.
    pub to: TxKind,
    /// The amount of wei transferred to the callee.
    pub value: U256,
    /// Input payload interpreted by the execution engine.
    pub input: Bytes,
    /// Addresses whose storage is pre-warmed for this transaction.
    pub access_list: Vec<Address>,
}

impl Transaction {
    /// The hash that the sender signs: keccak of the unsigned RLP encoding.
    pub fn signature_hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// The gas price actually charged under the given base fee: the fee cap,
    /// bounded below by `base_fee + priority_fee` when that is smaller.
    pub fn effective_gas_price(&self, base_fee: u64) -> u64 {
        self.max_fee_per_gas.min(base_fee.saturating_add(self.max_priority_fee_per_gas))
    }
}

/// r, s and y-parity of a secp256k1 signature.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct Signature {
    /// The R field of the signature.
    pub r: U256,
    /// The S field of the signature.
    pub s: U256,
    /// Signature Y parity.
    pub odd_y_parity: bool,
}

impl Signature {
    /// Recover the signer from the given message hash, rejecting signatures
    /// with a high `s` value per EIP-2.
    pub fn recover_signer(&self, hash: B256) -> Option<Address> {
        if self.s > SECP256K1N_HALF {
            return None
        }
        self.recover_signer_unchecked(hash)
    }

    fn recover_signer_unchecked(&self, hash: B256) -> Option<Address> {
        let mut sig: [u8; 65] = [0; 65];
        sig[0..32].copy_from_slice(&self.r.to_be_bytes::<32>());
        sig[32..64].copy_from_slice(&self.s.to_be_bytes::<32>());
        sig[64] = self.odd_y_parity as u8;

        let sig = RecoverableSignature::from_compact(
            &sig[0..64],
            RecoveryId::from_i32(sig[64] as i32).ok()?,
        )
        .ok()?;
        let public = SECP256K1.recover_ecdsa(&SecpMessage::from_digest(hash.0), &sig).ok()?;
        Some(public_key_to_address(public))
    }
}

/// Signs the given message hash with the secret key.
pub fn sign_message(secret: B256, message: B256) -> Result<Signature, secp256k1::Error> {
    let sec = SecretKey::from_slice(secret.as_ref())?;
    let s = SECP256K1.sign_ecdsa_recoverable(&SecpMessage::from_digest(message.0), &sec);
    let (rec_id, data) = s.serialize_compact();

    Ok(Signature {
        r: U256::try_from_be_slice(&data[..32]).expect("The slice has at most 32 bytes"),
        s: U256::try_from_be_slice(&data[32..64]).expect("The slice has at most 32 bytes"),
        odd_y_parity: rec_id.to_i32() != 0,
    })
}

/// Converts a public key into an ethereum address by hashing the encoded
/// public key with keccak256.
pub fn public_key_to_address(public: PublicKey) -> Address {
    // strip out the first byte because that should be the
    // SECP256K1_TAG_PUBKEY_UNCOMPRESSED tag returned by libsecp's
    // uncompressed pubkey serialization
    let hash = keccak256(&public.serialize_uncompressed()[1..]);
    Address::from_slice(&hash[12..])
}

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct TransactionSigned {
    /// The unsigned transaction.
    pub transaction: Transaction,
    /// The sender's signature over [`Transaction::signature_hash`].
    pub signature: Signature,
}

impl TransactionSigned {
    /// The transaction hash: keccak of the signed RLP encoding.
    pub fn hash(&self) -> TxHash {
        keccak256(alloy_rlp::encode(self))
    }

    /// Recovers the sender of the transaction.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature.recover_signer(self.transaction.signature_hash())
    }

    /// Converts the transaction into the message applied by the execution
    /// engine, charging the effective gas price under `base_fee`.
    ///
    /// This is the only message constructor; the enclosing block's base fee
    /// is always threaded through it.
    pub fn as_message(&self, base_fee: u64) -> Result<Message, SignatureError> {
        let from = self.recover_signer().ok_or(SignatureError::InvalidSignature)?;
        Ok(Message {
            from,
            to: self.transaction.to,
            nonce: self.transaction.nonce,
            gas_limit: self.transaction.gas_limit,
            gas_price: self.transaction.effective_gas_price(base_fee),
            fee_cap: self.transaction.max_fee_per_gas,
            value: self.transaction.value,
            input: self.transaction.input.clone(),
            access_list: self.transaction.access_list.clone(),
        })
    }
}

impl Deref for TransactionSigned {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

/// A transaction with its signature resolved into a sender, ready for
/// execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The recovered sender.
    pub from: Address,
    /// The callee, or create.
    pub to: TxKind,
    /// The sender's nonce.
    pub nonce: u64,
    /// The gas limit of the transaction.
    pub gas_limit: u64,
    /// The effective gas price charged for every consumed gas unit.
    pub gas_price: u64,
    /// The fee cap the sender signed, checked against the block base fee.
    pub fee_cap: u64,
    /// The transferred amount.
    pub value: U256,
    /// Input payload interpreted by the execution engine.
    pub input: Bytes,
    /// Addresses whose storage is pre-warmed.
    pub access_list: Vec<Address>,
}

/// Error recovering the sender of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The signature does not resolve to a valid sender.
    #[error("invalid transaction signature")]
    InvalidSignature,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::thread_rng;

    fn sample_tx(nonce: u64) -> Transaction {
        Transaction {
            chain_id: 1337,
            nonce,
            gas_limit: 100_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 2,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::from(1_000u64),
            input: Bytes::new(),
            access_list: vec![],
        }
    }

    #[test]
    fn sign_and_recover() {
        let (secret, public) = SECP256K1.generate_keypair(&mut thread_rng());
        let sender = public_key_to_address(public);

        let tx = sample_tx(0);
        let signature =
            sign_message(B256::from_slice(&secret.secret_bytes()), tx.signature_hash()).unwrap();
        let signed = TransactionSigned { transaction: tx, signature };

        assert_eq!(signed.recover_signer(), Some(sender));
        let message = signed.as_message(7).unwrap();
        assert_eq!(message.from, sender);
        assert_eq!(message.gas_price, 9);
    }

    #[test]
    fn effective_gas_price_respects_fee_cap() {
        let mut tx = sample_tx(0);
        tx.max_fee_per_gas = 5;
        tx.max_priority_fee_per_gas = 10;
        assert_eq!(tx.effective_gas_price(3), 5);

        tx.max_fee_per_gas = 100;
        assert_eq!(tx.effective_gas_price(3), 13);
    }

    #[test]
    fn garbage_signature_does_not_recover() {
        let tx = sample_tx(1);
        let signed = TransactionSigned {
            transaction: tx,
            signature: Signature { r: U256::from(1u64), s: U256::from(1u64), odd_y_parity: false },
        };
        // a syntactically valid but unrelated signature must either fail or
        // resolve to some other address deterministically
        let first = signed.recover_signer();
        assert_eq!(first, signed.recover_signer());
    }

    #[test]
    fn high_s_is_rejected() {
        let sig = Signature { r: U256::from(1u64), s: U256::MAX, odd_y_parity: false };
        assert_eq!(sig.recover_signer(B256::repeat_byte(1)), None);
    }
}
