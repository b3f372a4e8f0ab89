use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, DigitalSignature, PublicKey, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed sender key: {0}")]
    MalformedKey(String),

    #[error("Transaction carries a sender key but no signature")]
    MissingSignature,

    #[error("Transaction carries a signature but no sender key")]
    MissingSenderKey,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Recipient address is not canonical: {0}")]
    InvalidRecipient(String),

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Wallet key does not match the transaction sender")]
    SenderMismatch,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Represents a value transfer stored in the ledger
///
/// Reward transactions have neither a sender key nor a signature; every other
/// transaction carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's public key, absent for mining rewards
    pub sender_public_key: Option<PublicKey>,

    /// Recipient's address
    pub recipient_address: Address,

    /// Amount being transferred
    pub value: f64,

    /// Signature over the signing payload, absent for mining rewards
    pub signature: Option<DigitalSignature>,
}

/// The part of a transaction covered by its signature
#[derive(Debug, Serialize)]
pub struct SigningPayload<'a> {
    pub sender_public_key: Option<&'a PublicKey>,
    pub recipient_address: &'a Address,
    pub value: f64,
}

impl SigningPayload<'_> {
    /// Canonical bytes that get signed. Field order is fixed by the struct.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        serde_json::to_vec(self).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }
}

impl Transaction {
    /// Creates a new unsigned transfer
    pub fn new(sender_public_key: PublicKey, recipient_address: Address, value: f64) -> Self {
        Transaction {
            sender_public_key: Some(sender_public_key),
            recipient_address,
            value,
            signature: None,
        }
    }

    /// Creates a mining reward crediting `recipient_address`
    pub fn new_reward(recipient_address: Address, value: f64) -> Self {
        Transaction {
            sender_public_key: None,
            recipient_address,
            value,
            signature: None,
        }
    }

    /// Projects the transaction onto the fields that are signed
    pub fn signing_payload(&self) -> SigningPayload<'_> {
        SigningPayload {
            sender_public_key: self.sender_public_key.as_ref(),
            recipient_address: &self.recipient_address,
            value: self.value,
        }
    }

    /// Signs the transaction with a wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if self.sender_public_key.as_ref() != Some(&wallet.public_key()) {
            return Err(TransactionError::SenderMismatch);
        }

        let message = self.signing_payload().to_bytes()?;
        self.signature = Some(wallet.sign(&message));

        Ok(())
    }

    /// Checks the signature against the sender key.
    ///
    /// Rewards (no key, no signature) always pass. A key without a signature, or
    /// the reverse, is rejected.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let (sender, signature) = match (&self.sender_public_key, &self.signature) {
            (None, None) => return Ok(()),
            (Some(_), None) => return Err(TransactionError::MissingSignature),
            (None, Some(_)) => return Err(TransactionError::MissingSenderKey),
            (Some(sender), Some(signature)) => (sender, signature),
        };

        if !self.value.is_finite() || self.value < 0.0 {
            return Err(TransactionError::InvalidAmount(self.value.to_string()));
        }

        if !self.recipient_address.is_canonical() {
            return Err(TransactionError::InvalidRecipient(self.recipient_address.0.clone()));
        }

        let public_key = sender
            .to_verifying_key()
            .map_err(|e| TransactionError::MalformedKey(e.to_string()))?;

        let message = self.signing_payload().to_bytes()?;

        match verify_signature(&message, signature, &public_key) {
            Ok(true) => Ok(()),
            _ => Err(TransactionError::InvalidSignature),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Checks if the transaction is a mining reward
    pub fn is_reward(&self) -> bool {
        self.sender_public_key.is_none() && self.signature.is_none()
    }

    /// Address debited by this transaction, if any
    pub fn sender_address(&self) -> Option<Address> {
        self.sender_public_key.as_ref().and_then(PublicKey::address)
    }

    /// Feeds a length-prefixed encoding of every field, signature included,
    /// into a block hasher.
    pub(crate) fn hash_into(&self, hasher: &mut Sha256) {
        update_optional(hasher, self.sender_public_key.as_ref().map(|k| k.0.as_bytes()));
        update_field(hasher, self.recipient_address.0.as_bytes());
        hasher.update(self.value.to_bits().to_be_bytes());
        update_optional(hasher, self.signature.as_ref().map(|s| s.0.as_bytes()));
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn update_optional(hasher: &mut Sha256, bytes: Option<&[u8]>) {
    match bytes {
        Some(bytes) => {
            hasher.update([1u8]);
            update_field(hasher, bytes);
        }
        None => hasher.update([0u8]),
    }
}
