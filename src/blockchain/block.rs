use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::fmt;

use super::transaction::Transaction;

/// A 256-bit block content hash, hex encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockHash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl BlockHash {
    /// The all-zero digest the genesis block links to
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Creation time in nanoseconds since the Unix epoch
    pub timestamp: i64,

    /// Proof of work (nonce)
    pub nonce: u64,

    /// Hash of the previous block
    #[schema(value_type = String, example = "000a3f...")]
    pub previous_hash: BlockHash,

    /// Transactions in this block, in hashing order
    pub transactions: Vec<Transaction>,
}

/// Current wall clock in nanoseconds
pub fn now_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(nonce: u64, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Block {
            timestamp: now_nanos(),
            nonce,
            previous_hash,
            transactions,
        }
    }

    /// Creates the genesis block: zero link, no transactions, nonce 0
    pub fn genesis() -> Self {
        Self::new(0, BlockHash::ZERO, Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.nonce == 0 && self.previous_hash == BlockHash::ZERO && self.transactions.is_empty()
    }

    /// Calculates the SHA-256 content hash over every field, transactions in order
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();

        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.previous_hash.0);
        hasher.update((self.transactions.len() as u64).to_be_bytes());
        for transaction in &self.transactions {
            transaction.hash_into(&mut hasher);
        }

        BlockHash(hasher.finalize().into())
    }

    pub fn hash_hex(&self) -> String {
        self.hash().to_hex()
    }

    /// True when the hex hash starts with `difficulty` zeros
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash(), difficulty)
    }
}

pub fn meets_difficulty(hash: &BlockHash, difficulty: usize) -> bool {
    let hex = hash.to_hex();
    difficulty <= hex.len() && hex.bytes().take(difficulty).all(|c| c == b'0')
}
