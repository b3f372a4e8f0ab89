// Blockchain module
//
// This module contains the ledger engine:
// - Block structure and content hashing
// - Blockchain (chain + pending pool), proof of work and balances
// - Transaction structure and signature checks
// - Cryptography utilities and wallets
// - Chain validation and peer consensus

pub mod block;
pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockHash};
pub use chain::{Blockchain, BlockchainError};
pub use consensus::{ConsensusResolver, HttpPeerTransport, PeerTransport, Resolution};
pub use crypto::{Address, DigitalSignature, PublicKey, Wallet};
pub use transaction::{Transaction, TransactionError};
