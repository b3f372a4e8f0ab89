use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::block::{meets_difficulty, Block, BlockHash};
use super::chain::Blockchain;
use super::transaction::TransactionError;

/// Reasons a chain fails validation
#[derive(Debug, Error)]
pub enum ChainValidationError {
    #[error("chain is empty")]
    Empty,

    #[error("first block is not a genesis block")]
    InvalidGenesis,

    #[error("block {index} does not link to the hash of its predecessor")]
    BrokenLink { index: usize },

    #[error("block {index} hash {hash} misses difficulty {difficulty}")]
    InsufficientWork {
        index: usize,
        hash: BlockHash,
        difficulty: usize,
    },

    #[error("block {index} holds an invalid transaction: {source}")]
    InvalidTransaction {
        index: usize,
        #[source]
        source: TransactionError,
    },
}

/// Checks a whole chain: genesis shape, hash links, proof of work and every signature.
///
/// The genesis block is exempt from the link and difficulty checks.
pub fn validate_chain(chain: &[Block], difficulty: usize) -> Result<(), ChainValidationError> {
    let genesis = chain.first().ok_or(ChainValidationError::Empty)?;
    if !genesis.is_genesis() {
        return Err(ChainValidationError::InvalidGenesis);
    }

    let mut previous_hash = genesis.hash();
    for (index, block) in chain.iter().enumerate().skip(1) {
        if block.previous_hash != previous_hash {
            return Err(ChainValidationError::BrokenLink { index });
        }

        let hash = block.hash();
        if !meets_difficulty(&hash, difficulty) {
            return Err(ChainValidationError::InsufficientWork {
                index,
                hash,
                difficulty,
            });
        }

        for transaction in &block.transactions {
            transaction
                .verify()
                .map_err(|source| ChainValidationError::InvalidTransaction { index, source })?;
        }

        previous_hash = hash;
    }

    Ok(())
}

/// Failures talking to a peer. None of these are fatal to a resolution round.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {peer} is unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {peer} answered with status {status}")]
    Status { peer: String, status: StatusCode },

    #[error("peer {peer} sent an unreadable chain: {reason}")]
    Decode { peer: String, reason: String },
}

/// Fetches a peer's full chain
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError>;
}

#[derive(Deserialize)]
struct RemoteChain {
    chain: Vec<Block>,
}

/// Pulls chains from the `/api/v1/chain` endpoint of other nodes
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: Client,
}

impl HttpPeerTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let url = format!("{}/api/v1/chain", peer.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| PeerError::Unreachable {
                peer: peer.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status,
            });
        }

        let remote = response
            .json::<RemoteChain>()
            .await
            .map_err(|e| PeerError::Decode {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        Ok(remote.chain)
    }
}

/// Outcome of one resolution round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A longer valid peer chain replaced the local one
    Replaced { length: usize },
    /// The local chain was kept
    Authoritative,
}

/// Longest-valid-chain resolver over the ledger's known peers
pub struct ConsensusResolver {
    transport: Box<dyn PeerTransport>,
}

impl ConsensusResolver {
    pub fn new(transport: impl PeerTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Fetches every peer's chain and adopts the longest valid one that beats the
    /// local length. Ties keep the local chain. No ledger lock is held while fetching.
    pub async fn resolve(&self, blockchain: &Blockchain) -> Resolution {
        let peers = blockchain.peers();
        if peers.is_empty() {
            return Resolution::Authoritative;
        }

        let fetches = peers.iter().map(|peer| async move {
            (peer.as_str(), self.transport.fetch_chain(peer).await)
        });
        let results = join_all(fetches).await;

        let mut longest = blockchain.len();
        let mut best: Option<Vec<Block>> = None;

        for (peer, result) in results {
            let chain = match result {
                Ok(chain) => chain,
                Err(err) => {
                    warn!("Skipping peer: {}", err);
                    continue;
                }
            };

            if chain.len() <= longest {
                debug!("Peer {} chain of length {} is not longer", peer, chain.len());
                continue;
            }

            if let Err(err) = validate_chain(&chain, blockchain.difficulty()) {
                warn!("Discarding chain from {}: {}", peer, err);
                continue;
            }

            longest = chain.len();
            best = Some(chain);
        }

        let Some(chain) = best else {
            return Resolution::Authoritative;
        };

        match blockchain.replace_chain(chain) {
            Ok(length) => {
                info!("Adopted peer chain of length {}", length);
                Resolution::Replaced { length }
            }
            Err(err) => {
                warn!("Keeping local chain: {}", err);
                Resolution::Authoritative
            }
        }
    }
}
