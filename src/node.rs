// Background activities of a running node: periodic mining and periodic consensus.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::blockchain::{Blockchain, ConsensusResolver, Resolution};

/// Mines a block every `every` while the pending pool is non-empty.
///
/// The search itself runs on the blocking pool so it never stalls the runtime.
/// `every` must be non-zero.
pub fn spawn_mining_loop(blockchain: Blockchain, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;

            let ledger = blockchain.clone();
            match tokio::task::spawn_blocking(move || ledger.mine_pending()).await {
                Ok(Ok(Some(block))) => {
                    info!("Automatically mined block {}", block.hash_hex());
                }
                Ok(Ok(None)) => debug!("Pool is empty, skipping mining round"),
                Ok(Err(err)) => warn!("Mining round failed: {}", err),
                Err(err) => error!("Mining task failed: {}", err),
            }
        }
    })
}

/// Runs a consensus round against the ledger's peers every `every` (non-zero)
pub fn spawn_consensus_loop(
    blockchain: Blockchain,
    resolver: Arc<ConsensusResolver>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;

            match resolver.resolve(&blockchain).await {
                Resolution::Replaced { length } => {
                    info!("Chain replaced with longer chain from peers (length {})", length)
                }
                Resolution::Authoritative => debug!("Local chain is authoritative"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::consensus::PeerError;
    use crate::blockchain::{Block, PeerTransport, Wallet};
    use async_trait::async_trait;

    struct StaticPeer(Vec<Block>);

    #[async_trait]
    impl PeerTransport for StaticPeer {
        async fn fetch_chain(&self, _peer: &str) -> Result<Vec<Block>, PeerError> {
            Ok(self.0.clone())
        }
    }

    async fn wait_for_length(blockchain: &Blockchain, length: usize) {
        time::timeout(Duration::from_secs(10), async {
            while blockchain.len() < length {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("chain did not grow in time");
    }

    #[tokio::test]
    async fn test_mining_loop_mines_pending_transactions() {
        let miner = Wallet::new();
        let blockchain = Blockchain::with_params(miner.address().clone(), 1, 1.0);
        let transaction = miner
            .create_transaction(Wallet::new().address().clone(), 1.0)
            .unwrap();
        blockchain.add_transaction(transaction).unwrap();

        let handle = spawn_mining_loop(blockchain.clone(), Duration::from_millis(20));
        wait_for_length(&blockchain, 2).await;
        handle.abort();

        assert!(blockchain.pending_transactions().is_empty());
        assert_eq!(blockchain.chain()[1].transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_mining_loop_idles_on_empty_pool() {
        let blockchain = Blockchain::with_params(Wallet::new().address().clone(), 1, 1.0);

        let handle = spawn_mining_loop(blockchain.clone(), Duration::from_millis(10));
        time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(blockchain.len(), 1);
    }

    #[tokio::test]
    async fn test_consensus_loop_adopts_peer_chain() {
        let peer = Blockchain::new(Wallet::new().address().clone());
        peer.mine().unwrap();
        peer.mine().unwrap();

        let local = Blockchain::new(Wallet::new().address().clone());
        local.add_peer("http://peer");
        let resolver = Arc::new(ConsensusResolver::new(StaticPeer(peer.chain())));

        let handle = spawn_consensus_loop(local.clone(), resolver, Duration::from_millis(20));
        wait_for_length(&local, 3).await;
        handle.abort();

        assert_eq!(local.chain(), peer.chain());
    }
}
