use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use thiserror::Error;

use super::block::{meets_difficulty, now_nanos, Block, BlockHash};
use super::consensus::{validate_chain, ChainValidationError};
use super::crypto::Address;
use super::transaction::{Transaction, TransactionError};

/// Leading hex zeros a mined block hash needs
pub const DEFAULT_DIFFICULTY: usize = 3;

/// Value credited to the miner by each block's reward transaction
pub const DEFAULT_MINING_REWARD: f64 = 1.0;

/// Nonces tried between checks for a chain replacement
const ABORT_CHECK_INTERVAL: u64 = 1024;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Chain tip moved from {expected} while mining")]
    StaleTip { expected: BlockHash },

    #[error("Mining aborted: the chain was replaced")]
    Aborted,

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainValidationError),

    #[error("Replacement chain of length {candidate} is not longer than local length {local}")]
    NotLonger { candidate: usize, local: usize },
}

/// Chain and pending pool, always locked together
#[derive(Debug)]
struct LedgerState {
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
}

/// Represents the blockchain
#[derive(Debug, Clone)]
pub struct Blockchain {
    state: Arc<Mutex<LedgerState>>,

    /// Bumped on every chain replacement; in-flight searches abort when it moves
    epoch: Arc<AtomicU64>,

    /// Known peer base URLs, in registration order
    peers: Arc<Mutex<Vec<String>>>,

    /// Recipient of this node's mining rewards
    address: Address,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block
    pub fn new(address: Address) -> Self {
        Self::with_params(address, DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD)
    }

    pub fn with_params(address: Address, difficulty: usize, mining_reward: f64) -> Self {
        Blockchain {
            state: Arc::new(Mutex::new(LedgerState {
                chain: vec![Block::genesis()],
                pending_transactions: Vec::new(),
            })),
            epoch: Arc::new(AtomicU64::new(0)),
            peers: Arc::new(Mutex::new(Vec::new())),
            address,
            difficulty,
            mining_reward,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Verifies a transaction and adds it to the pending pool.
    ///
    /// This is the only way into the pool; a rejected transaction leaves it untouched.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), BlockchainError> {
        if let Err(err) = transaction.verify() {
            warn!("Rejected transaction to {}: {}", transaction.recipient_address, err);
            return Err(err.into());
        }

        let mut state = self.state();
        state.pending_transactions.push(transaction);
        debug!("Pool now holds {} transactions", state.pending_transactions.len());

        Ok(())
    }

    /// Mines a block over the current pool plus a reward for this node.
    ///
    /// The pool is snapshotted under the lock, the nonce search runs without it, and the
    /// block is appended only if the chain tail is still the block's parent. Only the
    /// mined transactions are removed from the pool; anything admitted meanwhile stays.
    pub fn mine(&self) -> Result<Block, BlockchainError> {
        let (previous_hash, snapshot, start_epoch) = {
            let state = self.state();
            let tail = state.chain.last().map(Block::hash).unwrap_or(BlockHash::ZERO);
            (
                tail,
                state.pending_transactions.clone(),
                self.epoch.load(Ordering::Acquire),
            )
        };

        let mut transactions = Vec::with_capacity(snapshot.len() + 1);
        transactions.push(Transaction::new_reward(self.address.clone(), self.mining_reward));
        transactions.extend(snapshot.iter().cloned());

        let block = self.search(previous_hash, transactions, || {
            if self.epoch.load(Ordering::Acquire) == start_epoch {
                Ok(())
            } else {
                debug!("Chain replaced during proof of work, abandoning search");
                Err(BlockchainError::Aborted)
            }
        })?;

        self.commit(block, &snapshot)
    }

    /// Mines only when there is something pending; `Ok(None)` otherwise
    pub fn mine_pending(&self) -> Result<Option<Block>, BlockchainError> {
        if self.state().pending_transactions.is_empty() {
            return Ok(None);
        }
        self.mine().map(Some)
    }

    /// Appends a mined block if it still extends the tail, then drops `mined` from the pool
    fn commit(&self, block: Block, mined: &[Transaction]) -> Result<Block, BlockchainError> {
        let mut state = self.state();
        let tail = state.chain.last().map(Block::hash);
        if tail != Some(block.previous_hash) {
            warn!("Discarding mined block: chain tip moved during proof of work");
            return Err(BlockchainError::StaleTip {
                expected: block.previous_hash,
            });
        }

        remove_mined(&mut state.pending_transactions, mined);
        state.chain.push(block.clone());
        info!(
            "Mined block {} with {} transactions ({})",
            state.chain.len() - 1,
            block.transactions.len(),
            block.hash_hex()
        );

        Ok(block)
    }

    /// Searches nonces from 0 until the block hash meets the difficulty target.
    ///
    /// Every guess gets a fresh timestamp, so two searches over the same input
    /// generally settle on different nonces. The returned block is the exact
    /// guess that met the target.
    pub fn proof_of_work(&self, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Block {
        match self.search(previous_hash, transactions, || Ok::<(), Infallible>(())) {
            Ok(block) => block,
            Err(never) => match never {},
        }
    }

    /// Nonce search shared by `proof_of_work` and `mine`.
    ///
    /// `keep_going` is polled every `ABORT_CHECK_INTERVAL` nonces; its error ends the search.
    fn search<E>(
        &self,
        previous_hash: BlockHash,
        transactions: Vec<Transaction>,
        mut keep_going: impl FnMut() -> Result<(), E>,
    ) -> Result<Block, E> {
        let mut candidate = Block::new(0, previous_hash, transactions);
        loop {
            if self.stamp_and_check(&mut candidate) {
                return Ok(candidate);
            }
            candidate.nonce += 1;
            if candidate.nonce % ABORT_CHECK_INTERVAL == 0 {
                keep_going()?;
            }
        }
    }

    /// Builds a candidate block stamped now and returns it if its hash meets the target
    pub fn valid_proof(
        &self,
        nonce: u64,
        previous_hash: BlockHash,
        transactions: &[Transaction],
    ) -> Option<Block> {
        let mut candidate = Block::new(nonce, previous_hash, transactions.to_vec());
        self.stamp_and_check(&mut candidate).then_some(candidate)
    }

    // Proof check behind every guess: restamp, then compare against the target
    fn stamp_and_check(&self, candidate: &mut Block) -> bool {
        candidate.timestamp = now_nanos();
        meets_difficulty(&candidate.hash(), self.difficulty)
    }

    /// Replays the whole chain: credits to `address` add, debits from it subtract
    pub fn calculate_balance(&self, address: &Address) -> f64 {
        let state = self.state();
        let mut total = 0.0;

        for block in &state.chain {
            for transaction in &block.transactions {
                if &transaction.recipient_address == address {
                    total += transaction.value;
                }
                if transaction.sender_address().as_ref() == Some(address) {
                    total -= transaction.value;
                }
            }
        }

        total
    }

    /// Atomically swaps in `candidate` if it validates and is still strictly longer
    pub fn replace_chain(&self, candidate: Vec<Block>) -> Result<usize, BlockchainError> {
        validate_chain(&candidate, self.difficulty)?;

        let mut state = self.state();
        let local = state.chain.len();
        if candidate.len() <= local {
            return Err(BlockchainError::NotLonger {
                candidate: candidate.len(),
                local,
            });
        }

        state.chain = candidate;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        info!("Replaced local chain of length {} with length {}", local, state.chain.len());

        Ok(state.chain.len())
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Option<Block> {
        self.state().chain.last().cloned()
    }

    /// Gets the entire blockchain
    pub fn chain(&self) -> Vec<Block> {
        self.state().chain.clone()
    }

    pub fn len(&self) -> usize {
        self.state().chain.len()
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state().pending_transactions.clone()
    }

    /// Validates the local chain
    pub fn is_valid(&self) -> bool {
        validate_chain(&self.state().chain, self.difficulty).is_ok()
    }

    /// Registers a peer; returns false if it was already known
    pub fn add_peer(&self, peer: &str) -> bool {
        let peer = peer.trim_end_matches('/').to_string();
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if peers.contains(&peer) {
            return false;
        }
        peers.push(peer);
        true
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Removes one pool entry per mined transaction
fn remove_mined(pool: &mut Vec<Transaction>, mined: &[Transaction]) {
    for transaction in mined {
        if let Some(position) = pool.iter().position(|pending| pending == transaction) {
            pool.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use std::thread;
    use std::time::Duration;

    fn ledger_for(wallet: &Wallet) -> Blockchain {
        Blockchain::new(wallet.address().clone())
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = ledger_for(&Wallet::new());
        let chain = blockchain.chain();

        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_genesis());
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_add_transaction() {
        let blockchain = ledger_for(&Wallet::new());
        let sender = Wallet::new();

        let transaction = sender
            .create_transaction(Wallet::new().address().clone(), 10.0)
            .unwrap();
        blockchain.add_transaction(transaction).unwrap();

        assert_eq!(blockchain.pending_transactions().len(), 1);
    }

    #[test]
    fn test_rejected_transaction_leaves_pool_untouched() {
        let blockchain = ledger_for(&Wallet::new());
        let sender = Wallet::new();

        let mut transaction = sender
            .create_transaction(Wallet::new().address().clone(), 10.0)
            .unwrap();
        transaction.value = 11.0;

        let result = blockchain.add_transaction(transaction);
        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(TransactionError::InvalidSignature))
        ));
        assert!(blockchain.pending_transactions().is_empty());
    }

    #[test]
    fn test_mine_with_empty_pool_produces_reward_block() {
        let miner = Wallet::new();
        let blockchain = ledger_for(&miner);

        let block = blockchain.mine().unwrap();

        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_reward());
        assert_eq!(&block.transactions[0].recipient_address, miner.address());
        assert!(block.hash_hex().starts_with("000"));
        assert_eq!(blockchain.len(), 2);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_mine_block() {
        let miner = Wallet::new();
        let blockchain = ledger_for(&miner);
        let recipient = Wallet::new();

        let transaction = miner
            .create_transaction(recipient.address().clone(), 0.5)
            .unwrap();
        blockchain.add_transaction(transaction.clone()).unwrap();

        let block = blockchain.mine().unwrap();
        let genesis_hash = blockchain.chain()[0].hash();

        assert_eq!(block.previous_hash, genesis_hash);
        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[0].is_reward());
        assert_eq!(block.transactions[1], transaction);
        assert!(blockchain.pending_transactions().is_empty());
        assert_eq!(blockchain.last_block(), Some(block));
    }

    #[test]
    fn test_mine_pending_skips_empty_pool() {
        let blockchain = ledger_for(&Wallet::new());

        assert!(blockchain.mine_pending().unwrap().is_none());
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_balance_after_mining() {
        let miner = Wallet::new();
        let blockchain = ledger_for(&miner);

        for _ in 0..3 {
            blockchain.mine().unwrap();
        }

        assert_eq!(blockchain.calculate_balance(miner.address()), 3.0 * DEFAULT_MINING_REWARD);
        assert_eq!(blockchain.calculate_balance(Wallet::new().address()), 0.0);
    }

    #[test]
    fn test_balance_debits_sender() {
        let miner = Wallet::new();
        let recipient = Wallet::new();
        let blockchain = ledger_for(&miner);
        blockchain.mine().unwrap();

        let transaction = miner
            .create_transaction(recipient.address().clone(), 0.25)
            .unwrap();
        blockchain.add_transaction(transaction).unwrap();
        blockchain.mine().unwrap();

        assert_eq!(blockchain.calculate_balance(miner.address()), 1.75);
        assert_eq!(blockchain.calculate_balance(recipient.address()), 0.25);
    }

    #[test]
    fn test_proof_of_work_meets_target() {
        let blockchain = ledger_for(&Wallet::new());
        let tail = blockchain.chain()[0].hash();

        let block = blockchain.proof_of_work(tail, Vec::new());

        assert!(block.meets_difficulty(blockchain.difficulty()));
        assert_eq!(block.previous_hash, tail);
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn test_valid_proof_checks_target() {
        let easy = Blockchain::with_params(Wallet::new().address().clone(), 0, 1.0);
        let candidate = easy.valid_proof(5, BlockHash::ZERO, &[]).unwrap();
        assert_eq!(candidate.nonce, 5);

        let impossible = Blockchain::with_params(Wallet::new().address().clone(), 65, 1.0);
        assert!(impossible.valid_proof(0, BlockHash::ZERO, &[]).is_none());
    }

    #[test]
    fn test_search_stops_when_aborted() {
        let impossible = Blockchain::with_params(Wallet::new().address().clone(), 65, 1.0);
        let result = impossible.search(BlockHash::ZERO, Vec::new(), || Err(BlockchainError::Aborted));
        assert!(matches!(result, Err(BlockchainError::Aborted)));
    }

    #[test]
    fn test_stale_block_is_discarded_and_pool_kept() {
        let miner = Wallet::new();
        let blockchain = Blockchain::with_params(miner.address().clone(), 1, 1.0);
        let transaction = miner
            .create_transaction(Wallet::new().address().clone(), 1.0)
            .unwrap();
        blockchain.add_transaction(transaction.clone()).unwrap();

        let genesis = blockchain.chain()[0].hash();
        let stale = blockchain.proof_of_work(genesis, vec![transaction.clone()]);

        // Another block lands on the tail before the stale one is committed
        let tip = blockchain.proof_of_work(genesis, Vec::new());
        blockchain.commit(tip, &[]).unwrap();

        let result = blockchain.commit(stale, &[transaction.clone()]);
        assert!(matches!(
            result,
            Err(BlockchainError::StaleTip { expected }) if expected == genesis
        ));
        assert_eq!(blockchain.len(), 2);
        assert_eq!(blockchain.pending_transactions(), vec![transaction]);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_chain_replacement_aborts_in_flight_mining() {
        let miner = Wallet::new();
        let blockchain = Blockchain::with_params(miner.address().clone(), 64, 1.0);
        let transaction = miner
            .create_transaction(Wallet::new().address().clone(), 1.0)
            .unwrap();
        blockchain.add_transaction(transaction.clone()).unwrap();

        // Same ledger, validating replacements at a difficulty a test can mine
        let mut replacer = blockchain.clone();
        replacer.difficulty = 1;
        let peer = Blockchain::with_params(Wallet::new().address().clone(), 1, 1.0);

        let mining = {
            let blockchain = blockchain.clone();
            thread::spawn(move || blockchain.mine())
        };

        // Keep adopting longer chains until one lands after the search has started
        for _ in 0..500 {
            if mining.is_finished() {
                break;
            }
            peer.mine().unwrap();
            replacer.replace_chain(peer.chain()).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(mining.is_finished(), "mining was never aborted");

        let result = mining.join().unwrap();
        assert!(matches!(result, Err(BlockchainError::Aborted)));
        assert_eq!(blockchain.pending_transactions(), vec![transaction]);
        assert_eq!(blockchain.chain(), peer.chain());
        assert!(replacer.is_valid());
    }

    #[test]
    fn test_uppercase_recipient_from_the_wire_is_credited() {
        let miner = Wallet::new();
        let recipient = Wallet::new();
        let blockchain = Blockchain::with_params(miner.address().clone(), 1, 1.0);

        let unsigned = serde_json::json!({
            "sender_public_key": miner.public_key(),
            "recipient_address": recipient.address().0.to_uppercase(),
            "value": 5.0,
            "signature": null,
        });
        let mut transaction: Transaction = serde_json::from_value(unsigned).unwrap();
        assert_eq!(&transaction.recipient_address, recipient.address());
        transaction.sign(&miner).unwrap();

        blockchain.add_transaction(transaction).unwrap();
        blockchain.mine().unwrap();

        let upper = recipient.address().0.to_uppercase().parse::<Address>().unwrap();
        assert_eq!(blockchain.calculate_balance(&upper), 5.0);
    }

    #[test]
    fn test_transactions_admitted_during_mining_stay_pooled() {
        let miner = Wallet::new();
        let blockchain = Blockchain::with_params(miner.address().clone(), 4, 1.0);
        let first = miner
            .create_transaction(Wallet::new().address().clone(), 1.0)
            .unwrap();
        blockchain.add_transaction(first.clone()).unwrap();

        let mining = {
            let blockchain = blockchain.clone();
            thread::spawn(move || blockchain.mine())
        };
        let late = miner
            .create_transaction(Wallet::new().address().clone(), 2.0)
            .unwrap();
        blockchain.add_transaction(late.clone()).unwrap();

        let block = mining.join().unwrap().unwrap();
        let pending = blockchain.pending_transactions();

        assert!(block.transactions.contains(&first));
        assert!(!pending.contains(&first));
        if block.transactions.contains(&late) {
            assert!(pending.is_empty());
        } else {
            assert_eq!(pending, vec![late]);
        }
    }

    #[test]
    fn test_replace_chain_requires_longer_valid_chain() {
        let blockchain = ledger_for(&Wallet::new());
        let other = ledger_for(&Wallet::new());
        other.mine().unwrap();
        other.mine().unwrap();

        let mut broken = other.chain();
        broken[1].nonce += 1;
        assert!(matches!(
            blockchain.replace_chain(broken),
            Err(BlockchainError::InvalidChain(_))
        ));

        assert_eq!(blockchain.replace_chain(other.chain()).unwrap(), 3);
        assert_eq!(blockchain.chain(), other.chain());

        assert!(matches!(
            blockchain.replace_chain(other.chain()),
            Err(BlockchainError::NotLonger { candidate: 3, local: 3 })
        ));
    }

    #[test]
    fn test_mining_after_replacement_links_to_new_tip() {
        let blockchain = ledger_for(&Wallet::new());
        let other = ledger_for(&Wallet::new());
        other.mine().unwrap();
        other.mine().unwrap();
        blockchain.replace_chain(other.chain()).unwrap();

        let block = blockchain.mine().unwrap();

        assert_eq!(block.previous_hash, other.chain()[2].hash());
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_remove_mined_keeps_unmined_entries() {
        let wallet = Wallet::new();
        let a = wallet.create_transaction(Wallet::new().address().clone(), 1.0).unwrap();
        let b = wallet.create_transaction(Wallet::new().address().clone(), 2.0).unwrap();
        let c = wallet.create_transaction(Wallet::new().address().clone(), 3.0).unwrap();

        let mut pool = vec![a.clone(), b.clone(), c.clone()];
        remove_mined(&mut pool, &[a, b]);

        assert_eq!(pool, vec![c]);
    }

    #[test]
    fn test_peers_are_deduplicated() {
        let blockchain = ledger_for(&Wallet::new());

        assert!(blockchain.add_peer("http://localhost:8081"));
        assert!(!blockchain.add_peer("http://localhost:8081/"));
        assert!(blockchain.add_peer("http://localhost:8082"));
        assert_eq!(
            blockchain.peers(),
            vec!["http://localhost:8081", "http://localhost:8082"]
        );
    }
}
