use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Parser;

use crate::blockchain::chain::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD};
use crate::blockchain::crypto::CryptoError;
use crate::blockchain::Address;

/// Command line and environment configuration for a node
#[derive(Debug, Clone, Parser)]
#[command(name = "proofchain", version, about = "Proof-of-work ledger node")]
pub struct NodeConfig {
    /// Interface the HTTP API binds to
    #[arg(long, env = "PROOFCHAIN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port the HTTP API binds to
    #[arg(short, long, env = "PROOFCHAIN_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address credited with mining rewards; a fresh wallet is generated when omitted
    #[arg(long, env = "PROOFCHAIN_ADDRESS")]
    pub address: Option<String>,

    /// Base URL of a peer node (repeatable)
    #[arg(long = "peer", env = "PROOFCHAIN_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Leading hex zeros required in a block hash
    #[arg(
        long,
        default_value_t = DEFAULT_DIFFICULTY,
        value_parser = RangedU64ValueParser::<usize>::new().range(0..=64)
    )]
    pub difficulty: usize,

    /// Value of each block's reward transaction
    #[arg(long, default_value_t = DEFAULT_MINING_REWARD, value_parser = parse_reward)]
    pub mining_reward: f64,

    /// Seconds between automatic mining attempts
    #[arg(
        long,
        default_value_t = 10,
        value_parser = RangedU64ValueParser::<u64>::new().range(1..)
    )]
    pub mining_interval_secs: u64,

    /// Seconds between consensus rounds
    #[arg(
        long,
        default_value_t = 30,
        value_parser = RangedU64ValueParser::<u64>::new().range(1..)
    )]
    pub consensus_interval_secs: u64,

    /// Per-request timeout when fetching peer chains
    #[arg(
        long,
        default_value_t = 5,
        value_parser = RangedU64ValueParser::<u64>::new().range(1..)
    )]
    pub peer_timeout_secs: u64,
}

// Rewards are served to peers as JSON, which has no NaN or infinity
fn parse_reward(text: &str) -> Result<f64, String> {
    let reward = text.parse::<f64>().map_err(|e| e.to_string())?;
    if !reward.is_finite() || reward < 0.0 {
        return Err(format!("expected a finite, non-negative amount, got {}", text));
    }
    Ok(reward)
}

impl NodeConfig {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// The configured reward address, if one was given
    pub fn reward_address(&self) -> Result<Option<Address>, CryptoError> {
        self.address.as_deref().map(str::parse::<Address>).transpose()
    }

    pub fn mining_interval(&self) -> Duration {
        Duration::from_secs(self.mining_interval_secs)
    }

    pub fn consensus_interval(&self) -> Duration {
        Duration::from_secs(self.consensus_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}
