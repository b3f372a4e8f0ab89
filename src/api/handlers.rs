use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Address, Block, Blockchain, BlockchainError, ConsensusResolver, Resolution, Transaction, Wallet,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Shared consensus resolver
pub type ResolverData = web::Data<ConsensusResolver>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// Hash of the new block
    pub hash: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Net amount after replaying the whole chain
    pub balance: f64,
}

/// Response for the consensus endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConsensusResponse {
    pub message: String,

    /// Whether a peer chain replaced the local one
    pub replaced: bool,

    /// Local chain length after the round
    pub length: usize,
}

/// Request for the peer registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeerRequest {
    /// Base URL of the peer, e.g. http://127.0.0.1:8081
    pub address: String,
}

/// Response for the peers endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeersResponse {
    pub peers: Vec<String>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's public key (base58)
    pub public_key: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Request for the wallet transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletTransactionRequest {
    /// The sender's private key (hex encoded)
    pub private_key: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub value: f64,
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

fn admit(blockchain: &Blockchain, transaction: Transaction) -> HttpResponse {
    match blockchain.add_transaction(transaction) {
        Ok(()) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction added to pool".to_string(),
        }),
        Err(err) => bad_request(format!("Failed to add transaction: {}", err)),
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.chain();
    let is_valid = blockchain.is_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.pending_transactions())
}

/// Submit a signed transaction
///
/// The transaction is verified and added to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction added to the pool", body = TransactionResponse),
        (status = 400, description = "Invalid transaction")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    let transaction = transaction.into_inner();
    // Rewards are only ever created by the miner
    if transaction.is_reward() {
        return bad_request("Transaction must carry a sender key and signature".to_string());
    }
    admit(&blockchain, transaction)
}

/// Mine a new block
///
/// Creates a new block with all pending transactions plus the mining reward
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 409, description = "The chain changed while mining"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(blockchain: BlockchainData) -> impl Responder {
    let ledger = blockchain.get_ref().clone();

    match web::block(move || ledger.mine()).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New block mined".to_string(),
            hash: block.hash_hex(),
            block,
        }),
        Ok(Err(err @ (BlockchainError::StaleTip { .. } | BlockchainError::Aborted))) => {
            HttpResponse::Conflict().json(serde_json::json!({ "error": err.to_string() }))
        }
        Ok(Err(err)) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": format!("Mining failed: {}", err) })),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": "Mining failed" }))
        }
    }
}

/// Get the balance of an address
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(
        ("address" = String, Path, description = "Hex address to replay the chain for")
    ),
    responses(
        (status = 200, description = "Balance computed", body = BalanceResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_balance(blockchain: BlockchainData, address: web::Path<String>) -> impl Responder {
    let address = match address.into_inner().parse::<Address>() {
        Ok(address) => address,
        Err(err) => return bad_request(err.to_string()),
    };

    let balance = blockchain.calculate_balance(&address);
    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Run a consensus round
///
/// Adopts the longest valid chain among the known peers if it beats the local chain
#[utoipa::path(
    post,
    path = "/api/v1/consensus",
    responses(
        (status = 200, description = "Consensus round finished", body = ConsensusResponse)
    )
)]
pub async fn run_consensus(blockchain: BlockchainData, resolver: ResolverData) -> impl Responder {
    let response = match resolver.resolve(&blockchain).await {
        Resolution::Replaced { length } => ConsensusResponse {
            message: "Chain replaced with longer chain".to_string(),
            replaced: true,
            length,
        },
        Resolution::Authoritative => ConsensusResponse {
            message: "Chain is authoritative".to_string(),
            replaced: false,
            length: blockchain.len(),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.is_valid())
}

/// List known peers
#[utoipa::path(
    get,
    path = "/api/v1/peers",
    responses(
        (status = 200, description = "Known peers", body = PeersResponse)
    )
)]
pub async fn get_peers(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(PeersResponse {
        peers: blockchain.peers(),
    })
}

/// Register a peer node
#[utoipa::path(
    post,
    path = "/api/v1/peers/register",
    request_body = PeerRequest,
    responses(
        (status = 201, description = "Peer registered", body = PeersResponse),
        (status = 200, description = "Peer was already known", body = PeersResponse),
        (status = 400, description = "Invalid peer URL")
    )
)]
pub async fn register_peer(
    blockchain: BlockchainData,
    peer_req: web::Json<PeerRequest>,
) -> impl Responder {
    match reqwest::Url::parse(&peer_req.address) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => return bad_request(format!("Invalid peer URL: {}", peer_req.address)),
    }

    let added = blockchain.add_peer(&peer_req.address);
    let response = PeersResponse {
        peers: blockchain.peers(),
    };

    if added {
        info!("Registered peer {}", peer_req.address);
        HttpResponse::Created().json(response)
    } else {
        HttpResponse::Ok().json(response)
    }
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair.
/// The private key is not stored by the node.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        public_key: wallet.public_key().0,
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Sign and submit a transaction
///
/// Signs a transfer with the supplied private key and adds it to the pool
#[utoipa::path(
    post,
    path = "/api/v1/wallet/transaction",
    request_body = WalletTransactionRequest,
    responses(
        (status = 201, description = "Transaction added to the pool", body = TransactionResponse),
        (status = 400, description = "Invalid key, recipient or transaction")
    )
)]
pub async fn create_wallet_transaction(
    blockchain: BlockchainData,
    req: web::Json<WalletTransactionRequest>,
) -> impl Responder {
    let private_key_bytes = match hex::decode(&req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => return bad_request("Invalid private key format. Must be a hex string.".to_string()),
    };

    let wallet = match Wallet::from_secret_key(&private_key_bytes) {
        Ok(wallet) => wallet,
        Err(err) => return bad_request(format!("Invalid private key: {}", err)),
    };

    let recipient = match req.recipient.parse::<Address>() {
        Ok(address) => address,
        Err(err) => return bad_request(format!("Invalid recipient: {}", err)),
    };

    match wallet.create_transaction(recipient, req.value) {
        Ok(transaction) => admit(&blockchain, transaction),
        Err(err) => bad_request(format!("Failed to sign transaction: {}", err)),
    }
}
