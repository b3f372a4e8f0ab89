use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod node;

use blockchain::{Blockchain, ConsensusResolver, HttpPeerTransport, Wallet};
use config::NodeConfig;

// Build the ledger for this node, generating a reward wallet when no address is configured
fn initialize_blockchain(config: &NodeConfig) -> anyhow::Result<Blockchain> {
    let address = match config.reward_address().context("invalid reward address")? {
        Some(address) => address,
        None => {
            let wallet = Wallet::new();
            info!("Generated node wallet with address: {}", wallet.address());
            info!("Node wallet private key: {}", hex::encode(wallet.export_secret_key()));
            wallet.address().clone()
        }
    };

    let blockchain = Blockchain::with_params(address, config.difficulty, config.mining_reward);
    for peer in &config.peers {
        if blockchain.add_peer(peer) {
            info!("Registered peer {}", peer);
        }
    }

    Ok(blockchain)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::get_balance,
        api::handlers::run_consensus,
        api::handlers::validate_chain,
        api::handlers::get_peers,
        api::handlers::register_peer,
        api::handlers::create_wallet,
        api::handlers::create_wallet_transaction
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::PublicKey,
            blockchain::DigitalSignature,
            api::handlers::ChainResponse,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::BalanceResponse,
            api::handlers::ConsensusResponse,
            api::handlers::PeerRequest,
            api::handlers::PeersResponse,
            api::handlers::WalletResponse,
            api::handlers::WalletTransactionRequest
        )
    ),
    tags(
        (name = "proofchain", description = "Ledger node API endpoints")
    ),
    info(
        title = "Proofchain API",
        version = "0.1.0",
        description = "Proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();
    let blockchain = initialize_blockchain(&config)?;

    let transport =
        HttpPeerTransport::new(config.peer_timeout()).context("failed to build peer client")?;
    let resolver = Arc::new(ConsensusResolver::new(transport));

    node::spawn_mining_loop(blockchain.clone(), config.mining_interval());
    node::spawn_consensus_loop(blockchain.clone(), resolver.clone(), config.consensus_interval());

    let blockchain_data = web::Data::new(blockchain);
    let resolver_data = web::Data::from(resolver);

    let (host, port) = config.bind_address();
    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain_data.clone())
            .app_data(resolver_data.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
