use actix_web::web;

use super::{collection, gateway, handlers, miner};

/// Configures the API routes
///
/// Privileged routes are registered on every node; their handlers refuse
/// requests when the node's role lacks the capability.
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/health", web::get().to(handlers::health))
        .route("/address", web::get().to(handlers::address))
        .route("/balance", web::get().to(handlers::balance))
        .route("/balances", web::get().to(handlers::balances))
        .route("/chain", web::get().to(handlers::chain))
        .route("/mempool", web::get().to(handlers::mempool))
        .route("/stats", web::get().to(handlers::stats))
        .route("/peers", web::get().to(handlers::peers))
        .route("/add_peer", web::post().to(handlers::add_peer))
        .route("/announce_peer", web::post().to(handlers::announce_peer))
        .route("/consensus", web::get().to(handlers::consensus))
        .route("/sync", web::post().to(handlers::sync))
        .route("/transactions", web::get().to(handlers::transactions))
        .route("/transactions/{address}", web::get().to(handlers::transactions_for))
        .route("/transfer", web::post().to(handlers::transfer))
        .route("/transaction", web::post().to(handlers::submit_transaction))
        .route("/receive_transaction", web::post().to(handlers::receive_transaction))
        .route("/receive_block", web::post().to(handlers::receive_block))
        .route("/save", web::post().to(handlers::save))
        .route("/shutdown", web::post().to(handlers::shutdown));

    // miner
    cfg.route("/mine", web::get().to(miner::mine))
        .route("/mining/start", web::post().to(miner::start_mining))
        .route("/mining/stop", web::post().to(miner::stop_mining))
        .route("/mining/status", web::get().to(miner::mining_status))
        .route("/miner/start", web::post().to(miner::start_mining))
        .route("/miner/stop", web::post().to(miner::stop_mining))
        .route("/miner/status", web::get().to(miner::mining_status))
        .route("/autotransfer/start", web::post().to(miner::start_auto_transfer))
        .route("/autotransfer/stop", web::post().to(miner::stop_auto_transfer))
        .route("/autotransfer/status", web::get().to(miner::auto_transfer_status));

    // collection
    cfg.route("/assign_reward", web::post().to(collection::assign_reward))
        .route("/reward_status/{reward_id}", web::get().to(collection::reward_status))
        .route("/rewards", web::get().to(collection::rewards));

    // gateway
    cfg.route("/create_wallet", web::post().to(gateway::create_wallet))
        .route("/api/balance", web::get().to(gateway::wallet_balance))
        .route("/api/transactions", web::get().to(gateway::wallet_transactions))
        .route("/api/wallet/info", web::get().to(gateway::wallet_info))
        .route("/api/sessions", web::get().to(gateway::sessions))
        .route("/api/chain/info", web::get().to(gateway::chain_info));
}
