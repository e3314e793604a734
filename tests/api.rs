mod common;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use carboncoin::api::configure_routes;
use carboncoin::blockchain::Wallet;
use carboncoin::node::Node;
use carboncoin::registry::Registry;

use common::{mine, Mesh};

macro_rules! app {
    ($node:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from(Arc::clone(&$node)))
                .configure(configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn health_and_address() {
    let mesh = Mesh::new();
    let node = mesh.node(3000);
    let app = app!(node);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["role"], "miner");

    let req = test::TestRequest::get().uri("/address").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["address"], node.address().as_str());
    assert_eq!(body["public_key"].as_str().unwrap().len(), 128);
}

#[actix_web::test]
async fn miner_mines_and_reports_balance() {
    let mesh = Mesh::new();
    let node = mesh.node(3000);
    let app = app!(node);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/mine").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["block"]["index"], 1);
    assert_eq!(body["block"]["transactions"][0]["tx_type"], "coinbase");

    let req = test::TestRequest::get().uri("/balance").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["confirmed"], 10.0);
    assert_eq!(body["symbol"], "CC");

    let req = test::TestRequest::get().uri("/chain").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["length"], 2);
}

#[actix_web::test]
async fn privileged_endpoints_check_role() {
    let mesh = Mesh::new();
    let user = mesh.node(5000);
    let app = app!(user);

    for (method, uri) in [
        ("GET", "/mine"),
        ("POST", "/mining/start"),
        ("GET", "/autotransfer/status"),
        ("POST", "/assign_reward"),
        ("GET", "/rewards"),
    ] {
        let req = match method {
            "GET" => test::TestRequest::get().uri(uri),
            _ => test::TestRequest::post()
                .uri(uri)
                .set_json(json!({ "user_address": Wallet::generate().address() })),
        };
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", uri);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "authorization_error");
    }
}

#[actix_web::test]
async fn transfer_errors_are_typed() {
    let mesh = Mesh::new();
    let node = mesh.node(3000);
    mine(&node, 1).await;
    let app = app!(node);

    let req = test::TestRequest::post()
        .uri("/transfer")
        .set_json(json!({ "receiver": Wallet::generate().address(), "amount": 11.0 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "insufficient_balance");

    let req = test::TestRequest::post()
        .uri("/transfer")
        .set_json(json!({ "receiver": "not-an-address", "amount": 1.0 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "validation_error");

    let req = test::TestRequest::post()
        .uri("/transfer")
        .set_json(json!({ "receiver": Wallet::generate().address(), "amount": 4.0 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get().uri("/mempool").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 1);
}

#[actix_web::test]
async fn signed_transactions_are_verified() {
    let mesh = Mesh::new();
    let node = mesh.node(3000);
    mine(&node, 1).await;
    let app = app!(node);

    let receiver = Wallet::generate();
    let mut tx = carboncoin::blockchain::Transaction::build(
        node.address().clone(),
        receiver.address().clone(),
        2.0,
    );
    tx.sign(node.wallet()).unwrap();

    let mut forged = tx.clone();
    forged.amount = 3.0;
    forged.tx_id = forged.compute_id();
    let req = test::TestRequest::post()
        .uri("/transaction")
        .set_json(&forged)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "signature_error");

    let req = test::TestRequest::post().uri("/transaction").set_json(&tx).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post().uri("/transaction").set_json(&tx).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::post()
        .uri("/receive_transaction")
        .set_json(&tx)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "already_pending");
}

#[actix_web::test]
async fn confirmed_transactions_are_not_readmitted() {
    let mesh = Mesh::new();
    let node = mesh.node(3000);
    mine(&node, 1).await;
    let tx = node
        .create_transfer(Wallet::generate().address().clone(), 2.0)
        .await
        .unwrap();
    mine(&node, 1).await;
    assert!(node.mempool().is_empty());
    let app = app!(node);

    let req = test::TestRequest::post()
        .uri("/receive_transaction")
        .set_json(&tx)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "already_confirmed");

    let req = test::TestRequest::post().uri("/transaction").set_json(&tx).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "duplicate");
    assert!(node.mempool().is_empty());
}

#[actix_web::test]
async fn tampered_block_is_a_conflict() {
    let mesh = Mesh::new();
    let miner = mesh.node(3000);
    let follower = mesh.node(3001);
    mine(&miner, 1).await;
    let app = app!(follower);

    let mut block = miner.chain()[1].clone();
    block.nonce += 1;
    let req = test::TestRequest::post()
        .uri("/receive_block")
        .set_json(&block)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "chain_integrity_error");

    let req = test::TestRequest::post()
        .uri("/receive_block")
        .set_json(&miner.chain()[1])
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "appended");
}

#[actix_web::test]
async fn collection_rewards() {
    let mesh = Mesh::new();
    let collection = mesh.node(7000);
    mine(&collection, 1).await;
    let app = app!(collection);

    let user = Wallet::generate();
    let req = test::TestRequest::post()
        .uri("/assign_reward")
        .set_json(json!({ "user_address": user.address(), "amount": 2.5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "pending");
    let reward_id = body["reward_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/reward_status/{}", reward_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["amount"], 2.5);
    assert_eq!(body["user_address"], user.address().as_str());

    let req = test::TestRequest::get().uri("/reward_status/unknown").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn gateway_wallets_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = Mesh::new();
    let miner = mesh.node(3000);
    mine(&miner, 1).await;

    let node = Node::builder(common::settings(5000))
        .client(mesh.clone())
        .registry(Registry::open(dir.path()).unwrap())
        .build()
        .unwrap();
    node.add_peer(miner.url(), false).await.unwrap();
    node.resolve_conflicts().await;
    let app = app!(node);

    let req = test::TestRequest::post()
        .uri("/create_wallet")
        .set_json(json!({ "userName": " Alice@Example.com ", "userId": "42" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["label"], "alice@example.com");
    assert_eq!(body["private_key"].as_str().unwrap().len(), 64);

    let req = test::TestRequest::post()
        .uri("/create_wallet")
        .set_json(json!({ "userName": "ALICE@example.com" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::post()
        .uri("/create_wallet")
        .set_json(json!({ "userName": "al" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri(&format!("/api/balance?wallet={}", miner.address()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], 10.0);
    assert_eq!(body["chain_length"], 2);

    let req = test::TestRequest::get()
        .uri(&format!("/api/transactions?wallet={}&limit=5", miner.address()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["transactions"][0]["direction"], "received");

    let req = test::TestRequest::get().uri("/api/balance").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn gateway_wallet_info_and_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = Mesh::new();
    let miner = mesh.node(3000);
    mine(&miner, 1).await;

    let node = Node::builder(common::settings(5000))
        .client(mesh.clone())
        .registry(Registry::open(dir.path()).unwrap())
        .build()
        .unwrap();
    node.add_peer(miner.url(), false).await.unwrap();
    node.resolve_conflicts().await;
    node.claim_session().unwrap();
    let registry = node.registry().unwrap();
    registry.start_session(3000, miner.address()).unwrap();
    registry.start_session(7000, Wallet::generate().address()).unwrap();
    let app = app!(node);

    let req = test::TestRequest::get()
        .uri(&format!("/api/wallet/info?wallet={}", miner.address()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], 10.0);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["active_port"], 3000);
    assert_eq!(body["stats"]["total_transactions"], 1);
    assert_eq!(body["stats"]["total_received"], 10.0);
    assert_eq!(body["recent_transactions"][0]["tx_type"], "coinbase");

    let stranger = Wallet::generate();
    let req = test::TestRequest::get()
        .uri(&format!("/api/wallet/info?wallet={}", stranger.address()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["is_active"], false);
    assert!(body["active_port"].is_null());

    let req = test::TestRequest::get().uri("/api/sessions").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["sessions"][0]["port"], 5000);
    assert_eq!(body["sessions"][0]["type"], "user");
    assert_eq!(body["sessions"][1]["type"], "collection");

    let req = test::TestRequest::get().uri("/api/chain/info").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["chain_length"], 2);
    assert_eq!(body["latest_block"]["index"], 1);
    assert_eq!(body["latest_block"]["transactions_count"], 1);
    assert_eq!(body["latest_block"]["hash"], miner.chain()[1].hash.as_str());
}
