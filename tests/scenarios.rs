mod common;

use carboncoin::blockchain::{TransactionError, TransactionKind, Wallet};
use carboncoin::node::{NodeError, RewardStatus, StopSignal};

use common::{link, mine, settings, Mesh};

#[tokio::test]
async fn first_block_pays_the_miner() {
    let mesh = Mesh::new();
    let miner = mesh.node(3000);

    mine(&miner, 1).await;

    let chain = miner.chain();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].transactions.len(), 1);
    assert_eq!(chain[1].transactions[0].kind, TransactionKind::Coinbase);
    assert_eq!(miner.balance(miner.address()).confirmed, 10.0);
    assert!(chain[1].hash.starts_with('0'));
}

#[tokio::test]
async fn transfer_is_confirmed_by_another_miner() {
    let mesh = Mesh::new();
    let alice = mesh.node(3000);
    let bob = mesh.node(3001);
    let user = mesh.node(5000);

    mine(&alice, 2).await;
    link(&alice, &bob).await;
    link(&alice, &user).await;
    link(&bob, &user).await;
    bob.resolve_conflicts().await;
    user.resolve_conflicts().await;

    let tx = alice
        .create_transfer(user.address().clone(), 5.0)
        .await
        .unwrap();
    assert_eq!(bob.mempool().len(), 1);

    let block = bob.mine_block(&StopSignal::new()).await.unwrap().unwrap();
    assert_eq!(block.transactions[1].tx_id, tx.tx_id);

    for node in [&alice, &bob, &user] {
        assert_eq!(node.chain_length(), 4);
        assert!(node.mempool().is_empty());
        assert_eq!(node.balance(alice.address()).confirmed, 15.0);
        assert_eq!(node.balance(user.address()).confirmed, 5.0);
        assert_eq!(node.balance(bob.address()).confirmed, 10.0);
    }
}

#[tokio::test]
async fn overdraft_never_reaches_the_mempool() {
    let mesh = Mesh::new();
    let alice = mesh.node(3000);
    let bob = mesh.node(3001);
    link(&alice, &bob).await;

    mine(&alice, 2).await;
    assert_eq!(bob.chain_length(), 3);

    let receiver = Wallet::generate().address().clone();
    let err = alice.create_transfer(receiver, 25.0).await.unwrap_err();

    match err {
        NodeError::Transaction(TransactionError::InsufficientBalance {
            required,
            available,
        }) => {
            assert_eq!(required, 25.0);
            assert_eq!(available, 20.0);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(alice.mempool().is_empty());
    assert!(bob.mempool().is_empty());
}

#[tokio::test]
async fn auto_transfer_fires_once_threshold_is_crossed() {
    let mesh = Mesh::new();

    let mut miner_settings = settings(3000);
    miner_settings.economics.mining_reward = 5.0;
    let miner = mesh.node_with(miner_settings);

    let mut collection_settings = settings(7000);
    collection_settings.economics.mining_reward = 5.0;
    let collection = mesh.node_with(collection_settings);
    link(&miner, &collection).await;

    mine(&miner, 19).await;
    assert_eq!(miner.balance(miner.address()).confirmed, 95.0);
    assert!(miner.auto_transfer_tick().await.unwrap().is_none());

    mine(&miner, 2).await;
    assert_eq!(miner.balance(miner.address()).confirmed, 105.0);

    let tx = miner.auto_transfer_tick().await.unwrap().unwrap();
    assert_eq!(tx.kind, TransactionKind::AutoTransfer);
    assert_eq!(&tx.receiver, collection.address());
    assert_eq!(tx.amount, 100.0);
    assert_eq!(collection.mempool().len(), 1);

    // nothing more to forward while the first transfer is pending
    assert!(miner.auto_transfer_tick().await.unwrap().is_none());

    mine(&miner, 1).await;
    assert_eq!(collection.balance(collection.address()).confirmed, 100.0);
    assert_eq!(collection.balance(miner.address()).confirmed, 10.0);
}

#[tokio::test]
async fn reward_is_confirmed_once_mined() {
    let mesh = Mesh::new();
    let miner = mesh.node(3000);
    let collection = mesh.node(7000);
    let user = Wallet::generate();
    link(&miner, &collection).await;

    mine(&miner, 3).await;
    miner
        .create_transfer(collection.address().clone(), 20.0)
        .await
        .unwrap();
    mine(&miner, 1).await;
    assert_eq!(collection.balance(collection.address()).confirmed, 20.0);

    let record = collection
        .assign_reward(user.address().clone(), None)
        .await
        .unwrap();
    assert_eq!(record.status, RewardStatus::Pending);
    assert_eq!(miner.mempool().len(), 1);

    mine(&miner, 1).await;

    let record = collection.reward_status(&record.reward_id).unwrap();
    assert_eq!(record.status, RewardStatus::Confirmed);
    assert_eq!(record.block_index, Some(5));
    assert_eq!(collection.balance(user.address()).confirmed, 5.0);
}

#[tokio::test]
async fn supply_matches_minted_coins() {
    let mesh = Mesh::new();
    let miner = mesh.node(3000);
    let other = Wallet::generate();

    mine(&miner, 3).await;
    miner
        .create_transfer(other.address().clone(), 7.5)
        .await
        .unwrap();
    mine(&miner, 1).await;

    let report = miner.balances();
    let sum: f64 = report.balances.values().sum();
    assert_eq!(report.total_supply, 40.0);
    assert!((sum - report.total_supply).abs() < 1e-9);
}
