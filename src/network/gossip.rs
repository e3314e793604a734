// Best-effort fan-out to peers. Failures are logged and never returned.

use futures::future::join_all;
use log::{debug, warn};

use super::client::PeerClient;
use crate::blockchain::{Block, Transaction};

/// Sends `transaction` to every peer, returning how many accepted it
pub async fn broadcast_transaction(
    client: &dyn PeerClient,
    peers: &[String],
    transaction: &Transaction,
) -> usize {
    let results = join_all(
        peers
            .iter()
            .map(|peer| async move { (peer, client.send_transaction(peer, transaction).await) }),
    )
    .await;

    count_delivered(results, "transaction", &transaction.tx_id)
}

/// Sends `block` to every peer, returning how many accepted it
pub async fn broadcast_block(client: &dyn PeerClient, peers: &[String], block: &Block) -> usize {
    let results = join_all(
        peers
            .iter()
            .map(|peer| async move { (peer, client.send_block(peer, block).await) }),
    )
    .await;

    count_delivered(results, "block", &block.hash)
}

fn count_delivered<E: std::fmt::Display>(
    results: Vec<(&String, Result<(), E>)>,
    what: &str,
    id: &str,
) -> usize {
    let total = results.len();
    let mut delivered = 0;
    for (peer, result) in results {
        match result {
            Ok(()) => delivered += 1,
            Err(err) => warn!("Failed to send {} {} to {}: {}", what, id, peer, err),
        }
    }
    debug!("{} {} delivered to {}/{} peers", what, id, delivered, total);
    delivered
}

/// Asks every peer for its peer list and returns the union
pub async fn discover(client: &dyn PeerClient, peers: &[String]) -> Vec<String> {
    let lists = join_all(peers.iter().map(|peer| async move {
        match client.fetch_peers(peer).await {
            Ok(list) => list,
            Err(err) => {
                debug!("Could not fetch peers from {}: {}", peer, err);
                Vec::new()
            }
        }
    }))
    .await;

    let mut found: Vec<String> = lists.into_iter().flatten().collect();
    found.sort();
    found.dedup();
    found
}
