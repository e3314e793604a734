use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Node, NodeError, ServiceState, StopSignal};
use crate::blockchain::ledger::{BalanceSheet, BALANCE_EPSILON};
use crate::blockchain::{Block, ChainIntegrityError, Transaction};
use crate::network::consensus::{self, ConsensusOutcome};
use crate::network::gossip;
use crate::network::peers::normalize_url;
use crate::network::PeerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// The block extended the local chain
    Appended,
    /// The block did not fit the tip; a consensus round ran instead
    Resolved,
    /// The block is at or below the local tip
    AlreadyProcessed,
}

/// Answer to a block pushed by a peer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockReceipt {
    pub status: ReceiptStatus,
    pub index: u64,
    pub consensus: Option<ConsensusOutcome>,
}

/// Result of one peer synchronisation round
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub consensus: ConsensusOutcome,
    /// Pending transactions pulled from peers' mempools
    pub transactions_pulled: usize,
    /// Peers newly learned from other peers
    pub peers_discovered: usize,
}

impl Node {
    /// Adds `url` to the peer set. A newly added peer is told about this
    /// node when `announce_back` is set. Returns whether the peer was new.
    pub async fn add_peer(&self, url: &str, announce_back: bool) -> Result<bool, NodeError> {
        let url = normalize_url(url)?;
        let added = self.peers.write().add(&url)?;

        if added {
            info!("Added peer {}", url);
            if announce_back {
                if let Err(err) = self.client.announce(&url, &self.url).await {
                    warn!("Could not announce to {}: {}", url, err);
                }
            }
        }
        Ok(added)
    }

    /// Records a peer that announced itself. Announcing ourselves is not an
    /// error for the caller, it is simply ignored.
    pub fn accept_announcement(&self, url: &str) -> Result<bool, NodeError> {
        let url = normalize_url(url)?;
        match self.peers.write().add(&url) {
            Ok(added) => {
                if added {
                    info!("Peer {} announced itself", url);
                }
                Ok(added)
            }
            Err(PeerError::SelfPeer(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn remove_peer(&self, url: &str) -> bool {
        self.peers.write().remove(url)
    }

    /// Probes the configured bootstrap peers and connects to the ones that
    /// answer. Returns how many were added.
    pub async fn bootstrap(&self) -> usize {
        let candidates: Vec<String> = {
            let peers = self.peers.read();
            self.settings
                .network
                .bootstrap_peers
                .iter()
                .filter_map(|url| normalize_url(url).ok())
                .filter(|url| !peers.is_self(url) && !peers.contains(url))
                .collect()
        };

        let reachable = join_all(candidates.iter().map(|url| async move {
            match self.client.health(url).await {
                Ok(()) => Some(url.clone()),
                Err(err) => {
                    debug!("Bootstrap peer {} not reachable: {}", url, err);
                    None
                }
            }
        }))
        .await;

        let mut added = 0;
        for url in reachable.into_iter().flatten() {
            match self.add_peer(&url, true).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(err) => warn!("Could not add bootstrap peer {}: {}", url, err),
            }
        }
        info!("Bootstrap connected to {} peers", added);
        added
    }

    /// Learns peers from the current peers' lists
    pub async fn discover_peers(&self) -> usize {
        let known = self.peers();
        let found = gossip::discover(self.client.as_ref(), &known).await;

        let mut added = 0;
        for url in found {
            let is_new = {
                let peers = self.peers.read();
                !peers.is_self(&url) && !peers.contains(&url)
            };
            if is_new && matches!(self.add_peer(&url, true).await, Ok(true)) {
                added += 1;
            }
        }
        added
    }

    /// Longest-valid-chain round against every peer.
    ///
    /// A strictly longer valid chain replaces the local one. Pending
    /// transactions it confirms leave the mempool; user transactions from
    /// the discarded blocks go back to the mempool when still affordable.
    pub async fn resolve_conflicts(&self) -> ConsensusOutcome {
        let peers = self.peers();
        let (local_length, rules) = {
            let state = self.state.read();
            (state.chain.len(), state.chain.rules().clone())
        };

        let collected =
            consensus::collect_candidates(self.client.as_ref(), &peers, &rules, local_length).await;
        self.note_reachability(&collected.reachable, &collected.unreachable);

        let mut replaced_by = None;
        if let Some(best) = consensus::choose_longest(collected.candidates) {
            match self.install_chain(best.chain) {
                Ok(true) => replaced_by = Some(best.peer),
                Ok(false) => debug!("Chain from {} no longer longer than ours", best.peer),
                Err(err) => warn!("Rejected chain from {}: {}", best.peer, err),
            }
        }

        if replaced_by.is_some() {
            self.persist_chain();
            self.refresh_rewards();
        }

        consensus::outcome(
            replaced_by.as_deref(),
            self.chain_length(),
            peers.len(),
            collected.skipped,
        )
    }

    /// Resets the failure count of peers that answered and drops the ones
    /// that have been unreachable for too many rounds
    fn note_reachability(&self, reachable: &[String], unreachable: &[String]) {
        let mut peers = self.peers.write();
        for url in reachable {
            peers.record_success(url);
        }
        for url in unreachable {
            if peers.record_failure(url) {
                warn!("Dropped peer {} after repeated failures", url);
            }
        }
    }

    /// Swaps in `candidate` if it is longer and valid, then reconciles the
    /// mempool in the same critical section
    pub(crate) fn install_chain(&self, candidate: Vec<Block>) -> Result<bool, ChainIntegrityError> {
        let mut state = self.state.write();
        let previous = state.chain.blocks().to_vec();

        if !state.chain.replace_if_longer(candidate)? {
            return Ok(false);
        }

        let confirmed = state.chain.confirmed_tx_ids();
        state.mempool.retain(|tx| !confirmed.contains(&tx.tx_id));

        let orphaned: Vec<Transaction> = previous
            .iter()
            .flat_map(|block| block.user_transactions())
            .filter(|tx| !confirmed.contains(&tx.tx_id))
            .cloned()
            .collect();

        if !orphaned.is_empty() {
            let sheet = BalanceSheet::from_chain(state.chain.blocks());
            let mut restored = 0;
            for tx in orphaned {
                let affordable = tx.sender.as_ref().map_or(false, |sender| {
                    sheet.balance(sender) - state.mempool.outgoing(sender, None) + BALANCE_EPSILON
                        >= tx.amount
                });
                if affordable && state.mempool.insert(tx) {
                    restored += 1;
                }
            }
            info!("Returned {} orphaned transactions to the mempool", restored);
        }

        Ok(true)
    }

    /// Handles a block pushed by a peer.
    ///
    /// A block that extends the tip is appended. A block further ahead, or
    /// one that does not link to the tip, triggers a consensus round.
    pub async fn receive_block(&self, block: Block) -> Result<BlockReceipt, NodeError> {
        let index = block.index;
        let tip_index = self.state.read().chain.tip().index;

        if index <= tip_index {
            return Ok(BlockReceipt {
                status: ReceiptStatus::AlreadyProcessed,
                index,
                consensus: None,
            });
        }

        if index > tip_index + 1 {
            info!("Block {} is ahead of our tip {}, resolving", index, tip_index);
            return Ok(self.resolve_for(index).await);
        }

        let appended = {
            let mut state = self.state.write();
            match state.chain.try_append(block.clone()) {
                Ok(()) => {
                    let included: HashSet<&str> =
                        block.user_transactions().map(|tx| tx.tx_id.as_str()).collect();
                    state.mempool.evict(included);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        match appended {
            Ok(()) => {
                info!("Accepted block {} from peer", index);
                self.block_accepted(&block);
                Ok(BlockReceipt {
                    status: ReceiptStatus::Appended,
                    index,
                    consensus: None,
                })
            }
            Err(ChainIntegrityError::IndexMismatch { .. }) => Ok(BlockReceipt {
                status: ReceiptStatus::AlreadyProcessed,
                index,
                consensus: None,
            }),
            Err(ChainIntegrityError::BrokenLink { .. }) => {
                info!("Block {} does not link to our tip, resolving", index);
                Ok(self.resolve_for(index).await)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_for(&self, index: u64) -> BlockReceipt {
        let outcome = self.resolve_conflicts().await;
        BlockReceipt {
            status: ReceiptStatus::Resolved,
            index,
            consensus: Some(outcome),
        }
    }

    /// Pulls peers' pending transactions into the local mempool
    pub async fn pull_mempools(&self) -> usize {
        let peers = self.peers();
        let client = self.client.as_ref();
        let pools = join_all(peers.iter().map(|peer| async move {
            match client.fetch_mempool(peer).await {
                Ok(transactions) => transactions,
                Err(err) => {
                    debug!("Could not fetch mempool from {}: {}", peer, err);
                    Vec::new()
                }
            }
        }))
        .await;

        let mut pulled = 0;
        for tx in pools.into_iter().flatten() {
            match self.admit_transaction(tx) {
                Ok(super::Admission::Accepted) => pulled += 1,
                Ok(_) => {}
                Err(err) => debug!("Ignoring peer transaction: {}", err),
            }
        }
        pulled
    }

    /// One synchronisation round: consensus, mempool pull, peer discovery
    pub async fn sync_once(&self) -> SyncReport {
        let consensus = self.resolve_conflicts().await;
        let transactions_pulled = self.pull_mempools().await;
        let peers_discovered = self.discover_peers().await;

        SyncReport {
            consensus,
            transactions_pulled,
            peers_discovered,
        }
    }

    async fn sync_loop(self: Arc<Self>, stop: StopSignal) {
        if self.settings.network.sync_on_start {
            self.sync_once().await;
        }

        let interval = self.settings.network.sync_interval();
        while stop.sleep(interval).await {
            let report = self.sync_once().await;
            if report.consensus.chain_replaced || report.transactions_pulled > 0 {
                debug!(
                    "Sync: chain length {}, {} transactions pulled",
                    report.consensus.length, report.transactions_pulled
                );
            }
        }
        info!("Sync loop stopped");
    }

    pub fn start_sync(self: &Arc<Self>) -> bool {
        let node = Arc::clone(self);
        self.sync.start(move |stop| node.sync_loop(stop))
    }

    pub fn stop_sync(&self) -> bool {
        self.sync.stop()
    }

    pub fn sync_state(&self) -> ServiceState {
        self.sync.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::offline_node;

    #[tokio::test]
    async fn test_receive_next_block() {
        let miner = offline_node(3000);
        let follower = offline_node(3001);
        let block = miner.mine_block(&StopSignal::new()).await.unwrap().unwrap();

        let receipt = follower.receive_block(block.clone()).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Appended);
        assert_eq!(follower.chain(), miner.chain());

        let again = follower.receive_block(block).await.unwrap();
        assert_eq!(again.status, ReceiptStatus::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_receive_block_ahead_triggers_consensus() {
        let miner = offline_node(3000);
        let follower = offline_node(3001);
        miner.mine_block(&StopSignal::new()).await.unwrap();
        let ahead = miner.mine_block(&StopSignal::new()).await.unwrap().unwrap();

        let receipt = follower.receive_block(ahead).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Resolved);
        assert_eq!(follower.chain_length(), 1);
    }

    #[tokio::test]
    async fn test_receive_tampered_block_rejected() {
        let miner = offline_node(3000);
        let follower = offline_node(3001);
        let mut block = miner.mine_block(&StopSignal::new()).await.unwrap().unwrap();
        block.transactions[0].amount = 1_000.0;

        assert!(matches!(
            follower.receive_block(block).await.unwrap_err(),
            NodeError::ChainIntegrity(_)
        ));
        assert_eq!(follower.chain_length(), 1);
    }

    #[tokio::test]
    async fn test_peer_management() {
        let node = offline_node(3000);

        assert!(node.add_peer("http://localhost:3001/", false).await.unwrap());
        assert!(!node.add_peer("http://localhost:3001", false).await.unwrap());
        assert!(node.add_peer("http://localhost:3000", false).await.is_err());
        assert!(!node.accept_announcement("http://127.0.0.1:3000").unwrap());
        assert!(node.add_peer("ftp://nowhere", false).await.is_err());

        assert_eq!(node.peers(), vec!["http://localhost:3001".to_string()]);
        assert!(node.remove_peer("http://localhost:3001"));
    }

    #[tokio::test]
    async fn test_resolve_with_unreachable_peers() {
        let node = offline_node(3000);
        node.add_peer("http://localhost:3001", false).await.unwrap();

        let outcome = node.resolve_conflicts().await;
        assert!(!outcome.chain_replaced);
        assert_eq!(outcome.peers_queried, 1);
        assert_eq!(outcome.peers_skipped, 1);
        assert_eq!(outcome.length, 1);
    }
}
