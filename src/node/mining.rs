use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info, warn};

use super::{LedgerState, Node, NodeError, ServiceState, StopSignal};
use crate::blockchain::ledger::BalanceSheet;
use crate::blockchain::{Block, Transaction};
use crate::network::gossip;

impl Node {
    /// Builds the next block to mine: a coinbase for this node's wallet plus
    /// as many pending transactions as the block may hold.
    ///
    /// Pending transactions that are already confirmed, or that the chain can
    /// no longer cover, are dropped from the mempool on the way.
    fn prepare_candidate(&self) -> Block {
        let mut state = self.state.write();
        let LedgerState { chain, mempool } = &mut *state;

        let confirmed = chain.confirmed_tx_ids();
        let mut sheet = BalanceSheet::from_chain(chain.blocks());
        let limit = chain.rules().max_transactions_per_block;

        let mut selected = Vec::new();
        let mut stale = Vec::new();
        for tx in mempool.transactions() {
            if selected.len() >= limit {
                break;
            }
            if confirmed.contains(&tx.tx_id) || !sheet.can_afford(tx) {
                stale.push(tx.tx_id.clone());
                continue;
            }
            sheet.apply(tx);
            selected.push(tx.clone());
        }

        if !stale.is_empty() {
            warn!("Dropping {} stale pending transactions", stale.len());
            mempool.evict(stale.iter().map(String::as_str));
        }

        let mut transactions = vec![Transaction::coinbase(
            self.address().clone(),
            chain.rules().mining_reward,
        )];
        transactions.extend(selected);

        let tip = chain.tip();
        Block::candidate(tip.index + 1, transactions, tip.hash.clone())
    }

    /// Appends a freshly mined block if the tip has not moved meanwhile.
    /// Returns `None` when the block is stale.
    fn install_mined(&self, block: Block) -> Result<Option<Block>, NodeError> {
        let mut state = self.state.write();
        if state.chain.tip().hash != block.previous_hash {
            return Ok(None);
        }

        state.chain.try_append(block.clone())?;
        let included: HashSet<&str> = block
            .user_transactions()
            .map(|tx| tx.tx_id.as_str())
            .collect();
        state.mempool.evict(included);
        Ok(Some(block))
    }

    /// Mines one block on top of the current tip and broadcasts it.
    ///
    /// The nonce search runs on the blocking pool. If another block lands
    /// first, the candidate is rebuilt on the new tip. Returns `None` when
    /// `stop` was raised before a block was found.
    pub async fn mine_block(&self, stop: &StopSignal) -> Result<Option<Block>, NodeError> {
        loop {
            if stop.is_stopped() {
                return Ok(None);
            }

            let candidate = self.prepare_candidate();
            let index = candidate.index;
            let engine = Arc::clone(&self.engine);
            let difficulty = self.settings.mining.difficulty;
            let signal = stop.clone();

            debug!(
                "Mining block {} with {} transactions",
                index,
                candidate.transactions.len()
            );
            let mined = tokio::task::spawn_blocking(move || {
                candidate.mine(engine.as_ref(), difficulty, signal.flag())
            })
            .await
            .map_err(|e| NodeError::Internal(format!("mining task failed: {}", e)))?;

            let block = match mined {
                Some(block) => block,
                None => return Ok(None),
            };

            match self.install_mined(block)? {
                Some(block) => {
                    self.blocks_mined.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Mined block {} with hash {} (nonce {})",
                        block.index, block.hash, block.nonce
                    );
                    self.block_accepted(&block);
                    self.broadcast_block(&block).await;
                    return Ok(Some(block));
                }
                None => debug!("Tip moved while mining block {}, rebuilding", index),
            }
        }
    }

    /// Bookkeeping after any block joins the local chain
    pub(crate) fn block_accepted(&self, block: &Block) {
        self.persist_block(block);
        self.refresh_rewards();
    }

    pub(crate) async fn broadcast_block(&self, block: &Block) -> usize {
        let peers = self.peers();
        gossip::broadcast_block(self.client.as_ref(), &peers, block).await
    }

    async fn mining_loop(self: Arc<Self>, stop: StopSignal) {
        let pause = self.settings.mining_pause();

        while !stop.is_stopped() {
            self.resolve_conflicts().await;

            if let Err(err) = self.mine_block(&stop).await {
                warn!("Mining round failed: {}", err);
            }

            if !stop.sleep(pause).await {
                break;
            }
        }
        info!("Mining loop stopped");
    }

    /// Starts the mining loop. Returns false if it was already running.
    pub fn start_mining(self: &Arc<Self>) -> bool {
        let node = Arc::clone(self);
        self.mining.start(move |stop| node.mining_loop(stop))
    }

    pub fn stop_mining(&self) -> bool {
        self.mining.stop()
    }

    pub fn mining_state(&self) -> ServiceState {
        self.mining.state()
    }
}
