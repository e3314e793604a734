#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;

use carboncoin::blockchain::pow::{EngineKind, PortableEngine};
use carboncoin::blockchain::{Address, Block, Transaction};
use carboncoin::config::Settings;
use carboncoin::network::{PeerClient, PeerError};
use carboncoin::node::{Node, StopSignal};

/// Settings for a fast, isolated test node
pub fn settings(port: u16) -> Settings {
    let mut settings = Settings::default();
    settings.node.port = port;
    settings.mining.difficulty = 1;
    settings.mining.engine = EngineKind::Portable;
    settings.network.bootstrap_peers.clear();
    settings
}

pub fn url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

/// In-process network: peer calls are routed straight to the target node
#[derive(Default)]
pub struct Mesh {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
    offline: RwLock<HashSet<String>>,
}

impl Mesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn node(self: &Arc<Self>, port: u16) -> Arc<Node> {
        self.node_with(settings(port))
    }

    pub fn node_with(self: &Arc<Self>, settings: Settings) -> Arc<Node> {
        let node = Node::builder(settings)
            .client(self.clone())
            .engine(Arc::new(PortableEngine))
            .build()
            .unwrap();
        self.nodes
            .write()
            .insert(node.url().to_string(), Arc::downgrade(&node));
        node
    }

    /// Makes a node unreachable to every other node
    pub fn disconnect(&self, url: &str) {
        self.offline.write().insert(url.to_string());
    }

    pub fn reconnect(&self, url: &str) {
        self.offline.write().remove(url);
    }

    fn target(&self, peer: &str) -> Result<Arc<Node>, PeerError> {
        let unavailable = || PeerError::Unavailable {
            peer: peer.to_string(),
            reason: "connection refused".to_string(),
        };

        if self.offline.read().contains(peer) {
            return Err(unavailable());
        }
        self.nodes
            .read()
            .get(peer)
            .and_then(Weak::upgrade)
            .ok_or_else(unavailable)
    }
}

fn rejected(peer: &str) -> PeerError {
    PeerError::Rejected {
        peer: peer.to_string(),
        status: 400,
    }
}

#[async_trait]
impl PeerClient for Mesh {
    async fn health(&self, peer: &str) -> Result<(), PeerError> {
        self.target(peer).map(|_| ())
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        Ok(self.target(peer)?.chain())
    }

    async fn fetch_mempool(&self, peer: &str) -> Result<Vec<Transaction>, PeerError> {
        Ok(self.target(peer)?.mempool())
    }

    async fn fetch_peers(&self, peer: &str) -> Result<Vec<String>, PeerError> {
        Ok(self.target(peer)?.peers())
    }

    async fn fetch_address(&self, peer: &str) -> Result<Address, PeerError> {
        Ok(self.target(peer)?.address().clone())
    }

    async fn announce(&self, peer: &str, own_url: &str) -> Result<(), PeerError> {
        self.target(peer)?
            .accept_announcement(own_url)
            .map(|_| ())
            .map_err(|_| rejected(peer))
    }

    async fn send_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), PeerError> {
        self.target(peer)?
            .receive_transaction(transaction.clone())
            .map(|_| ())
            .map_err(|_| rejected(peer))
    }

    async fn send_block(&self, peer: &str, block: &Block) -> Result<(), PeerError> {
        self.target(peer)?
            .receive_block(block.clone())
            .await
            .map(|_| ())
            .map_err(|_| rejected(peer))
    }
}

/// Mines `count` blocks on `node`
pub async fn mine(node: &Node, count: usize) {
    for _ in 0..count {
        node.mine_block(&StopSignal::new()).await.unwrap().unwrap();
    }
}

/// Connects two nodes both ways without announcing
pub async fn link(a: &Node, b: &Node) {
    a.add_peer(b.url(), false).await.unwrap();
    b.add_peer(a.url(), false).await.unwrap();
}
