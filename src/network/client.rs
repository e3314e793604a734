use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::wire::{AddressInfo, ChainSnapshot, MempoolSnapshot, PeerAnnouncement, PeerList};
use crate::blockchain::{Address, Block, Transaction};
use crate::config::NetworkSettings;

/// Errors talking to, or about, a peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Invalid peer URL: {0}")]
    InvalidUrl(String),

    #[error("Refusing to add this node as its own peer: {0}")]
    SelfPeer(String),

    #[error("Peer {peer} unavailable: {reason}")]
    Unavailable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    Rejected { peer: String, status: u16 },

    #[error("Peer {peer} sent an unreadable response: {reason}")]
    BadResponse { peer: String, reason: String },
}

/// Outbound calls a node makes to its peers. Every call is a single attempt.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Checks that the peer answers `/health`
    async fn health(&self, peer: &str) -> Result<(), PeerError>;

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError>;

    async fn fetch_mempool(&self, peer: &str) -> Result<Vec<Transaction>, PeerError>;

    async fn fetch_peers(&self, peer: &str) -> Result<Vec<String>, PeerError>;

    /// Wallet address the peer runs with
    async fn fetch_address(&self, peer: &str) -> Result<Address, PeerError>;

    /// Tells `peer` that `own_url` exists
    async fn announce(&self, peer: &str, own_url: &str) -> Result<(), PeerError>;

    async fn send_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), PeerError>;

    async fn send_block(&self, peer: &str, block: &Block) -> Result<(), PeerError>;
}

/// [`PeerClient`] over the nodes' JSON HTTP API
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
    timeout: Duration,
    chain_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(settings: &NetworkSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(settings.peer_timeout())
            .build()?;

        Ok(HttpPeerClient {
            client,
            timeout: settings.peer_timeout(),
            chain_timeout: settings.chain_timeout(),
        })
    }

    async fn send(&self, peer: &str, request: RequestBuilder) -> Result<Response, PeerError> {
        let response = request.send().await.map_err(|e| PeerError::Unavailable {
            peer: peer.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Rejected {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        peer: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<T, PeerError> {
        let request = self
            .client
            .get(format!("{}{}", peer, path))
            .timeout(timeout);

        self.send(peer, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PeerError::BadResponse {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }

    async fn post_json<B: serde::Serialize + Sync>(
        &self,
        peer: &str,
        path: &str,
        body: &B,
    ) -> Result<(), PeerError> {
        let request = self
            .client
            .post(format!("{}{}", peer, path))
            .timeout(self.timeout)
            .json(body);

        self.send(peer, request).await.map(|_| ())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn health(&self, peer: &str) -> Result<(), PeerError> {
        let request = self
            .client
            .get(format!("{}/health", peer))
            .timeout(self.timeout);
        self.send(peer, request).await.map(|_| ())
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let snapshot: ChainSnapshot = self.get_json(peer, "/chain", self.chain_timeout).await?;
        Ok(snapshot.chain)
    }

    async fn fetch_mempool(&self, peer: &str) -> Result<Vec<Transaction>, PeerError> {
        let snapshot: MempoolSnapshot = self.get_json(peer, "/mempool", self.timeout).await?;
        Ok(snapshot.transactions)
    }

    async fn fetch_peers(&self, peer: &str) -> Result<Vec<String>, PeerError> {
        let list: PeerList = self.get_json(peer, "/peers", self.timeout).await?;
        Ok(list.peers)
    }

    async fn fetch_address(&self, peer: &str) -> Result<Address, PeerError> {
        let info: AddressInfo = self.get_json(peer, "/address", self.timeout).await?;
        Ok(info.address)
    }

    async fn announce(&self, peer: &str, own_url: &str) -> Result<(), PeerError> {
        let body = PeerAnnouncement {
            peer: own_url.to_string(),
            from: Some(own_url.to_string()),
        };
        self.post_json(peer, "/announce_peer", &body).await
    }

    async fn send_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), PeerError> {
        self.post_json(peer, "/receive_transaction", transaction).await
    }

    async fn send_block(&self, peer: &str, block: &Block) -> Result<(), PeerError> {
        self.post_json(peer, "/receive_block", block).await
    }
}
