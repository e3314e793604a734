// Network module
//
// Peer bookkeeping, the HTTP peer client, gossip fan-out and
// longest-valid-chain consensus.

pub mod client;
pub mod consensus;
pub mod gossip;
pub mod peers;
pub mod wire;

pub use client::{HttpPeerClient, PeerClient, PeerError};
pub use consensus::ConsensusOutcome;
pub use peers::PeerSet;
