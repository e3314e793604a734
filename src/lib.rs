//! CarbonCoin: a proof-of-work reward ledger run by a small network of
//! HTTP nodes.
//!
//! - [`blockchain`] holds the ledger types and rules
//! - [`network`] talks to peers and runs consensus
//! - [`node`] ties one chain, mempool and peer set to background services
//! - [`api`] exposes a node over HTTP

pub mod api;
pub mod blockchain;
pub mod config;
pub mod network;
pub mod node;
pub mod registry;
