use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::client::{PeerClient, PeerError};
use crate::blockchain::{Block, ChainRules};

/// Result of one consensus round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConsensusOutcome {
    /// Whether the local chain was swapped out
    pub chain_replaced: bool,

    /// Local chain length after the round
    pub length: usize,

    pub peers_queried: usize,

    /// Peers that could not be reached or sent an invalid chain
    pub peers_skipped: usize,

    /// Peer whose chain was adopted
    pub source: Option<String>,
}

/// A peer's chain that passed validation
#[derive(Debug, Clone)]
pub struct Candidate {
    pub peer: String,
    pub chain: Vec<Block>,
}

/// What one round of chain fetches produced
#[derive(Debug, Default)]
pub struct Collected {
    pub candidates: Vec<Candidate>,

    /// Peers that could not be reached or sent an invalid chain
    pub skipped: usize,

    /// Peers that answered, whatever they sent
    pub reachable: Vec<String>,

    /// Peers that could not be contacted at all
    pub unreachable: Vec<String>,
}

/// Fetches every peer's chain concurrently and keeps the valid ones that are
/// strictly longer than `local_length`
pub async fn collect_candidates(
    client: &dyn PeerClient,
    peers: &[String],
    rules: &ChainRules,
    local_length: usize,
) -> Collected {
    let responses = join_all(peers.iter().map(|peer| async move {
        (peer.clone(), client.fetch_chain(peer).await)
    }))
    .await;

    let mut collected = Collected::default();

    for (peer, response) in responses {
        let chain = match response {
            Ok(chain) => chain,
            Err(err) => {
                warn!("Skipping {} during consensus: {}", peer, err);
                collected.skipped += 1;
                if matches!(err, PeerError::Unavailable { .. }) {
                    collected.unreachable.push(peer);
                }
                continue;
            }
        };
        collected.reachable.push(peer.clone());

        if chain.len() <= local_length {
            debug!("{} has chain length {}, not longer", peer, chain.len());
            continue;
        }

        match rules.validate_chain(&chain) {
            Ok(()) => collected.candidates.push(Candidate { peer, chain }),
            Err(err) => {
                warn!("Discarding chain from {}: {}", peer, err);
                collected.skipped += 1;
            }
        }
    }

    collected
}

/// Picks the longest candidate. On equal length the earlier peer wins.
pub fn choose_longest(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.chain.len() >= candidate.chain.len() => Some(best),
        _ => Some(candidate),
    })
}

/// Logs and packages the result of a round
pub fn outcome(
    replaced_by: Option<&str>,
    length: usize,
    peers_queried: usize,
    peers_skipped: usize,
) -> ConsensusOutcome {
    if let Some(peer) = replaced_by {
        info!("Adopted chain of length {} from {}", length, peer);
    }

    ConsensusOutcome {
        chain_replaced: replaced_by.is_some(),
        length,
        peers_queried,
        peers_skipped,
        source: replaced_by.map(str::to_string),
    }
}
