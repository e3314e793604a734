use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// How many nonces the portable engine tries between stop-signal checks
const STOP_CHECK_INTERVAL: u64 = 4_096;

/// Nonces handed to the thread pool per parallel round
const PARALLEL_BATCH: u64 = 65_536;

/// Serialized block contents with a hole where the nonce goes.
///
/// The hashed bytes are `prefix ++ nonce ++ suffix`, so a search only has to
/// format the nonce for each attempt.
#[derive(Debug, Clone)]
pub struct MiningTemplate {
    prefix: String,
    suffix: String,
}

impl MiningTemplate {
    pub fn new(prefix: String, suffix: String) -> Self {
        MiningTemplate { prefix, suffix }
    }

    /// The exact bytes hashed for `nonce`
    pub fn payload(&self, nonce: u64) -> Vec<u8> {
        format!("{}{}{}", self.prefix, nonce, self.suffix).into_bytes()
    }

    /// Hex encoded SHA-256 of the payload for `nonce`
    pub fn digest_at(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A successful proof-of-work search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub hash: String,
    pub nonce: u64,
}

/// Checks that a hex hash starts with at least `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Hashing and nonce search strategy.
///
/// Every implementation must return the lowest nonce at or above `start_nonce`
/// that satisfies the difficulty, so engines are interchangeable.
pub trait PowEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hex encoded SHA-256 of `data`
    fn hash(&self, data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    /// Searches for a nonce. Returns `None` if `stop` was raised or the nonce
    /// space ran out.
    fn mine(
        &self,
        template: &MiningTemplate,
        difficulty: usize,
        start_nonce: u64,
        stop: &AtomicBool,
    ) -> Option<Proof>;
}

/// Single threaded nonce search
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableEngine;

impl PowEngine for PortableEngine {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn mine(
        &self,
        template: &MiningTemplate,
        difficulty: usize,
        start_nonce: u64,
        stop: &AtomicBool,
    ) -> Option<Proof> {
        let mut nonce = start_nonce;
        let mut attempts: u64 = 0;

        loop {
            if attempts % STOP_CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                debug!("Nonce search stopped after {} attempts", attempts);
                return None;
            }

            let hash = template.digest_at(nonce);
            if meets_difficulty(&hash, difficulty) {
                return Some(Proof { hash, nonce });
            }

            attempts += 1;
            nonce = nonce.checked_add(1)?;
        }
    }
}

/// Nonce search spread over the rayon thread pool.
///
/// Works through consecutive batches and takes the first hit of each batch in
/// nonce order, which yields the same proof as [`PortableEngine`].
#[derive(Debug, Clone, Copy)]
pub struct ParallelEngine {
    batch: u64,
}

impl Default for ParallelEngine {
    fn default() -> Self {
        ParallelEngine {
            batch: PARALLEL_BATCH,
        }
    }
}

impl ParallelEngine {
    pub fn with_batch(batch: u64) -> Self {
        ParallelEngine {
            batch: batch.max(1),
        }
    }
}

impl PowEngine for ParallelEngine {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn mine(
        &self,
        template: &MiningTemplate,
        difficulty: usize,
        start_nonce: u64,
        stop: &AtomicBool,
    ) -> Option<Proof> {
        let mut batch_start = start_nonce;

        loop {
            if stop.load(Ordering::Relaxed) {
                return None;
            }

            let batch_end = batch_start.saturating_add(self.batch);
            let found = (batch_start..batch_end)
                .into_par_iter()
                .find_first(|nonce| meets_difficulty(&template.digest_at(*nonce), difficulty));

            if let Some(nonce) = found {
                return Some(Proof {
                    hash: template.digest_at(nonce),
                    nonce,
                });
            }

            if batch_end == u64::MAX {
                return None;
            }
            batch_start = batch_end;
        }
    }
}

/// Which engine a node should mine with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Auto,
    Portable,
    Parallel,
}

/// Picks a mining engine. `Auto` uses the parallel engine when more than one
/// core is available and quietly falls back to the portable one otherwise.
pub fn select_engine(kind: EngineKind) -> Arc<dyn PowEngine> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match kind {
        EngineKind::Portable => Arc::new(PortableEngine),
        EngineKind::Parallel => Arc::new(ParallelEngine::default()),
        EngineKind::Auto if cores > 1 => Arc::new(ParallelEngine::default()),
        EngineKind::Auto => Arc::new(PortableEngine),
    }
}
