use std::collections::{BTreeSet, HashMap, HashSet};

use super::client::PeerError;

/// Consecutive failed consensus rounds before a peer is forgotten
pub const MAX_PEER_FAILURES: u32 = 3;

/// Known peer base URLs, normalized and never including this node itself
#[derive(Debug, Clone)]
pub struct PeerSet {
    self_urls: HashSet<String>,
    peers: BTreeSet<String>,
    failures: HashMap<String, u32>,
}

/// Trims whitespace and trailing slashes and checks the scheme
pub fn normalize_url(url: &str) -> Result<String, PeerError> {
    let url = url.trim().trim_end_matches('/');
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| PeerError::InvalidUrl(url.to_string()))?;

    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(PeerError::InvalidUrl(url.to_string()));
    }
    Ok(url.to_string())
}

/// Spellings of the same local endpoint
fn local_aliases(url: &str) -> Vec<String> {
    let mut aliases = vec![url.to_string()];
    for (from, to) in [("localhost", "127.0.0.1"), ("127.0.0.1", "localhost")] {
        if url.contains(from) {
            aliases.push(url.replacen(from, to, 1));
        }
    }
    aliases
}

impl PeerSet {
    pub fn new(own_url: &str) -> Self {
        let own = normalize_url(own_url).unwrap_or_else(|_| own_url.to_string());
        PeerSet {
            self_urls: local_aliases(&own).into_iter().collect(),
            peers: BTreeSet::new(),
            failures: HashMap::new(),
        }
    }

    pub fn is_self(&self, url: &str) -> bool {
        self.self_urls.contains(url)
    }

    /// Adds a peer. Returns `Ok(true)` if it was not known before.
    pub fn add(&mut self, url: &str) -> Result<bool, PeerError> {
        let url = normalize_url(url)?;
        if self.is_self(&url) {
            return Err(PeerError::SelfPeer(url));
        }
        Ok(self.peers.insert(url))
    }

    pub fn remove(&mut self, url: &str) -> bool {
        match normalize_url(url) {
            Ok(url) => {
                self.failures.remove(&url);
                self.peers.remove(&url)
            }
            Err(_) => false,
        }
    }

    /// Counts a failed contact with `url`. After `MAX_PEER_FAILURES` in a
    /// row the peer is removed; returns whether that happened.
    pub fn record_failure(&mut self, url: &str) -> bool {
        if !self.contains(url) {
            return false;
        }
        let Ok(url) = normalize_url(url) else {
            return false;
        };

        let count = self.failures.entry(url.clone()).or_insert(0);
        *count += 1;
        if *count >= MAX_PEER_FAILURES {
            self.remove(&url)
        } else {
            false
        }
    }

    pub fn record_success(&mut self, url: &str) {
        if let Ok(url) = normalize_url(url) {
            self.failures.remove(&url);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        normalize_url(url).map_or(false, |url| self.peers.contains(&url))
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url(" http://localhost:3000/ ").unwrap(),
            "http://localhost:3000"
        );
        assert!(normalize_url("https://node.example").is_ok());
        assert!(normalize_url("ftp://localhost:3000").is_err());
        assert!(normalize_url("localhost:3000").is_err());
        assert!(normalize_url("http://").is_err());
    }

    #[test]
    fn test_add_rejects_self_in_any_spelling() {
        let mut peers = PeerSet::new("http://localhost:5000");

        assert!(matches!(
            peers.add("http://127.0.0.1:5000/"),
            Err(PeerError::SelfPeer(_))
        ));
        assert!(peers.add("http://localhost:5000").is_err());
        assert!(peers.is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let mut peers = PeerSet::new("http://localhost:5000");

        assert!(peers.add("http://localhost:3000").unwrap());
        assert!(!peers.add("http://localhost:3000/").unwrap());
        assert!(peers.contains("http://localhost:3000/"));
        assert_eq!(peers.list(), vec!["http://localhost:3000"]);

        assert!(peers.remove("http://localhost:3000"));
        assert_eq!(peers.len(), 0);
    }

    #[test]
    fn test_repeated_failures_drop_peer() {
        let mut peers = PeerSet::new("http://localhost:5000");
        peers.add("http://localhost:3000").unwrap();

        for _ in 1..MAX_PEER_FAILURES {
            assert!(!peers.record_failure("http://localhost:3000"));
        }
        peers.record_success("http://localhost:3000");
        for _ in 1..MAX_PEER_FAILURES {
            assert!(!peers.record_failure("http://localhost:3000"));
        }
        assert!(peers.contains("http://localhost:3000"));

        assert!(peers.record_failure("http://localhost:3000"));
        assert!(peers.is_empty());
        assert!(!peers.record_failure("http://localhost:3000"));
    }
}
