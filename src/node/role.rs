use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Raised when an operation is invoked on a node whose role does not allow it
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{capability} is not available on a {role} node")]
pub struct AuthorizationError {
    pub role: NodeRole,
    pub capability: Capability,
}

/// What a node is for. All roles share chain, mempool and peer handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Miner,
    Collection,
    User,
}

/// Privileged operations gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Mine,
    AutoTransfer,
    AssignReward,
}

impl NodeRole {
    /// Role implied by a well-known port
    pub fn from_port(port: u16, miner_ports: &[u16], collection_port: u16) -> Self {
        if miner_ports.contains(&port) {
            NodeRole::Miner
        } else if port == collection_port {
            NodeRole::Collection
        } else {
            NodeRole::User
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        matches!(
            (self, capability),
            (NodeRole::Miner, Capability::Mine)
                | (NodeRole::Miner, Capability::AutoTransfer)
                | (NodeRole::Collection, Capability::AssignReward)
        )
    }

    pub fn authorize(self, capability: Capability) -> Result<(), AuthorizationError> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(AuthorizationError {
                role: self,
                capability,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Miner => "miner",
            NodeRole::Collection => "collection",
            NodeRole::User => "user",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "miner" => Ok(NodeRole::Miner),
            "collection" => Ok(NodeRole::Collection),
            "user" => Ok(NodeRole::User),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Mine => "mining",
            Capability::AutoTransfer => "auto-transfer",
            Capability::AssignReward => "reward assignment",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_port() {
        let miners = [3000, 3001, 3002];
        assert_eq!(NodeRole::from_port(3001, &miners, 7000), NodeRole::Miner);
        assert_eq!(NodeRole::from_port(7000, &miners, 7000), NodeRole::Collection);
        assert_eq!(NodeRole::from_port(5000, &miners, 7000), NodeRole::User);
    }

    #[test]
    fn test_capabilities() {
        assert!(NodeRole::Miner.authorize(Capability::Mine).is_ok());
        assert!(NodeRole::Miner.authorize(Capability::AutoTransfer).is_ok());
        assert!(NodeRole::Collection.authorize(Capability::AssignReward).is_ok());

        let err = NodeRole::User.authorize(Capability::Mine).unwrap_err();
        assert_eq!(err.role, NodeRole::User);
        assert!(NodeRole::Collection.authorize(Capability::Mine).is_err());
        assert!(NodeRole::Miner.authorize(Capability::AssignReward).is_err());
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(" Miner ".parse::<NodeRole>(), Ok(NodeRole::Miner));
        assert!("admin".parse::<NodeRole>().is_err());
    }
}
