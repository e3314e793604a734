use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{CryptoError, TransactionError};
use crate::network::PeerError;
use crate::node::{AuthorizationError, NodeError};
use crate::registry::RegistryError;

/// Body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable message
    pub error: String,

    /// Machine readable category, e.g. `insufficient_balance`
    pub kind: String,
}

/// Errors returned by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Signature(String),

    #[error("{0}")]
    InsufficientBalance(String),

    #[error("{0}")]
    ChainIntegrity(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PeerUnavailable(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Signature(_) => "signature_error",
            ApiError::InsufficientBalance(_) => "insufficient_balance",
            ApiError::ChainIntegrity(_) => "chain_integrity_error",
            ApiError::Authorization(_) => "authorization_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::PeerUnavailable(_) => "peer_unavailable",
            ApiError::Duplicate(_) => "duplicate",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Signature(_)
            | ApiError::InsufficientBalance(_) => StatusCode::BAD_REQUEST,
            ApiError::ChainIntegrity(_) | ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PeerUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
        })
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        let message = err.to_string();
        match err {
            TransactionError::Validation(_) => ApiError::Validation(message),
            TransactionError::Signature(_) | TransactionError::Crypto(_) => {
                ApiError::Signature(message)
            }
            TransactionError::InsufficientBalance { .. } => ApiError::InsufficientBalance(message),
        }
    }
}

impl From<PeerError> for ApiError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::InvalidUrl(_) | PeerError::SelfPeer(_) => ApiError::Validation(err.to_string()),
            _ => ApiError::PeerUnavailable(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateLabel(_) | RegistryError::WalletActive { .. } => {
                ApiError::Duplicate(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(err: AuthorizationError) -> Self {
        ApiError::Authorization(err.to_string())
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Transaction(err) => err.into(),
            NodeError::ChainIntegrity(err) => ApiError::ChainIntegrity(err.to_string()),
            NodeError::Authorization(err) => err.into(),
            NodeError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            NodeError::Duplicate(message) => ApiError::Duplicate(message),
            NodeError::Peer(err) => err.into(),
            NodeError::Registry(err) => err.into(),
            NodeError::Crypto(err) => err.into(),
            NodeError::Storage(err) => ApiError::Internal(err.to_string()),
            NodeError::Internal(message) => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Capability, NodeRole};

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                ApiError::from(TransactionError::InsufficientBalance {
                    required: 5.0,
                    available: 1.0,
                }),
                StatusCode::BAD_REQUEST,
                "insufficient_balance",
            ),
            (
                ApiError::from(NodeRole::User.authorize(Capability::Mine).unwrap_err()),
                StatusCode::FORBIDDEN,
                "authorization_error",
            ),
            (
                ApiError::from(NodeError::NotFound("reward abc".to_string())),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                ApiError::from(PeerError::Unavailable {
                    peer: "http://localhost:3001".to_string(),
                    reason: "refused".to_string(),
                }),
                StatusCode::BAD_GATEWAY,
                "peer_unavailable",
            ),
            (
                ApiError::from(RegistryError::DuplicateLabel("alice".to_string())),
                StatusCode::CONFLICT,
                "duplicate",
            ),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.kind(), kind);
        }
    }
}
