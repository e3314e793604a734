use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Shared secp256k1 context, created once per process.
static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length of a hex encoded SHA-256 digest
pub const ADDRESS_HEX_LEN: usize = 64;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to sign message: {0}")]
    SigningError(String),
}

/// A wallet address: hex encoded SHA-256 of the raw 64-byte public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[schema(example = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")]
pub struct Address(pub String);

impl Address {
    /// Derives the address of a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Address(hex::encode(Sha256::digest(raw_public_key(public_key))))
    }

    /// Checks that the address looks like a hex encoded SHA-256 digest
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == ADDRESS_HEX_LEN && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.trim().to_ascii_lowercase());
        if address.is_well_formed() {
            Ok(address)
        } else {
            Err(CryptoError::InvalidAddress(s.to_string()))
        }
    }
}

/// A hex encoded compact ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.serialize_compact()))
    }

    fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes =
            hex::decode(&self.0).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Signature::from_compact(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// A secp256k1 keypair together with its derived address
#[derive(Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: PublicKey,
    address: Address,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Creates a new wallet with a random keypair from the OS random source
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    /// Rebuilds a wallet from a hex encoded 32-byte private key
    ///
    /// # Arguments
    ///
    /// * `private_key_hex` - The private key, as exported by [`Wallet::private_key_hex`]
    pub fn restore(private_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(private_key_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self::from_secret_key(secret_key))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1, &secret_key);
        let address = Address::from_public_key(&public_key);

        Wallet {
            secret_key,
            public_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's public key as hex of the raw 64 bytes
    pub fn public_key_hex(&self) -> String {
        hex::encode(raw_public_key(&self.public_key))
    }

    /// Exports the wallet's private key as hex
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs the SHA-256 digest of `message` with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let message = digest_message(message)?;
        let signature = SECP256K1.sign_ecdsa(&message, &self.secret_key);
        Ok(DigitalSignature::from_signature(&signature))
    }
}

/// Verifies that `signature` over `message` was made by the key behind `address`.
///
/// Returns false on any malformed input, and when `public_key_hex` does not hash
/// to `address`.
pub fn verify(
    address: &Address,
    public_key_hex: &str,
    message: &[u8],
    signature: &DigitalSignature,
) -> bool {
    let public_key = match parse_public_key(public_key_hex) {
        Ok(key) => key,
        Err(_) => return false,
    };

    if &Address::from_public_key(&public_key) != address {
        return false;
    }

    let (message, signature) = match (digest_message(message), signature.to_signature()) {
        (Ok(message), Ok(signature)) => (message, signature),
        _ => return false,
    };

    SECP256K1
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

/// Parses a public key from hex. Accepts the raw 64-byte form as well as the
/// SEC1 compressed and uncompressed encodings.
pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey, CryptoError> {
    let mut bytes = hex::decode(public_key_hex.trim())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    if bytes.len() == 64 {
        bytes.insert(0, 0x04);
    }

    PublicKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Hex encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn raw_public_key(public_key: &PublicKey) -> [u8; 64] {
    let uncompressed = public_key.serialize_uncompressed();
    let mut raw = [0u8; 64];
    raw.copy_from_slice(&uncompressed[1..]);
    raw
}

fn digest_message(message: &[u8]) -> Result<Message, CryptoError> {
    let digest = Sha256::digest(message);
    Message::from_digest_slice(&digest).map_err(|e| CryptoError::SigningError(e.to_string()))
}
