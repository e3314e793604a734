//! Wallet registry and active-session map shared by every node on a machine.
//!
//! Both live as JSON files in one directory and are rewritten atomically
//! through a temp file in the same directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::blockchain::{Address, Wallet};

const WALLETS_FILE: &str = "wallets.json";
const SESSIONS_FILE: &str = "sessions.json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("A wallet labelled '{0}' already exists")]
    DuplicateLabel(String),

    #[error("Wallet {address} is already active on port {port}")]
    WalletActive { address: Address, port: u16 },
}

/// A wallet as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: Address,
    pub public_key: String,
    pub private_key: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl Registry {
    /// Opens the registry directory, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Registry {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T, RegistryError> {
        match fs::read_to_string(self.dir.join(file)) {
            Ok(text) if text.trim().is_empty() => Ok(T::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<(), RegistryError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.flush()?;
        tmp.persist(self.dir.join(file)).map_err(|e| e.error)?;
        Ok(())
    }

    /// All registered wallets keyed by address
    pub fn wallets(&self) -> Result<BTreeMap<Address, WalletRecord>, RegistryError> {
        let _guard = self.lock.lock();
        self.read(WALLETS_FILE)
    }

    pub fn find(&self, address: &Address) -> Result<Option<WalletRecord>, RegistryError> {
        Ok(self.wallets()?.remove(address))
    }

    pub fn find_by_label(&self, label: &str) -> Result<Option<WalletRecord>, RegistryError> {
        Ok(self
            .wallets()?
            .into_values()
            .find(|record| record.label.as_deref() == Some(label)))
    }

    /// Stores `wallet`, refusing a label that is already taken. Registering the
    /// same wallet twice keeps the first record.
    pub fn register_wallet(
        &self,
        wallet: &Wallet,
        label: Option<String>,
    ) -> Result<WalletRecord, RegistryError> {
        let _guard = self.lock.lock();
        let mut wallets: BTreeMap<Address, WalletRecord> = self.read(WALLETS_FILE)?;

        if let Some(existing) = wallets.get(wallet.address()) {
            return Ok(existing.clone());
        }

        if let Some(label) = &label {
            if wallets
                .values()
                .any(|record| record.label.as_ref() == Some(label))
            {
                return Err(RegistryError::DuplicateLabel(label.clone()));
            }
        }

        let record = WalletRecord {
            address: wallet.address().clone(),
            public_key: wallet.public_key_hex(),
            private_key: wallet.private_key_hex(),
            label,
            created_at: Utc::now(),
        };
        wallets.insert(record.address.clone(), record.clone());
        self.write(WALLETS_FILE, &wallets)?;

        info!("Registered wallet {}", record.address);
        Ok(record)
    }

    /// Active sessions: node port to wallet address
    pub fn sessions(&self) -> Result<BTreeMap<u16, Address>, RegistryError> {
        let _guard = self.lock.lock();
        self.read(SESSIONS_FILE)
    }

    /// Marks `address` as running on `port`. Fails if the wallet is already
    /// active on a different port.
    pub fn start_session(&self, port: u16, address: &Address) -> Result<(), RegistryError> {
        let _guard = self.lock.lock();
        let mut sessions: BTreeMap<u16, Address> = self.read(SESSIONS_FILE)?;

        if let Some((&other, _)) = sessions
            .iter()
            .find(|(other, active)| *active == address && **other != port)
        {
            return Err(RegistryError::WalletActive {
                address: address.clone(),
                port: other,
            });
        }

        sessions.insert(port, address.clone());
        self.write(SESSIONS_FILE, &sessions)?;
        info!("Session started for {} on port {}", address, port);
        Ok(())
    }

    pub fn end_session(&self, port: u16) -> Result<(), RegistryError> {
        let _guard = self.lock.lock();
        let mut sessions: BTreeMap<u16, Address> = self.read(SESSIONS_FILE)?;

        if sessions.remove(&port).is_some() {
            self.write(SESSIONS_FILE, &sessions)?;
            info!("Session ended on port {}", port);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let wallet = Wallet::generate();

        let record = registry
            .register_wallet(&wallet, Some("alice".to_string()))
            .unwrap();
        assert_eq!(&record.address, wallet.address());

        let found = registry.find_by_label("alice").unwrap().unwrap();
        assert_eq!(found.private_key, wallet.private_key_hex());
        assert!(registry.find(wallet.address()).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        registry
            .register_wallet(&Wallet::generate(), Some("bob".to_string()))
            .unwrap();
        let err = registry
            .register_wallet(&Wallet::generate(), Some("bob".to_string()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateLabel(_)));
    }

    #[test]
    fn test_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::generate();
        Registry::open(dir.path())
            .unwrap()
            .register_wallet(&wallet, None)
            .unwrap();

        let reopened = Registry::open(dir.path()).unwrap();
        assert_eq!(reopened.wallets().unwrap().len(), 1);
    }

    #[test]
    fn test_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let wallet = Wallet::generate();

        registry.start_session(5000, wallet.address()).unwrap();
        registry.start_session(5000, wallet.address()).unwrap();

        let err = registry.start_session(5001, wallet.address()).unwrap_err();
        assert!(matches!(err, RegistryError::WalletActive { port: 5000, .. }));

        registry.end_session(5000).unwrap();
        registry.start_session(5001, wallet.address()).unwrap();
        assert_eq!(registry.sessions().unwrap().len(), 1);
    }
}
