//! JSON-file persistence for the wallet's state. Loading degrades
//! gracefully: an unreadable file yields the empty default with a warning,
//! never a startup failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use zeroize::Zeroizing;

use irma_core::{ErrorKind, SchemeManagerIdentifier, SessionError, SessionResult};
use irma_idemix::PaillierPrivateKey;

use crate::client::{Credential, KeyshareEnrollment};
use crate::logs::LogEntry;

const SECRET_FILE: &str = "sk";
const CREDENTIALS_FILE: &str = "credentials.json";
const KEYSHARE_FILE: &str = "kss.json";
const PAILLIER_FILE: &str = "paillier.json";
const LOGS_FILE: &str = "logs.json";

pub(crate) struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> SessionResult<Self> {
        let path = path.into();
        fs::create_dir_all(&path)
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))?;
        Ok(Self { path })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    // -----------------------------------------------------------------------
    // Master secret -- decimal string, wiped from the read buffer
    // -----------------------------------------------------------------------

    pub fn load_master_secret(&self) -> Option<BigUint> {
        let path = self.file(SECRET_FILE);
        if !path.exists() {
            return None;
        }
        let raw = match fs::read(&path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) => {
                warn!(error = %e, "could not read master secret");
                return None;
            }
        };
        match std::str::from_utf8(&raw).ok().and_then(|s| s.trim().parse().ok()) {
            Some(secret) => Some(secret),
            None => {
                warn!("master secret file is corrupt");
                None
            }
        }
    }

    pub fn store_master_secret(&self, secret: &BigUint) -> SessionResult<()> {
        fs::write(self.file(SECRET_FILE), secret.to_string())
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))
    }

    // -----------------------------------------------------------------------
    // Typed JSON blobs
    // -----------------------------------------------------------------------

    fn load_json<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.file(name);
        if !path.exists() {
            return T::default();
        }
        match fs::read(&path).map_err(|e| e.to_string()).and_then(|bytes| {
            serde_json::from_slice(&bytes).map_err(|e| e.to_string())
        }) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = name, error = %e, "dropping unreadable wallet file");
                T::default()
            }
        }
    }

    fn store_json<T: Serialize>(&self, name: &str, value: &T) -> SessionResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(self.file(name), bytes)
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))
    }

    pub fn load_credentials(&self) -> Vec<Credential> {
        self.load_json(CREDENTIALS_FILE)
    }

    pub fn store_credentials(&self, credentials: &[Credential]) -> SessionResult<()> {
        self.store_json(CREDENTIALS_FILE, &credentials)
    }

    pub fn load_keyshare_servers(
        &self,
    ) -> BTreeMap<SchemeManagerIdentifier, KeyshareEnrollment> {
        self.load_json(KEYSHARE_FILE)
    }

    pub fn store_keyshare_servers(
        &self,
        servers: &BTreeMap<SchemeManagerIdentifier, KeyshareEnrollment>,
    ) -> SessionResult<()> {
        self.store_json(KEYSHARE_FILE, servers)
    }

    pub fn load_paillier_cache(&self) -> Option<PaillierPrivateKey> {
        self.load_json(PAILLIER_FILE)
    }

    pub fn store_paillier_cache(&self, key: &Option<PaillierPrivateKey>) -> SessionResult<()> {
        self.store_json(PAILLIER_FILE, key)
    }

    pub fn load_logs(&self) -> Vec<LogEntry> {
        self.load_json(LOGS_FILE)
    }

    pub fn store_logs(&self, logs: &[LogEntry]) -> SessionResult<()> {
        self.store_json(LOGS_FILE, &logs)
    }

    #[cfg(test)]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(test: &str) -> Storage {
        let dir = std::env::temp_dir().join(format!("irma-client-storage-{}", test));
        let _ = fs::remove_dir_all(&dir);
        Storage::new(dir).unwrap()
    }

    #[test]
    fn test_master_secret_roundtrip() {
        let storage = temp_storage("sk");
        assert!(storage.load_master_secret().is_none());
        let secret: BigUint = "123456789012345678901234567890".parse().unwrap();
        storage.store_master_secret(&secret).unwrap();
        assert_eq!(storage.load_master_secret().unwrap(), secret);
    }

    #[test]
    fn test_corrupt_secret_degrades_to_none() {
        let storage = temp_storage("sk-corrupt");
        fs::write(storage.path().join(SECRET_FILE), "not a number").unwrap();
        assert!(storage.load_master_secret().is_none());
    }

    #[test]
    fn test_corrupt_json_degrades_to_default() {
        let storage = temp_storage("json-corrupt");
        fs::write(storage.path().join(CREDENTIALS_FILE), "{broken").unwrap();
        assert!(storage.load_credentials().is_empty());
        fs::write(storage.path().join(LOGS_FILE), "[1,2,").unwrap();
        assert!(storage.load_logs().is_empty());
    }

    #[test]
    fn test_paillier_cache_roundtrip() {
        let storage = temp_storage("paillier");
        assert!(storage.load_paillier_cache().is_none());
        let key = PaillierPrivateKey::bootstrap();
        storage.store_paillier_cache(&Some(key.clone())).unwrap();
        assert_eq!(storage.load_paillier_cache().unwrap(), key);
    }
}
