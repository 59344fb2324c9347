//! The trusted descriptor tree: scheme managers, issuers, credential
//! types, and issuer public keys, with folder parsing, mid-session
//! descriptor download, and scheme manager installation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use irma_idemix::PublicKey;

use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::identifiers::{
    CredentialTypeIdentifier, IdentifierSet, IssuerIdentifier, SchemeManagerIdentifier,
};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeManagerStatus {
    Valid,
    Unparsable,
    InvalidSignature,
    IntegrityFailed,
    ExpiredSignature,
}

impl Default for SchemeManagerStatus {
    fn default() -> Self {
        SchemeManagerStatus::Unparsable
    }
}

impl fmt::Display for SchemeManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemeManagerStatus::Valid => "Valid",
            SchemeManagerStatus::Unparsable => "Unparsable",
            SchemeManagerStatus::InvalidSignature => "InvalidSignature",
            SchemeManagerStatus::IntegrityFailed => "IntegrityFailed",
            SchemeManagerStatus::ExpiredSignature => "ExpiredSignature",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeManager {
    pub id: SchemeManagerIdentifier,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Where this manager serves its descriptors from.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default)]
    pub keyshare_server: Option<String>,
    #[serde(skip)]
    pub status: SchemeManagerStatus,
    #[serde(skip)]
    pub valid: bool,
}

impl SchemeManager {
    fn placeholder(id: SchemeManagerIdentifier, status: SchemeManagerStatus) -> Self {
        Self {
            id,
            name: String::new(),
            description: String::new(),
            url: String::new(),
            distributed: false,
            keyshare_server: None,
            status,
            valid: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    pub id: IssuerIdentifier,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub contact_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialType {
    pub id: CredentialTypeIdentifier,
    #[serde(default)]
    pub name: String,
    /// Short attribute names, in signing order.
    pub attribute_types: Vec<String>,
}

impl CredentialType {
    /// Position of a short attribute name within the declared order.
    pub fn attribute_position(&self, short_name: &str) -> Option<usize> {
        self.attribute_types.iter().position(|a| a == short_name)
    }
}

/// One scheme manager failed to load; the folder scan still completes.
#[derive(Debug, Clone, Error)]
#[error("scheme manager {manager} failed to load: {status}")]
pub struct SchemeManagerError {
    pub manager: SchemeManagerIdentifier,
    pub status: SchemeManagerStatus,
}

// ---------------------------------------------------------------------------
// DescriptorFetcher -- how descriptors reach us (HTTP in production)
// ---------------------------------------------------------------------------

pub trait DescriptorFetcher: Send + Sync {
    fn scheme_manager(&self, url: &str) -> SessionResult<SchemeManager>;
    fn issuer(&self, manager: &SchemeManager, id: &IssuerIdentifier) -> SessionResult<Issuer>;
    fn credential_type(
        &self,
        manager: &SchemeManager,
        id: &CredentialTypeIdentifier,
    ) -> SessionResult<CredentialType>;
    fn public_key(
        &self,
        manager: &SchemeManager,
        issuer: &IssuerIdentifier,
        counter: u32,
    ) -> SessionResult<PublicKey>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The descriptor tree, immutable between explicit parse / download /
/// install operations. Callers share it behind a read/write lock; every
/// mutation here happens under the single writer.
#[derive(Debug)]
pub struct Configuration {
    path: PathBuf,
    pub scheme_managers: BTreeMap<SchemeManagerIdentifier, SchemeManager>,
    pub issuers: BTreeMap<IssuerIdentifier, Issuer>,
    pub credential_types: BTreeMap<CredentialTypeIdentifier, CredentialType>,
    pub disabled_scheme_managers: BTreeSet<SchemeManagerIdentifier>,
    public_keys: BTreeMap<(IssuerIdentifier, u32), PublicKey>,
}

impl Configuration {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scheme_managers: BTreeMap::new(),
            issuers: BTreeMap::new(),
            credential_types: BTreeMap::new(),
            disabled_scheme_managers: BTreeSet::new(),
            public_keys: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scheme_manager(&self, id: &SchemeManagerIdentifier) -> Option<&SchemeManager> {
        self.scheme_managers.get(id)
    }

    pub fn issuer(&self, id: &IssuerIdentifier) -> Option<&Issuer> {
        self.issuers.get(id)
    }

    pub fn credential_type(&self, id: &CredentialTypeIdentifier) -> Option<&CredentialType> {
        self.credential_types.get(id)
    }

    pub fn public_key(&self, issuer: &IssuerIdentifier, counter: u32) -> Option<&PublicKey> {
        self.public_keys.get(&(issuer.clone(), counter))
    }

    pub fn insert_public_key(&mut self, issuer: IssuerIdentifier, key: PublicKey) {
        self.public_keys.insert((issuer, key.counter), key);
    }

    /// Does the set reference any distributed scheme manager?
    pub fn contains_distributed(&self, set: &IdentifierSet) -> bool {
        set.scheme_managers
            .iter()
            .any(|id| self.scheme_managers.get(id).is_some_and(|m| m.distributed))
    }

    // -----------------------------------------------------------------------
    // Folder parsing
    // -----------------------------------------------------------------------

    /// Re-scan persisted descriptors. A scheme manager whose description
    /// fails to parse or whose index hash does not match is moved to the
    /// disabled set with a terminal status; its entry stays visible so UIs
    /// can keep showing it. The scan always completes; the first failure is
    /// reported afterwards.
    pub fn parse_folder(&mut self) -> Result<(), SchemeManagerError> {
        let mut first_failure: Option<SchemeManagerError> = None;
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(_) => return Ok(()), // nothing persisted yet
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = SchemeManagerIdentifier::new(entry.file_name().to_string_lossy());
            match self.load_scheme_manager_dir(&id, &entry.path()) {
                Ok(manager) => {
                    self.disabled_scheme_managers.remove(&id);
                    self.scheme_managers.insert(id, manager);
                }
                Err(status) => {
                    warn!(manager = %id, %status, "disabling scheme manager");
                    self.scheme_managers
                        .entry(id.clone())
                        .and_modify(|m| {
                            m.status = status;
                            m.valid = false;
                        })
                        .or_insert_with(|| SchemeManager::placeholder(id.clone(), status));
                    self.disabled_scheme_managers.insert(id.clone());
                    first_failure
                        .get_or_insert(SchemeManagerError { manager: id, status });
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn load_scheme_manager_dir(
        &mut self,
        id: &SchemeManagerIdentifier,
        dir: &Path,
    ) -> Result<SchemeManager, SchemeManagerStatus> {
        let description = fs::read(dir.join("description.json"))
            .map_err(|_| SchemeManagerStatus::Unparsable)?;
        let index = fs::read_to_string(dir.join("index"))
            .map_err(|_| SchemeManagerStatus::IntegrityFailed)?;
        if index.trim() != hex::encode(Sha256::digest(&description)) {
            return Err(SchemeManagerStatus::IntegrityFailed);
        }

        let mut manager: SchemeManager = serde_json::from_slice(&description)
            .map_err(|_| SchemeManagerStatus::Unparsable)?;
        if manager.id != *id {
            return Err(SchemeManagerStatus::Unparsable);
        }
        manager.status = SchemeManagerStatus::Valid;
        manager.valid = true;

        self.load_aux(dir, id);
        Ok(manager)
    }

    /// Issuers, credential types, and public keys of one manager. A broken
    /// aux file degrades to a warning; the manager itself stays valid.
    fn load_aux(&mut self, dir: &Path, id: &SchemeManagerIdentifier) {
        match read_json::<BTreeMap<IssuerIdentifier, Issuer>>(&dir.join("issuers.json")) {
            Ok(Some(issuers)) => self.issuers.extend(issuers),
            Ok(None) => {}
            Err(e) => warn!(manager = %id, error = %e, "skipping unreadable issuers file"),
        }
        match read_json::<BTreeMap<CredentialTypeIdentifier, CredentialType>>(
            &dir.join("credential_types.json"),
        ) {
            Ok(Some(types)) => self.credential_types.extend(types),
            Ok(None) => {}
            Err(e) => warn!(manager = %id, error = %e, "skipping unreadable credential types file"),
        }
        match read_json::<Vec<(IssuerIdentifier, PublicKey)>>(&dir.join("public_keys.json")) {
            Ok(Some(keys)) => {
                for (issuer, key) in keys {
                    self.insert_public_key(issuer, key);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(manager = %id, error = %e, "skipping unreadable public keys file"),
        }
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Fetch every descriptor in `required` that is not yet present and
    /// insert it. Returns the set actually added alongside the first
    /// failure, if any: descriptors committed before a failure stay
    /// committed, and the caller announces them either way. Idempotent:
    /// identifiers already present are skipped, so overlapping calls are
    /// safe.
    pub fn download(
        &mut self,
        fetcher: &dyn DescriptorFetcher,
        required: &IdentifierSet,
    ) -> (IdentifierSet, SessionResult<()>) {
        let mut downloaded = IdentifierSet::default();
        let result = self.download_into(fetcher, required, &mut downloaded);
        if !downloaded.is_empty() {
            for manager_id in required.scheme_managers.iter() {
                self.persist_scheme_manager(manager_id);
            }
        }
        (downloaded, result)
    }

    fn download_into(
        &mut self,
        fetcher: &dyn DescriptorFetcher,
        required: &IdentifierSet,
        downloaded: &mut IdentifierSet,
    ) -> SessionResult<()> {
        for issuer_id in &required.issuers {
            if self.issuers.contains_key(issuer_id) {
                continue;
            }
            let manager = self.manager_for_download(&issuer_id.scheme_manager())?;
            let issuer = fetcher
                .issuer(&manager, issuer_id)
                .map_err(|e| e.rekind(ErrorKind::ConfigurationDownload))?;
            self.issuers.insert(issuer_id.clone(), issuer);
            downloaded.issuers.insert(issuer_id.clone());
        }

        for credtype_id in &required.credential_types {
            if self.credential_types.contains_key(credtype_id) {
                continue;
            }
            let manager =
                self.manager_for_download(&credtype_id.issuer().scheme_manager())?;
            let credtype = fetcher
                .credential_type(&manager, credtype_id)
                .map_err(|e| e.rekind(ErrorKind::ConfigurationDownload))?;
            self.credential_types.insert(credtype_id.clone(), credtype);
            downloaded.credential_types.insert(credtype_id.clone());
        }

        for (issuer_id, counters) in &required.public_keys {
            for counter in counters {
                if self
                    .public_keys
                    .contains_key(&(issuer_id.clone(), *counter))
                {
                    continue;
                }
                let manager = self.manager_for_download(&issuer_id.scheme_manager())?;
                let key = fetcher
                    .public_key(&manager, issuer_id, *counter)
                    .map_err(|e| e.rekind(ErrorKind::ConfigurationDownload))?;
                self.insert_public_key(issuer_id.clone(), key);
                downloaded.add_public_key(issuer_id, *counter);
            }
        }
        Ok(())
    }

    fn manager_for_download(
        &self,
        id: &SchemeManagerIdentifier,
    ) -> SessionResult<SchemeManager> {
        self.scheme_managers
            .get(id)
            .cloned()
            .ok_or_else(|| {
                SessionError::with_info(ErrorKind::ConfigurationDownload, id.as_str())
            })
    }

    // -----------------------------------------------------------------------
    // Scheme manager installation and removal
    // -----------------------------------------------------------------------

    /// Fetch a manager's root descriptor without installing it, so the
    /// caller can show it to the user first.
    pub fn download_scheme_manager(
        fetcher: &dyn DescriptorFetcher,
        url: &str,
    ) -> SessionResult<SchemeManager> {
        fetcher
            .scheme_manager(url)
            .map_err(|e| e.rekind(ErrorKind::ConfigurationDownload))
    }

    /// Install a downloaded manager after user consent.
    pub fn install_scheme_manager(&mut self, mut manager: SchemeManager) {
        manager.status = SchemeManagerStatus::Valid;
        manager.valid = true;
        let id = manager.id.clone();
        self.scheme_managers.insert(id.clone(), manager);
        self.disabled_scheme_managers.remove(&id);
        self.persist_scheme_manager(&id);
    }

    /// Remove a manager and everything that hangs under it.
    pub fn remove_scheme_manager(&mut self, id: &SchemeManagerIdentifier) {
        self.scheme_managers.remove(id);
        self.disabled_scheme_managers.remove(id);
        self.issuers.retain(|k, _| k.scheme_manager() != *id);
        self.credential_types
            .retain(|k, _| k.issuer().scheme_manager() != *id);
        self.public_keys
            .retain(|(issuer, _), _| issuer.scheme_manager() != *id);
        let dir = self.path.join(id.as_str());
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(manager = %id, error = %e, "could not remove scheme manager directory");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Persistence (best-effort; failures degrade to warnings)
    // -----------------------------------------------------------------------

    fn persist_scheme_manager(&self, id: &SchemeManagerIdentifier) {
        let Some(manager) = self.scheme_managers.get(id) else {
            return;
        };
        let dir = self.path.join(id.as_str());
        let result = (|| -> std::io::Result<()> {
            fs::create_dir_all(&dir)?;
            let description = serde_json::to_vec_pretty(manager)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs::write(dir.join("index"), hex::encode(Sha256::digest(&description)))?;
            fs::write(dir.join("description.json"), description)?;

            let issuers: BTreeMap<_, _> = self
                .issuers
                .iter()
                .filter(|(k, _)| k.scheme_manager() == *id)
                .collect();
            fs::write(dir.join("issuers.json"), serde_json::to_vec_pretty(&issuers)?)?;

            let types: BTreeMap<_, _> = self
                .credential_types
                .iter()
                .filter(|(k, _)| k.issuer().scheme_manager() == *id)
                .collect();
            fs::write(
                dir.join("credential_types.json"),
                serde_json::to_vec_pretty(&types)?,
            )?;

            let keys: Vec<(&IssuerIdentifier, &PublicKey)> = self
                .public_keys
                .iter()
                .filter(|((issuer, _), _)| issuer.scheme_manager() == *id)
                .map(|((issuer, _), key)| (issuer, key))
                .collect();
            fs::write(dir.join("public_keys.json"), serde_json::to_vec_pretty(&keys)?)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(manager = %id, error = %e, "could not persist scheme manager");
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
