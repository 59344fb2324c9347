//! The wallet: stored credentials keyed by `(credential type, index)`, the
//! master secret, keyshare enrollments, candidate selection, and proof
//! construction on top of the idemix builders.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::warn;

use irma_core::{
    AttributeDisjunction, AttributeList, AttributeRef, AttributeTypeIdentifier, Configuration,
    CredentialInfo, CredentialTypeIdentifier, DescriptorFetcher, DisclosureChoice, ErrorKind,
    IssuanceRequest, MetadataAttribute, SchemeManagerIdentifier, SessionError, SessionResult,
};
use irma_idemix::{
    build_proof_list, random_big_int, CLSignature, CredentialBuilder, DisclosureProofBuilder,
    IssueCommitmentMessage, IssueSignatureMessage, PaillierPrivateKey, Proof, ProofBuilder,
    PublicKey, PARAMS_4096, SECRET_ATTRIBUTE_INDEX,
};

use crate::logs::LogEntry;
use crate::storage::Storage;
use crate::transport::TransportFactory;

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// One stored credential. `attributes[0]` is the metadata integer,
/// `attributes[1]` the master secret, the rest the values in declared
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_type: CredentialTypeIdentifier,
    pub attributes: Vec<BigUint>,
    pub signature: CLSignature,
}

impl Credential {
    pub fn metadata(&self) -> SessionResult<MetadataAttribute> {
        let meta = self.attributes.first().ok_or_else(|| {
            SessionError::with_info(ErrorKind::Serialization, "credential without attributes")
        })?;
        MetadataAttribute::from_int(meta)
    }

    /// The user-visible attribute list: everything except the secret.
    pub fn attribute_list(&self) -> AttributeList {
        let mut ints = Vec::with_capacity(self.attributes.len().saturating_sub(1));
        for (i, v) in self.attributes.iter().enumerate() {
            if i != SECRET_ATTRIBUTE_INDEX {
                ints.push(v.clone());
            }
        }
        AttributeList::new(ints)
    }

    pub fn hash(&self) -> String {
        self.attribute_list().hash()
    }

    /// Decoded value at a full-vector attribute position (2-based values).
    pub fn value_at(&self, attribute_index: usize) -> Option<String> {
        if attribute_index < 2 {
            return None;
        }
        self.attributes
            .get(attribute_index)
            .map(irma_core::decode_attribute_value)
    }
}

// ---------------------------------------------------------------------------
// Keyshare enrollment record
// ---------------------------------------------------------------------------

/// Stored per distributed scheme manager the user is enrolled with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyshareEnrollment {
    pub username: String,
    pub nonce: Vec<u8>,
    pub token: String,
    pub private_key: PaillierPrivateKey,
}

// ---------------------------------------------------------------------------
// ClientHandler -- application-level callbacks
// ---------------------------------------------------------------------------

/// Callbacks towards the embedding application (as opposed to the
/// per-session `Handler`).
pub trait ClientHandler: Send + Sync {
    /// The configuration gained descriptors, mid-session or by installation.
    fn update_configuration(&self, new: &irma_core::IdentifierSet);
    /// The wallet contents changed (issuance, removal).
    fn update_attributes(&self);
}

pub(crate) struct IssuanceState {
    pub nonce2: BigUint,
    pub builders: Vec<ProofBuilder>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct Client {
    pub configuration: Arc<RwLock<Configuration>>,
    pub(crate) storage: Storage,
    pub(crate) handler: Arc<dyn ClientHandler>,
    pub(crate) transports: Arc<dyn TransportFactory>,
    pub(crate) fetcher: Arc<dyn DescriptorFetcher>,
    secret_key: RwLock<BigUint>,
    credentials: RwLock<BTreeMap<CredentialTypeIdentifier, BTreeMap<u32, Credential>>>,
    keyshare_servers: RwLock<BTreeMap<SchemeManagerIdentifier, KeyshareEnrollment>>,
    paillier_cache: Mutex<Option<PaillierPrivateKey>>,
    logs: Mutex<Vec<LogEntry>>,
    pub(crate) issuance_state: Mutex<Option<IssuanceState>>,
}

impl Client {
    /// Load a client from its storage and configuration directories.
    /// Corrupt persisted state degrades: unloadable credentials are dropped
    /// with a warning, unloadable scheme managers are disabled.
    pub fn new(
        storage_path: impl Into<PathBuf>,
        configuration_path: impl Into<PathBuf>,
        fetcher: Arc<dyn DescriptorFetcher>,
        transports: Arc<dyn TransportFactory>,
        handler: Arc<dyn ClientHandler>,
    ) -> SessionResult<Arc<Self>> {
        let storage = Storage::new(storage_path)?;

        let mut configuration = Configuration::new(configuration_path.into());
        if let Err(e) = configuration.parse_folder() {
            warn!(manager = %e.manager, status = %e.status, "scheme manager disabled at load");
        }

        let secret = match storage.load_master_secret() {
            Some(secret) => secret,
            None => {
                let secret = random_big_int(PARAMS_4096.l_m);
                storage.store_master_secret(&secret)?;
                secret
            }
        };

        let client = Self {
            configuration: Arc::new(RwLock::new(configuration)),
            handler,
            transports,
            fetcher,
            secret_key: RwLock::new(secret.clone()),
            credentials: RwLock::new(BTreeMap::new()),
            keyshare_servers: RwLock::new(storage.load_keyshare_servers()),
            paillier_cache: Mutex::new(storage.load_paillier_cache()),
            logs: Mutex::new(storage.load_logs()),
            issuance_state: Mutex::new(None),
            storage,
        };

        let loaded = client.storage.load_credentials();
        {
            let conf = client.configuration.read().expect("configuration lock poisoned");
            let mut credentials = client.credentials.write().expect("credential lock poisoned");
            for cred in loaded {
                match Self::validate_credential(&conf, &secret, &cred) {
                    Ok(()) => {
                        let instances = credentials.entry(cred.credential_type.clone()).or_default();
                        let index = next_index(instances);
                        instances.insert(index, cred);
                    }
                    Err(e) => {
                        warn!(credential = %cred.credential_type, error = %e, "dropping invalid stored credential");
                    }
                }
            }
        }

        Ok(Arc::new(client))
    }

    fn validate_credential(
        conf: &Configuration,
        secret: &BigUint,
        cred: &Credential,
    ) -> SessionResult<()> {
        let meta = cred.metadata()?;
        if cred.attributes.get(SECRET_ATTRIBUTE_INDEX) != Some(secret) {
            return Err(SessionError::with_info(
                ErrorKind::Crypto,
                "credential secret differs from master secret",
            ));
        }
        let pk = Self::public_key_with(conf, &cred.credential_type, meta.key_counter as u32)?;
        if !cred.signature.verify(&pk, &cred.attributes) {
            return Err(SessionError::with_info(
                ErrorKind::Crypto,
                "credential signature invalid",
            ));
        }
        Ok(())
    }

    fn public_key_with(
        conf: &Configuration,
        credential_type: &CredentialTypeIdentifier,
        counter: u32,
    ) -> SessionResult<PublicKey> {
        let issuer = credential_type.issuer();
        conf.public_key(&issuer, counter).cloned().ok_or_else(|| {
            SessionError::with_info(
                ErrorKind::Crypto,
                format!("no public key {} for {}", counter, issuer),
            )
        })
    }

    // -----------------------------------------------------------------------
    // Wallet reads
    // -----------------------------------------------------------------------

    pub fn master_secret(&self) -> BigUint {
        self.secret_key.read().expect("secret lock poisoned").clone()
    }

    pub fn credential(&self, id: &CredentialTypeIdentifier, index: u32) -> Option<Credential> {
        self.credentials
            .read()
            .expect("credential lock poisoned")
            .get(id)
            .and_then(|instances| instances.get(&index))
            .cloned()
    }

    /// Issuer public key a credential was signed under, resolved through
    /// the key counter in its metadata attribute.
    pub fn public_key_for(&self, cred: &Credential) -> SessionResult<PublicKey> {
        let meta = cred.metadata()?;
        let conf = self.configuration.read().expect("configuration lock poisoned");
        Self::public_key_with(&conf, &cred.credential_type, meta.key_counter as u32)
    }

    pub fn credential_info_list(&self) -> Vec<CredentialInfo> {
        let conf = self.configuration.read().expect("configuration lock poisoned");
        let credentials = self.credentials.read().expect("credential lock poisoned");
        let mut out = Vec::new();
        for (credtype_id, instances) in credentials.iter() {
            for cred in instances.values() {
                let Ok(meta) = cred.metadata() else { continue };
                let mut attributes = BTreeMap::new();
                if let Some(credtype) = conf.credential_type(credtype_id) {
                    for (position, short) in credtype.attribute_types.iter().enumerate() {
                        if let Some(value) = cred.value_at(position + 2) {
                            attributes.insert(short.clone(), value);
                        }
                    }
                }
                out.push(CredentialInfo {
                    credential_type: credtype_id.clone(),
                    signing_date: meta.signing_date(),
                    expiry: meta.expiry(),
                    key_counter: meta.key_counter,
                    attributes,
                });
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Wallet writes
    // -----------------------------------------------------------------------

    /// Insert a credential, enforcing the wallet invariants: the master
    /// secret must sit at its fixed position and the signature must verify
    /// under the issuer key named by the metadata attribute.
    pub fn add_credential(&self, cred: Credential) -> SessionResult<()> {
        {
            let conf = self.configuration.read().expect("configuration lock poisoned");
            let secret = self.secret_key.read().expect("secret lock poisoned");
            Self::validate_credential(&conf, &secret, &cred)?;
        }
        let mut credentials = self.credentials.write().expect("credential lock poisoned");
        let instances = credentials.entry(cred.credential_type.clone()).or_default();
        let index = next_index(instances);
        instances.insert(index, cred);
        self.persist_credentials(&credentials)
    }

    pub fn remove_credential(
        &self,
        id: &CredentialTypeIdentifier,
        index: u32,
    ) -> SessionResult<()> {
        let mut credentials = self.credentials.write().expect("credential lock poisoned");
        self.remove_locked(&mut credentials, id, index)
    }

    pub fn remove_credential_by_hash(&self, hash: &str) -> SessionResult<()> {
        let mut credentials = self.credentials.write().expect("credential lock poisoned");
        let mut found: Option<(CredentialTypeIdentifier, u32)> = None;
        for (credtype, instances) in credentials.iter() {
            for (index, cred) in instances {
                if cred.hash() == hash {
                    found = Some((credtype.clone(), *index));
                    break;
                }
            }
        }
        match found {
            Some((id, index)) => self.remove_locked(&mut credentials, &id, index),
            None => Ok(()), // already gone; removal is idempotent
        }
    }

    /// Both removal routes end here.
    fn remove_locked(
        &self,
        credentials: &mut BTreeMap<CredentialTypeIdentifier, BTreeMap<u32, Credential>>,
        id: &CredentialTypeIdentifier,
        index: u32,
    ) -> SessionResult<()> {
        let removed = credentials
            .get_mut(id)
            .map(|instances| instances.remove(&index).is_some())
            .unwrap_or(false);
        if !removed {
            return Ok(());
        }
        if let Some(instances) = credentials.get(id) {
            if instances.is_empty() {
                credentials.remove(id);
            }
        }
        self.persist_credentials(credentials)
    }

    fn persist_credentials(
        &self,
        credentials: &BTreeMap<CredentialTypeIdentifier, BTreeMap<u32, Credential>>,
    ) -> SessionResult<()> {
        let flat: Vec<Credential> = credentials
            .values()
            .flat_map(|instances| instances.values().cloned())
            .collect();
        self.storage.store_credentials(&flat)
    }

    // -----------------------------------------------------------------------
    // Candidate selection
    // -----------------------------------------------------------------------

    /// Attribute references that can satisfy one disjunction: non-expired
    /// credentials of the right types, filtered by required literal values.
    /// Pure and deterministic: credential types lexicographic, instance
    /// indices ascending.
    pub fn candidates(&self, disjunction: &AttributeDisjunction) -> Vec<AttributeRef> {
        let conf = self.configuration.read().expect("configuration lock poisoned");
        let credentials = self.credentials.read().expect("credential lock poisoned");
        let now = Utc::now();

        let mut by_credtype: BTreeMap<CredentialTypeIdentifier, Vec<&AttributeTypeIdentifier>> =
            BTreeMap::new();
        for attr_type in &disjunction.attributes {
            by_credtype
                .entry(attr_type.credential_type())
                .or_default()
                .push(attr_type);
        }

        let mut out = Vec::new();
        for (credtype_id, attr_types) in by_credtype {
            let Some(instances) = credentials.get(&credtype_id) else {
                continue;
            };
            for attr_type in attr_types {
                let attribute_index = if attr_type.is_credential() {
                    Some(0)
                } else {
                    conf.credential_type(&credtype_id)
                        .and_then(|ct| ct.attribute_position(attr_type.name()))
                        .map(|position| position + 2)
                };
                let Some(attribute_index) = attribute_index else {
                    continue;
                };
                for cred in instances.values() {
                    let Ok(meta) = cred.metadata() else { continue };
                    if meta.is_expired_at(now) {
                        continue;
                    }
                    if let Some(required) = disjunction.required_value(attr_type) {
                        if cred.value_at(attribute_index).as_deref() != Some(required) {
                            continue;
                        }
                    }
                    out.push(AttributeRef {
                        attr_type: attr_type.clone(),
                        credential_hash: cred.hash(),
                        attribute_index,
                    });
                }
            }
        }
        out
    }

    /// Candidates per disjunction (aligned by position) plus the
    /// disjunctions no stored credential can satisfy.
    pub fn check_satisfiability(
        &self,
        disjunctions: &[AttributeDisjunction],
    ) -> (Vec<Vec<AttributeRef>>, Vec<AttributeDisjunction>) {
        let mut candidates = Vec::with_capacity(disjunctions.len());
        let mut missing = Vec::new();
        for disjunction in disjunctions {
            let refs = self.candidates(disjunction);
            if refs.is_empty() {
                missing.push(disjunction.clone());
            }
            candidates.push(refs);
        }
        (candidates, missing)
    }

    // -----------------------------------------------------------------------
    // Proof construction
    // -----------------------------------------------------------------------

    /// One disclosure builder per distinct chosen credential, disclosing
    /// the metadata attribute plus every chosen value.
    pub fn proof_builders(&self, choice: &DisclosureChoice) -> SessionResult<Vec<ProofBuilder>> {
        let conf = self.configuration.read().expect("configuration lock poisoned");
        let credentials = self.credentials.read().expect("credential lock poisoned");

        let mut by_hash: BTreeMap<String, &Credential> = BTreeMap::new();
        for instances in credentials.values() {
            for cred in instances.values() {
                by_hash.insert(cred.hash(), cred);
            }
        }

        let mut order: Vec<&str> = Vec::new();
        let mut disclosed: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for r in &choice.attributes {
            let set = disclosed
                .entry(r.credential_hash.as_str())
                .or_insert_with(|| {
                    order.push(r.credential_hash.as_str());
                    BTreeSet::new()
                });
            set.insert(0);
            if r.attribute_index != SECRET_ATTRIBUTE_INDEX {
                set.insert(r.attribute_index);
            }
        }

        let mut builders = Vec::with_capacity(order.len());
        for hash in order {
            let cred = by_hash.get(hash).ok_or_else(|| {
                SessionError::with_info(ErrorKind::Crypto, "chosen credential not in wallet")
            })?;
            let meta = cred.metadata()?;
            let pk = Self::public_key_with(&conf, &cred.credential_type, meta.key_counter as u32)?;
            let builder = DisclosureProofBuilder::new(
                pk,
                cred.signature.clone(),
                cred.attributes.clone(),
                disclosed.remove(hash).unwrap_or_default(),
            )?;
            builders.push(ProofBuilder::Disclosure(builder));
        }
        Ok(builders)
    }

    /// Disclosure or signature proofs over the user's choice, with one
    /// shared challenge.
    pub fn proofs(
        &self,
        choice: &DisclosureChoice,
        context: &BigUint,
        nonce: &BigUint,
    ) -> SessionResult<Vec<Proof>> {
        let mut builders = self.proof_builders(choice)?;
        Ok(build_proof_list(context, nonce, &mut builders)?)
    }

    /// Builders for an issuance session: one credential builder per
    /// requested credential, plus disclosure builders for the embedded
    /// disclosure if the user's choice includes one. Also establishes the
    /// per-session issuance state (fresh `nonce2` + the builder list).
    pub fn issuance_proof_builders(
        &self,
        request: &IssuanceRequest,
    ) -> SessionResult<Vec<ProofBuilder>> {
        let secret = self.master_secret();
        let mut builders = Vec::new();
        {
            let conf = self.configuration.read().expect("configuration lock poisoned");
            for credreq in &request.credentials {
                let pk = Self::public_key_with(
                    &conf,
                    &credreq.credential_type,
                    credreq.key_counter,
                )?;
                builders.push(ProofBuilder::Credential(CredentialBuilder::new(
                    pk,
                    secret.clone(),
                )?));
            }
        }
        if let Some(choice) = request.base.choice.as_ref() {
            builders.extend(self.proof_builders(choice)?);
        }

        let nonce2 = random_big_int(PARAMS_4096.l_statzk);
        *self.issuance_state.lock().expect("issuance lock poisoned") = Some(IssuanceState {
            nonce2,
            builders: builders.clone(),
        });
        Ok(builders)
    }

    pub(crate) fn issuance_nonce2(&self) -> Option<BigUint> {
        self.issuance_state
            .lock()
            .expect("issuance lock poisoned")
            .as_ref()
            .map(|state| state.nonce2.clone())
    }

    /// The full first issuance message.
    pub fn issue_commitments(
        &self,
        request: &IssuanceRequest,
    ) -> SessionResult<IssueCommitmentMessage> {
        let mut builders = self.issuance_proof_builders(request)?;
        let context = request.base.context.clone().unwrap_or_default();
        let nonce = request.base.nonce.clone().unwrap_or_default();
        let combined_proofs = build_proof_list(&context, &nonce, &mut builders)?;
        let nonce2 = self.issuance_nonce2().ok_or_else(|| {
            SessionError::with_info(ErrorKind::Crypto, "no issuance in progress")
        })?;
        Ok(IssueCommitmentMessage {
            combined_proofs,
            nonce2,
        })
    }

    /// Complete the issuer's partial signatures into stored credentials.
    /// Returns the received signatures for the session log.
    pub fn construct_credentials(
        &self,
        messages: &[IssueSignatureMessage],
        request: &IssuanceRequest,
    ) -> SessionResult<Vec<CLSignature>> {
        let state = self
            .issuance_state
            .lock()
            .expect("issuance lock poisoned")
            .take()
            .ok_or_else(|| {
                SessionError::with_info(ErrorKind::Crypto, "no issuance in progress")
            })?;
        let cred_builders: Vec<&CredentialBuilder> = state
            .builders
            .iter()
            .filter_map(|b| match b {
                ProofBuilder::Credential(c) => Some(c),
                _ => None,
            })
            .collect();
        if messages.len() != cred_builders.len() {
            return Err(SessionError::with_info(
                ErrorKind::Crypto,
                format!(
                    "expected {} signatures, received {}",
                    cred_builders.len(),
                    messages.len()
                ),
            ));
        }

        let secret = self.master_secret();
        let mut constructed = Vec::new();
        let mut received = Vec::new();
        {
            let conf = self.configuration.read().expect("configuration lock poisoned");
            for ((message, builder), credreq) in messages
                .iter()
                .zip(&cred_builders)
                .zip(&request.credentials)
            {
                let list = credreq.attribute_list(&conf)?;
                let mut attributes = Vec::with_capacity(list.ints.len() + 1);
                attributes.push(list.ints[0].clone());
                attributes.push(secret.clone());
                attributes.extend(list.ints[1..].iter().cloned());

                let signature = builder.construct_credential(message, &attributes)?;
                received.push(signature.clone());
                constructed.push(Credential {
                    credential_type: credreq.credential_type.clone(),
                    attributes,
                    signature,
                });
            }
        }
        for cred in constructed {
            self.add_credential(cred)?;
        }
        Ok(received)
    }

    /// Disclosed attribute values for the session log, resolved from the
    /// user's choice.
    pub(crate) fn disclosed_attributes(
        &self,
        choice: &DisclosureChoice,
    ) -> BTreeMap<AttributeTypeIdentifier, String> {
        let credentials = self.credentials.read().expect("credential lock poisoned");
        let mut by_hash: BTreeMap<String, &Credential> = BTreeMap::new();
        for instances in credentials.values() {
            for cred in instances.values() {
                by_hash.insert(cred.hash(), cred);
            }
        }
        let mut out = BTreeMap::new();
        for r in &choice.attributes {
            let value = by_hash
                .get(&r.credential_hash)
                .and_then(|cred| cred.value_at(r.attribute_index))
                .unwrap_or_default();
            out.insert(r.attr_type.clone(), value);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Keyshare enrollment records
    // -----------------------------------------------------------------------

    pub fn keyshare_enrollment(
        &self,
        manager: &SchemeManagerIdentifier,
    ) -> Option<KeyshareEnrollment> {
        self.keyshare_servers
            .read()
            .expect("keyshare lock poisoned")
            .get(manager)
            .cloned()
    }

    pub fn set_keyshare_enrollment(
        &self,
        manager: SchemeManagerIdentifier,
        enrollment: KeyshareEnrollment,
    ) -> SessionResult<()> {
        let mut servers = self.keyshare_servers.write().expect("keyshare lock poisoned");
        servers.insert(manager, enrollment);
        self.storage.store_keyshare_servers(&servers)
    }

    /// Distributed scheme managers the wallet has no enrollment for.
    pub fn unenrolled_scheme_managers(&self) -> Vec<SchemeManagerIdentifier> {
        let conf = self.configuration.read().expect("configuration lock poisoned");
        let servers = self.keyshare_servers.read().expect("keyshare lock poisoned");
        conf.scheme_managers
            .iter()
            .filter(|(id, manager)| manager.distributed && !servers.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Take the cached Paillier key, leaving the cache empty. Falls back to
    /// building one when the cache is cold.
    pub fn paillier_key(&self) -> PaillierPrivateKey {
        let mut cache = self.paillier_cache.lock().expect("paillier lock poisoned");
        let key = cache.take().unwrap_or_else(PaillierPrivateKey::bootstrap);
        if let Err(e) = self.storage.store_paillier_cache(&None) {
            warn!(error = %e, "could not persist paillier cache");
        }
        key
    }

    pub fn fill_paillier_cache(&self) {
        let mut cache = self.paillier_cache.lock().expect("paillier lock poisoned");
        if cache.is_none() {
            let key = PaillierPrivateKey::bootstrap();
            if let Err(e) = self.storage.store_paillier_cache(&Some(key.clone())) {
                warn!(error = %e, "could not persist paillier cache");
            }
            *cache = Some(key);
        }
    }

    // -----------------------------------------------------------------------
    // Session log
    // -----------------------------------------------------------------------

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().expect("log lock poisoned").clone()
    }

    pub(crate) fn add_log_entry(&self, entry: LogEntry) -> SessionResult<()> {
        let mut logs = self.logs.lock().expect("log lock poisoned");
        logs.push(entry);
        self.storage.store_logs(&logs)
    }
}

fn next_index(instances: &BTreeMap<u32, Credential>) -> u32 {
    instances.keys().next_back().map(|i| i + 1).unwrap_or(0)
}
