//! Shared test harness: an in-memory scheme environment, scripted
//! requestor and keyshare servers, and a handler that consents on the
//! user's behalf.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use num_bigint::BigUint;
use num_traits::Zero;

use irma_client::{
    Client, ClientHandler, Credential, Handler, InstallCallback, KeyshareEnrollment,
    KeyshareTransport, PermissionCallback, PinCallback, PinStatus, RequestorTransport,
    SessionState, TransportFactory,
};
use irma_core::{
    Action, AttributeDisjunction, AttributeTypeIdentifier, Configuration, CredentialRequest,
    CredentialType, CredentialTypeIdentifier, DescriptorFetcher, DisclosureChoice,
    DisclosureRequest, ErrorKind, IdentifierSet, IssuanceRequest, Issuer, IssuerIdentifier,
    MetadataAttribute, RequestBase, RequestorJwt, SchemeManager, SchemeManagerIdentifier,
    SchemeManagerStatus, SessionError, SessionInfo, SessionResult, SignatureRequest,
};
use irma_idemix::{
    IssueCommitmentMessage, IssueSignatureMessage, PaillierPrivateKey, Proof, PublicKey,
    TestIssuer,
};

pub const DEMO_MANAGER: &str = "irma-demo";
pub const DEMO_ISSUER: &str = "irma-demo.RU";
pub const DEMO_CREDTYPE: &str = "irma-demo.RU.studentCard";
pub const DEMO_KEY_COUNTER: u32 = 2;

pub const TEST_MANAGER: &str = "test";
pub const TEST_ISSUER: &str = "test.test";
pub const TEST_CREDTYPE: &str = "test.test.mijnirma";

// ---------------------------------------------------------------------------
// Scheme environment
// ---------------------------------------------------------------------------

pub fn demo_manager() -> SchemeManager {
    SchemeManager {
        id: SchemeManagerIdentifier::new(DEMO_MANAGER),
        name: "Demo scheme".into(),
        description: "demo".into(),
        url: "https://schemes.example/irma-demo".into(),
        distributed: false,
        keyshare_server: None,
        status: SchemeManagerStatus::default(),
        valid: false,
    }
}

pub fn distributed_manager() -> SchemeManager {
    SchemeManager {
        id: SchemeManagerIdentifier::new(TEST_MANAGER),
        name: "Distributed scheme".into(),
        description: "test".into(),
        url: "https://schemes.example/test".into(),
        distributed: true,
        keyshare_server: Some("https://keyshare.example".into()),
        status: SchemeManagerStatus::default(),
        valid: false,
    }
}

pub fn demo_credential_type() -> CredentialType {
    CredentialType {
        id: CredentialTypeIdentifier::new(DEMO_CREDTYPE),
        name: "Student card".into(),
        attribute_types: vec!["studentID".into(), "level".into()],
    }
}

pub fn test_credential_type() -> CredentialType {
    CredentialType {
        id: CredentialTypeIdentifier::new(TEST_CREDTYPE),
        name: "Keyshare credential".into(),
        attribute_types: vec!["email".into()],
    }
}

pub fn public_key_of(issuer: &TestIssuer, issuer_id: &str) -> PublicKey {
    let mut pk = issuer.public_key().clone();
    pk.issuer = issuer_id.to_string();
    pk
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockFetcher {
    pub managers_by_url: Mutex<BTreeMap<String, SchemeManager>>,
    pub issuers: Mutex<BTreeMap<IssuerIdentifier, Issuer>>,
    pub credential_types: Mutex<BTreeMap<CredentialTypeIdentifier, CredentialType>>,
    pub public_keys: Mutex<BTreeMap<(IssuerIdentifier, u32), PublicKey>>,
}

impl MockFetcher {
    pub fn serve_demo_tree(&self, issuer: &TestIssuer) {
        self.managers_by_url.lock().unwrap().insert(
            "https://schemes.example/irma-demo".into(),
            demo_manager(),
        );
        self.issuers.lock().unwrap().insert(
            IssuerIdentifier::new(DEMO_ISSUER),
            Issuer {
                id: IssuerIdentifier::new(DEMO_ISSUER),
                name: "Radboud".into(),
                contact_url: String::new(),
            },
        );
        self.credential_types.lock().unwrap().insert(
            CredentialTypeIdentifier::new(DEMO_CREDTYPE),
            demo_credential_type(),
        );
        self.public_keys.lock().unwrap().insert(
            (IssuerIdentifier::new(DEMO_ISSUER), DEMO_KEY_COUNTER),
            public_key_of(issuer, DEMO_ISSUER),
        );
    }
}

impl DescriptorFetcher for MockFetcher {
    fn scheme_manager(&self, url: &str) -> SessionResult<SchemeManager> {
        self.managers_by_url
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SessionError::with_info(ErrorKind::Transport, url))
    }

    fn issuer(&self, _manager: &SchemeManager, id: &IssuerIdentifier) -> SessionResult<Issuer> {
        self.issuers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::with_info(ErrorKind::Transport, id.as_str()))
    }

    fn credential_type(
        &self,
        _manager: &SchemeManager,
        id: &CredentialTypeIdentifier,
    ) -> SessionResult<CredentialType> {
        self.credential_types
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::with_info(ErrorKind::Transport, id.as_str()))
    }

    fn public_key(
        &self,
        _manager: &SchemeManager,
        issuer: &IssuerIdentifier,
        counter: u32,
    ) -> SessionResult<PublicKey> {
        self.public_keys
            .lock()
            .unwrap()
            .get(&(issuer.clone(), counter))
            .cloned()
            .ok_or_else(|| SessionError::with_info(ErrorKind::Transport, issuer.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Requestor server
// ---------------------------------------------------------------------------

pub struct MockRequestor {
    pub info: SessionInfo,
    /// The server's own view of the issuance request, for signing.
    pub issuance: Option<(IssuanceRequest, Arc<TestIssuer>, Configuration)>,
    pub proofs_response: String,
    pub deletes: AtomicUsize,
    pub posted_proofs: Mutex<Option<Vec<Proof>>>,
}

impl MockRequestor {
    pub fn disclosure(jwt: String) -> Arc<Self> {
        Arc::new(Self {
            info: SessionInfo {
                jwt,
                nonce: BigUint::from(42u32),
                context: BigUint::from(7u32),
                keys: BTreeMap::new(),
            },
            issuance: None,
            proofs_response: "VALID".into(),
            deletes: AtomicUsize::new(0),
            posted_proofs: Mutex::new(None),
        })
    }

    pub fn issuance(jwt: String, request: IssuanceRequest, issuer: Arc<TestIssuer>) -> Arc<Self> {
        let mut keys = BTreeMap::new();
        for credreq in &request.credentials {
            keys.insert(credreq.credential_type.issuer(), credreq.key_counter);
        }
        let mut conf = Configuration::new("unused-server-conf");
        conf.credential_types.insert(
            CredentialTypeIdentifier::new(DEMO_CREDTYPE),
            demo_credential_type(),
        );
        conf.credential_types.insert(
            CredentialTypeIdentifier::new(TEST_CREDTYPE),
            test_credential_type(),
        );
        Arc::new(Self {
            info: SessionInfo {
                jwt,
                nonce: BigUint::from(42u32),
                context: BigUint::from(7u32),
                keys,
            },
            issuance: Some((request, issuer, conf)),
            proofs_response: "VALID".into(),
            deletes: AtomicUsize::new(0),
            posted_proofs: Mutex::new(None),
        })
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl RequestorTransport for MockRequestor {
    fn get_session_info(&self) -> SessionResult<SessionInfo> {
        Ok(self.info.clone())
    }

    fn post_proofs(&self, proofs: &[Proof]) -> SessionResult<String> {
        *self.posted_proofs.lock().unwrap() = Some(proofs.to_vec());
        Ok(self.proofs_response.clone())
    }

    fn post_commitments(
        &self,
        message: &IssueCommitmentMessage,
    ) -> SessionResult<Vec<IssueSignatureMessage>> {
        let Some((request, issuer, conf)) = &self.issuance else {
            return Err(SessionError::with_info(
                ErrorKind::Transport,
                "not an issuance server",
            ));
        };
        let commitments: Vec<&BigUint> = message
            .combined_proofs
            .iter()
            .filter_map(|p| match p {
                Proof::IssuanceCommitment(u) => Some(&u.u),
                _ => None,
            })
            .collect();
        let mut out = Vec::new();
        for (u, credreq) in commitments.iter().zip(&request.credentials) {
            let list = credreq
                .attribute_list(conf)
                .map_err(|e| SessionError::with_info(ErrorKind::Transport, e.to_string()))?;
            let mut full = vec![list.ints[0].clone(), BigUint::zero()];
            full.extend(list.ints[1..].iter().cloned());
            out.push(issuer.issue_from_commitment(u, &full));
        }
        Ok(out)
    }

    fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Keyshare server
// ---------------------------------------------------------------------------

pub struct MockKeyshareServer {
    pub pin_script: Mutex<VecDeque<PinStatus>>,
    /// Plaintext response share; encrypted under the user's Paillier key.
    pub share: BigUint,
    pub user_key: PaillierPrivateKey,
    pub commitment: BigUint,
}

impl MockKeyshareServer {
    pub fn new(pin_script: Vec<PinStatus>, share: u32, user_key: PaillierPrivateKey) -> Arc<Self> {
        Arc::new(Self {
            pin_script: Mutex::new(pin_script.into_iter().collect()),
            share: BigUint::from(share),
            user_key,
            commitment: BigUint::from(1u32),
        })
    }
}

impl KeyshareTransport for MockKeyshareServer {
    fn verify_pin(&self, _username: &str, _pin: &str) -> SessionResult<PinStatus> {
        self.pin_script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SessionError::with_info(ErrorKind::Keyshare, "pin script exhausted"))
    }

    fn get_commitments(&self, keys: &[(String, u32)]) -> SessionResult<Vec<BigUint>> {
        Ok(vec![self.commitment.clone(); keys.len()])
    }

    fn get_response(&self, _challenge: &BigUint) -> SessionResult<BigUint> {
        self.user_key
            .encrypt(&self.share)
            .map_err(|e| SessionError::wrap(ErrorKind::Keyshare, e))
    }
}

// ---------------------------------------------------------------------------
// Transport factory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockTransportFactory {
    pub requestor: Mutex<Option<Arc<dyn RequestorTransport>>>,
    pub keyshare: Mutex<Option<Arc<dyn KeyshareTransport>>>,
}

impl MockTransportFactory {
    pub fn with_requestor(&self, transport: Arc<dyn RequestorTransport>) {
        *self.requestor.lock().unwrap() = Some(transport);
    }

    pub fn with_keyshare(&self, transport: Arc<dyn KeyshareTransport>) {
        *self.keyshare.lock().unwrap() = Some(transport);
    }
}

impl TransportFactory for MockTransportFactory {
    fn requestor(&self, _url: &str) -> Arc<dyn RequestorTransport> {
        self.requestor
            .lock()
            .unwrap()
            .clone()
            .expect("no requestor transport scripted")
    }

    fn keyshare(&self, _url: &str) -> Arc<dyn KeyshareTransport> {
        self.keyshare
            .lock()
            .unwrap()
            .clone()
            .expect("no keyshare transport scripted")
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Action, String),
    Cancelled(Action),
    Failure(Action, SessionError),
    Unsatisfiable(Vec<AttributeDisjunction>),
    KeyshareBlocked(SchemeManagerIdentifier, u32),
    EnrollmentMissing(SchemeManagerIdentifier),
}

/// Consents to everything, picking the first candidate of each
/// disjunction, and reports terminal outcomes over a channel.
pub struct TestHandler {
    outcomes: Mutex<mpsc::Sender<Outcome>>,
    pins: Mutex<VecDeque<String>>,
}

impl TestHandler {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Outcome>) {
        Self::with_pins(Vec::new())
    }

    pub fn with_pins(pins: Vec<&str>) -> (Arc<Self>, mpsc::Receiver<Outcome>) {
        let (sender, receiver) = mpsc::channel();
        (
            Arc::new(Self {
                outcomes: Mutex::new(sender),
                pins: Mutex::new(pins.into_iter().map(String::from).collect()),
            }),
            receiver,
        )
    }

    fn report(&self, outcome: Outcome) {
        let _ = self.outcomes.lock().unwrap().send(outcome);
    }

    fn first_candidates(base: &RequestBase) -> DisclosureChoice {
        DisclosureChoice {
            attributes: base
                .candidates
                .iter()
                .filter_map(|refs| refs.first().cloned())
                .collect(),
        }
    }
}

impl Handler for TestHandler {
    fn status_update(&self, _action: Action, _state: SessionState) {}

    fn success(&self, action: Action, result: String) {
        self.report(Outcome::Success(action, result));
    }

    fn cancelled(&self, action: Action) {
        self.report(Outcome::Cancelled(action));
    }

    fn failure(&self, action: Action, error: SessionError) {
        self.report(Outcome::Failure(action, error));
    }

    fn unsatisfiable_request(
        &self,
        _action: Action,
        _server_name: String,
        missing: Vec<AttributeDisjunction>,
    ) {
        self.report(Outcome::Unsatisfiable(missing));
    }

    fn keyshare_blocked(&self, manager: SchemeManagerIdentifier, duration: u32) {
        self.report(Outcome::KeyshareBlocked(manager, duration));
    }

    fn keyshare_enrollment_missing(&self, manager: SchemeManagerIdentifier) {
        self.report(Outcome::EnrollmentMissing(manager));
    }

    fn request_verification_permission(
        &self,
        request: DisclosureRequest,
        _server_name: String,
        callback: PermissionCallback,
    ) {
        callback.proceed(Self::first_candidates(&request.base));
    }

    fn request_signature_permission(
        &self,
        request: SignatureRequest,
        _server_name: String,
        callback: PermissionCallback,
    ) {
        callback.proceed(Self::first_candidates(&request.base));
    }

    fn request_issuance_permission(
        &self,
        request: IssuanceRequest,
        _server_name: String,
        callback: PermissionCallback,
    ) {
        callback.proceed(Self::first_candidates(&request.base));
    }

    fn request_scheme_manager_permission(
        &self,
        _manager: SchemeManager,
        callback: InstallCallback,
    ) {
        callback.proceed();
    }

    fn request_pin(&self, _remaining_attempts: i32, callback: PinCallback) {
        match self.pins.lock().unwrap().pop_front() {
            Some(pin) => callback.enter(pin),
            None => callback.cancel(),
        }
    }
}

/// Records application-level callbacks.
#[derive(Default)]
pub struct RecordingClientHandler {
    pub configuration_updates: Mutex<Vec<IdentifierSet>>,
    pub attribute_updates: AtomicUsize,
}

impl ClientHandler for RecordingClientHandler {
    fn update_configuration(&self, new: &IdentifierSet) {
        self.configuration_updates.lock().unwrap().push(new.clone());
    }

    fn update_attributes(&self) {
        self.attribute_updates.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

pub struct TestEnv {
    pub client: Arc<Client>,
    pub issuer: Arc<TestIssuer>,
    pub fetcher: Arc<MockFetcher>,
    pub factory: Arc<MockTransportFactory>,
    pub client_handler: Arc<RecordingClientHandler>,
    pub storage_dir: std::path::PathBuf,
    pub configuration_dir: std::path::PathBuf,
}

impl TestEnv {
    /// A fresh wallet with the demo scheme fully seeded. Installing the
    /// manager last persists the whole tree, so reload tests find it.
    pub fn new(test: &str) -> Self {
        let env = Self::bare(test);
        {
            let mut conf = env.client.configuration.write().unwrap();
            conf.issuers.insert(
                IssuerIdentifier::new(DEMO_ISSUER),
                Issuer {
                    id: IssuerIdentifier::new(DEMO_ISSUER),
                    name: "Radboud".into(),
                    contact_url: String::new(),
                },
            );
            conf.credential_types.insert(
                CredentialTypeIdentifier::new(DEMO_CREDTYPE),
                demo_credential_type(),
            );
            conf.insert_public_key(
                IssuerIdentifier::new(DEMO_ISSUER),
                public_key_of(&env.issuer, DEMO_ISSUER),
            );
            conf.install_scheme_manager(demo_manager());
        }
        env
    }

    /// A fresh wallet with an empty configuration.
    pub fn bare(test: &str) -> Self {
        let storage_dir = std::env::temp_dir().join(format!("irma-client-test-{}-storage", test));
        let configuration_dir =
            std::env::temp_dir().join(format!("irma-client-test-{}-conf", test));
        let _ = std::fs::remove_dir_all(&storage_dir);
        let _ = std::fs::remove_dir_all(&configuration_dir);

        let fetcher = Arc::new(MockFetcher::default());
        let factory = Arc::new(MockTransportFactory::default());
        let client_handler = Arc::new(RecordingClientHandler::default());
        let client = Client::new(
            &storage_dir,
            &configuration_dir,
            fetcher.clone(),
            factory.clone(),
            client_handler.clone(),
        )
        .expect("client loads");

        Self {
            client,
            issuer: Arc::new(TestIssuer::with_counter(4, DEMO_KEY_COUNTER)),
            fetcher,
            factory,
            client_handler,
            storage_dir,
            configuration_dir,
        }
    }

    /// Store a verifiable demo credential directly in the wallet.
    pub fn seed_demo_credential(&self, student_id: &str, level: &str) -> Credential {
        let meta = MetadataAttribute::new(
            CredentialTypeIdentifier::new(DEMO_CREDTYPE),
            DEMO_KEY_COUNTER as u16,
            365,
        );
        let attributes = vec![
            meta.to_int(),
            self.client.master_secret(),
            irma_core::encode_attribute_value(student_id),
            irma_core::encode_attribute_value(level),
        ];
        let signature = self.issuer.sign(&attributes);
        let cred = Credential {
            credential_type: CredentialTypeIdentifier::new(DEMO_CREDTYPE),
            attributes,
            signature,
        };
        self.client
            .add_credential(cred.clone())
            .expect("seed credential");
        cred
    }
}

pub fn disjunction_for(attr: &str) -> AttributeDisjunction {
    AttributeDisjunction {
        label: String::new(),
        attributes: vec![AttributeTypeIdentifier::new(attr)],
        values: BTreeMap::new(),
    }
}

pub fn disjunction_with_value(attr: &str, value: &str) -> AttributeDisjunction {
    let id = AttributeTypeIdentifier::new(attr);
    let mut values = BTreeMap::new();
    values.insert(id.clone(), value.to_string());
    AttributeDisjunction {
        label: String::new(),
        attributes: vec![id],
        values,
    }
}

pub fn issuance_request(attrs: &[(&str, &str)]) -> IssuanceRequest {
    let mut attributes = BTreeMap::new();
    for (k, v) in attrs {
        attributes.insert(k.to_string(), v.to_string());
    }
    IssuanceRequest {
        base: RequestBase::default(),
        credentials: vec![CredentialRequest {
            validity: None,
            key_counter: DEMO_KEY_COUNTER,
            credential_type: CredentialTypeIdentifier::new(DEMO_CREDTYPE),
            attributes,
        }],
        disclose: Vec::new(),
        credential_info_list: Vec::new(),
    }
}

pub fn issuance_jwt(server_name: &str, request: &IssuanceRequest) -> String {
    RequestorJwt::IdentityProvider {
        server_name: server_name.into(),
        issued_at: 1_700_000_000,
        request: request.clone(),
    }
    .to_compact()
    .expect("jwt composes")
}

pub fn disclosure_jwt(server_name: &str, content: Vec<AttributeDisjunction>) -> String {
    RequestorJwt::ServiceProvider {
        server_name: server_name.into(),
        issued_at: 1_700_000_000,
        request: DisclosureRequest {
            base: RequestBase::default(),
            content,
        },
    }
    .to_compact()
    .expect("jwt composes")
}

pub fn qr(url: &str, action: Action) -> irma_core::Qr {
    irma_core::Qr {
        url: url.into(),
        protocol_version: "2.0".into(),
        protocol_max_version: "2.4".into(),
        action,
    }
}

pub fn await_outcome(receiver: &mpsc::Receiver<Outcome>) -> Outcome {
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("session reached an outcome")
}
