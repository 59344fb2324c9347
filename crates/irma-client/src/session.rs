//! The session state machine: QR or manual input through consent, key
//! resolution, proof construction, response exchange, and logging.
//!
//! A session runs on its own task; user-consent callbacks re-enter the
//! engine by posting a fresh task, never synchronously from inside the
//! handler. Every task runs under a panic barrier that converts a panic
//! into a `Panic` session failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use irma_core::{
    negotiate, parse_requestor_jwt, Action, AttributeDisjunction, Configuration,
    DisclosureChoice, DisclosureRequest, ErrorKind, IdentifierSet, IssuanceRequest,
    ProtocolVersion, Qr, SchemeManager, SchemeManagerIdentifier, SessionError, SessionRequest,
    SignatureRequest, DISCLOSURE_RESPONSE_VALID, MANUAL_PROTOCOL_VERSION,
};
use irma_idemix::{CLSignature, IssueCommitmentMessage, Proof};

use crate::client::Client;
use crate::keyshare::{run_keyshare_session, KeyshareParticipant, KeyshareSessionHandler, PinCallback};
use crate::logs::LogEntry;
use crate::transport::RequestorTransport;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Engine states, in happens-before order. A state is never revisited once
/// left; the four terminal states admit no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Negotiating,
    Fetching,
    Resolving,
    Checking,
    AwaitingUser,
    Keyshare,
    BuildingProof,
    Sending,
    Done,
    Cancelled,
    Failed,
    Unsatisfiable,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Created => 0,
            SessionState::Negotiating => 1,
            SessionState::Fetching => 2,
            SessionState::Resolving => 3,
            SessionState::Checking => 4,
            SessionState::AwaitingUser => 5,
            SessionState::Keyshare => 6,
            SessionState::BuildingProof => 7,
            SessionState::Sending => 8,
            SessionState::Done
            | SessionState::Cancelled
            | SessionState::Failed
            | SessionState::Unsatisfiable => 9,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 9
    }
}

/// What a session ultimately sends: a proof list for disclosure and
/// signature sessions, a commitment message for issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProofMessage {
    Proofs(Vec<Proof>),
    Commitments(IssueCommitmentMessage),
}

// ---------------------------------------------------------------------------
// Handler -- per-session callbacks towards the user interface
// ---------------------------------------------------------------------------

pub trait Handler: Send + Sync {
    fn status_update(&self, action: Action, state: SessionState);
    fn success(&self, action: Action, result: String);
    fn cancelled(&self, action: Action);
    fn failure(&self, action: Action, error: SessionError);
    fn unsatisfiable_request(
        &self,
        action: Action,
        server_name: String,
        missing: Vec<AttributeDisjunction>,
    );

    fn keyshare_blocked(&self, manager: SchemeManagerIdentifier, duration: u32);
    fn keyshare_enrollment_missing(&self, manager: SchemeManagerIdentifier);

    fn request_verification_permission(
        &self,
        request: DisclosureRequest,
        server_name: String,
        callback: PermissionCallback,
    );
    fn request_signature_permission(
        &self,
        request: SignatureRequest,
        server_name: String,
        callback: PermissionCallback,
    );
    fn request_issuance_permission(
        &self,
        request: IssuanceRequest,
        server_name: String,
        callback: PermissionCallback,
    );
    fn request_scheme_manager_permission(&self, manager: SchemeManager, callback: InstallCallback);

    /// `remaining_attempts < 0` means the count is not yet known.
    fn request_pin(&self, remaining_attempts: i32, callback: PinCallback);
}

/// Resolves the consent dialog. Consuming it posts a fresh engine task, so
/// the handler never re-enters the engine on its own stack.
pub struct PermissionCallback {
    pub(crate) session: SessionHandle,
}

impl PermissionCallback {
    pub fn proceed(self, choice: DisclosureChoice) {
        spawn_session_task(self.session, move |s| s.continue_session(choice));
    }

    pub fn cancel(self) {
        spawn_session_task(self.session, |s| s.cancel());
    }
}

/// Resolves the scheme manager installation dialog.
pub struct InstallCallback {
    pub(crate) session: SessionHandle,
    pub(crate) manager: SchemeManager,
}

impl InstallCallback {
    pub fn proceed(self) {
        let manager = self.manager;
        spawn_session_task(self.session, move |s| s.install_manager(manager));
    }

    pub fn cancel(self) {
        spawn_session_task(self.session, |s| s.cancel());
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    action: Action,
    /// Empty for manual sessions.
    server_url: String,
    handler: Arc<dyn Handler>,
    client: Arc<Client>,
    state: Mutex<EngineState>,
}

struct EngineState {
    machine: SessionState,
    version: ProtocolVersion,
    request: Option<SessionRequest>,
    server_name: String,
    serialized_jwt: String,
    downloaded: IdentifierSet,
    done: bool,
    transport: Option<Arc<dyn RequestorTransport>>,
}

fn spawn_session_task(
    session: SessionHandle,
    task: impl FnOnce(&SessionHandle) + Send + 'static,
) {
    thread::spawn(move || {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(&session))) {
            session.fail(panic_to_error(payload));
        }
    });
}

fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> SessionError {
    let info = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    SessionError::with_info(ErrorKind::Panic, info)
}

impl Client {
    /// Start an interactive session from a scanned QR. Returns a handle the
    /// application can dismiss, or `None` when the session could not even
    /// begin (the handler has already been told why).
    pub fn new_session(
        self: &Arc<Self>,
        qr: &Qr,
        handler: Arc<dyn Handler>,
    ) -> Option<SessionHandle> {
        let session = SessionHandle::new(
            self.clone(),
            qr.action,
            qr.url.clone(),
            handler,
        );

        if qr.action == Action::SchemeManager {
            spawn_session_task(session.clone(), |s| s.manager_session());
            return Some(session);
        }

        session.transition(SessionState::Negotiating);
        let negotiated = qr
            .protocol_version
            .parse::<ProtocolVersion>()
            .and_then(|min| {
                qr.protocol_max_version
                    .parse::<ProtocolVersion>()
                    .and_then(|max| negotiate(min, max))
            });
        let version = match negotiated {
            Ok(version) => version,
            Err(e) => {
                session.fail(e);
                return None;
            }
        };
        session.set_version(version);

        match qr.action {
            Action::Disclosing | Action::Signing | Action::Issuing => {}
            other => {
                session.fail(SessionError::with_info(
                    ErrorKind::UnknownAction,
                    other.to_string(),
                ));
                return None;
            }
        }

        spawn_session_task(session.clone(), |s| s.start());
        Some(session)
    }

    /// Start a manual (serverless) signature session from request JSON.
    /// Negotiation, fetching, and sending are skipped; the final artefact
    /// is the serialised proof handed to the success callback.
    pub fn new_manual_session(
        self: &Arc<Self>,
        sigrequest_json: &str,
        handler: Arc<dyn Handler>,
    ) -> Option<SessionHandle> {
        let request: SignatureRequest = match serde_json::from_str(sigrequest_json) {
            Ok(request) => request,
            Err(e) => {
                handler.failure(
                    Action::Unknown,
                    SessionError::wrap(ErrorKind::Serialization, e),
                );
                return None;
            }
        };

        let session = SessionHandle::new(self.clone(), Action::Signing, String::new(), handler);
        session.set_version(MANUAL_PROTOCOL_VERSION);
        session.set_request(SessionRequest::Signature(request));
        spawn_session_task(session.clone(), |s| s.resolve_check_and_ask());
        Some(session)
    }
}

impl SessionHandle {
    fn new(
        client: Arc<Client>,
        action: Action,
        server_url: String,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                action,
                server_url,
                handler,
                client,
                state: Mutex::new(EngineState {
                    machine: SessionState::Created,
                    version: MANUAL_PROTOCOL_VERSION,
                    request: None,
                    server_name: String::new(),
                    serialized_jwt: String::new(),
                    downloaded: IdentifierSet::default(),
                    done: false,
                    transport: None,
                }),
            }),
        }
    }

    /// Dismiss the session from the outer application: drives a transition
    /// to `Cancelled` from any non-terminal state. Idempotent.
    pub fn dismiss(&self) {
        self.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.lock().machine
    }

    pub fn version(&self) -> ProtocolVersion {
        self.lock().version
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.inner.state.lock().expect("session lock poisoned")
    }

    fn set_version(&self, version: ProtocolVersion) {
        self.lock().version = version;
    }

    fn set_request(&self, request: SessionRequest) {
        self.lock().request = Some(request);
    }

    fn is_interactive(&self) -> bool {
        !self.inner.server_url.is_empty()
    }

    /// Move the machine forward. Backward or post-terminal moves are
    /// swallowed; a successful move is reported through the handler.
    fn transition(&self, new: SessionState) -> bool {
        {
            let mut state = self.lock();
            if state.machine.is_terminal() {
                return false;
            }
            if !new.is_terminal() && new.rank() <= state.machine.rank() {
                return false;
            }
            state.machine = new;
        }
        self.inner.handler.status_update(self.inner.action, new);
        true
    }

    /// Idempotent teardown: issues the remote DELETE at most once per
    /// session, only when interactive. Returns whether this call did it.
    fn delete(&self) -> bool {
        let transport = {
            let mut state = self.lock();
            if state.done {
                return false;
            }
            state.done = true;
            state.transport.clone()
        };
        if let Some(transport) = transport {
            transport.delete();
        }
        true
    }

    fn announce_downloaded(&self) {
        let downloaded = self.lock().downloaded.clone();
        if !downloaded.is_empty() {
            self.inner.client.handler.update_configuration(&downloaded);
        }
    }

    fn fail(&self, error: SessionError) {
        if self.delete() {
            self.announce_downloaded();
            self.transition(SessionState::Failed);
            self.inner.handler.failure(self.inner.action, error);
        }
    }

    fn cancel(&self) {
        if self.delete() {
            self.announce_downloaded();
            self.transition(SessionState::Cancelled);
            self.inner.handler.cancelled(self.inner.action);
        }
    }

    /// Terminal abort without a failure callback; the dedicated handler
    /// callback has already explained the situation.
    fn abort(&self) {
        if self.delete() {
            self.announce_downloaded();
            self.transition(SessionState::Failed);
        }
    }

    fn unsatisfiable(&self, missing: Vec<AttributeDisjunction>) {
        let server_name = self.lock().server_name.clone();
        if self.delete() {
            self.announce_downloaded();
            self.transition(SessionState::Unsatisfiable);
            self.inner
                .handler
                .unsatisfiable_request(self.inner.action, server_name, missing);
        }
    }

    // -----------------------------------------------------------------------
    // Interactive start: fetch and parse the requestor's first message
    // -----------------------------------------------------------------------

    fn start(&self) {
        self.transition(SessionState::Fetching);

        let transport = self
            .inner
            .client
            .transports
            .requestor(&self.inner.server_url);
        self.lock().transport = Some(transport.clone());

        let info = match transport.get_session_info() {
            Ok(info) => info,
            Err(e) => return self.fail(e),
        };
        let jwt = match parse_requestor_jwt(self.inner.action, &info.jwt) {
            Ok(jwt) => jwt,
            Err(e) => return self.fail(e),
        };

        let mut request = jwt.session_request();
        request.set_context(info.context.clone());
        request.set_nonce(info.nonce.clone());
        if let SessionRequest::Issuance(ir) = &mut request {
            // The server told us which key it will sign each credential with.
            for credreq in &mut ir.credentials {
                credreq.key_counter = info
                    .keys
                    .get(&credreq.credential_type.issuer())
                    .copied()
                    .unwrap_or(0);
            }
        }

        {
            let mut state = self.lock();
            state.request = Some(request);
            state.server_name = jwt.requestor().to_string();
            state.serialized_jwt = info.jwt.clone();
        }

        self.resolve_check_and_ask();
    }

    // -----------------------------------------------------------------------
    // Shared middle: resolve descriptors, check candidates, ask the user
    // -----------------------------------------------------------------------

    fn resolve_check_and_ask(&self) {
        self.transition(SessionState::Resolving);
        if !self.check_and_update_configuration() {
            return;
        }

        if self.inner.action == Action::Issuing {
            if let Err(e) = self.build_credential_previews() {
                return self.fail(e);
            }
        }

        self.transition(SessionState::Checking);
        let request = self.lock().request.clone().expect("request set before checking");
        let (candidates, missing) = self
            .inner
            .client
            .check_satisfiability(request.to_disclose());
        if !missing.is_empty() {
            return self.unsatisfiable(missing);
        }
        {
            let mut state = self.lock();
            if let Some(request) = state.request.as_mut() {
                request.set_candidates(candidates);
            }
        }

        self.transition(SessionState::AwaitingUser);
        let (request, server_name) = {
            let state = self.lock();
            (
                state.request.clone().expect("request set before dialog"),
                state.server_name.clone(),
            )
        };
        let callback = PermissionCallback {
            session: self.clone(),
        };
        match request {
            SessionRequest::Disclosure(r) => self
                .inner
                .handler
                .request_verification_permission(r, server_name, callback),
            SessionRequest::Signature(r) => self
                .inner
                .handler
                .request_signature_permission(r, server_name, callback),
            SessionRequest::Issuance(r) => self
                .inner
                .handler
                .request_issuance_permission(r, server_name, callback),
        }
    }

    /// Issuance only: the attribute map of every credential request must
    /// match its declared credential type exactly; the resulting previews
    /// feed the consent dialog.
    fn build_credential_previews(&self) -> Result<(), SessionError> {
        let request = self.lock().request.clone().expect("request set");
        let SessionRequest::Issuance(ir) = request else {
            return Ok(());
        };
        let mut infos = Vec::with_capacity(ir.credentials.len());
        {
            let conf = self
                .inner
                .client
                .configuration
                .read()
                .expect("configuration lock poisoned");
            for credreq in &ir.credentials {
                infos.push(credreq.info(&conf)?);
            }
        }
        let mut state = self.lock();
        if let Some(SessionRequest::Issuance(ir)) = state.request.as_mut() {
            ir.credential_info_list = infos;
        }
        Ok(())
    }

    /// Resolve every referenced scheme manager (present, `Valid`, enrolled
    /// where distributed) and download any missing descriptors. Partial
    /// downloads are remembered so terminal paths can announce them.
    fn check_and_update_configuration(&self) -> bool {
        let ids = {
            let state = self.lock();
            let request = state.request.as_ref().expect("request set before resolving");
            request.identifiers().clone()
        };

        enum Halt {
            Fail(SessionError),
            MissingEnrollment(SchemeManagerIdentifier),
        }
        let mut halt = None;
        {
            let conf = self
                .inner
                .client
                .configuration
                .read()
                .expect("configuration lock poisoned");
            for id in &ids.scheme_managers {
                match conf.scheme_manager(id) {
                    None => {
                        halt = Some(Halt::Fail(SessionError::with_info(
                            ErrorKind::UnknownSchemeManager,
                            id.as_str(),
                        )));
                        break;
                    }
                    Some(manager) if !manager.valid => {
                        halt = Some(Halt::Fail(SessionError::with_info(
                            ErrorKind::InvalidSchemeManager,
                            manager.status.to_string(),
                        )));
                        break;
                    }
                    Some(manager)
                        if manager.distributed
                            && self.inner.client.keyshare_enrollment(id).is_none() =>
                    {
                        halt = Some(Halt::MissingEnrollment(id.clone()));
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
        match halt {
            Some(Halt::Fail(e)) => {
                self.fail(e);
                return false;
            }
            Some(Halt::MissingEnrollment(id)) => {
                self.inner.handler.keyshare_enrollment_missing(id);
                self.abort();
                return false;
            }
            None => {}
        }

        let (downloaded, result) = {
            let mut conf = self
                .inner
                .client
                .configuration
                .write()
                .expect("configuration lock poisoned");
            conf.download(self.inner.client.fetcher.as_ref(), &ids)
        };
        self.lock().downloaded.merge(&downloaded);
        match result {
            Ok(()) => true,
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // After consent
    // -----------------------------------------------------------------------

    fn continue_session(&self, choice: DisclosureChoice) {
        {
            let mut state = self.lock();
            if let Some(request) = state.request.as_mut() {
                request.set_choice(choice.clone());
            }
        }
        let request = self.lock().request.clone().expect("request set");
        let ids = request.identifiers().clone();
        let distributed = {
            let conf = self
                .inner
                .client
                .configuration
                .read()
                .expect("configuration lock poisoned");
            conf.contains_distributed(&ids)
        };

        if !distributed {
            self.transition(SessionState::BuildingProof);
            let message = self.build_message(&choice, &request);
            match message {
                Ok(message) => self.send_response(message),
                Err(e) => self.fail(e),
            }
            return;
        }

        self.transition(SessionState::Keyshare);
        let builders = match &request {
            SessionRequest::Issuance(ir) => self.inner.client.issuance_proof_builders(ir),
            _ => self.inner.client.proof_builders(&choice),
        };
        let builders = match builders {
            Ok(builders) => builders,
            Err(e) => return self.fail(e),
        };

        let mut participants = Vec::new();
        {
            let conf = self
                .inner
                .client
                .configuration
                .read()
                .expect("configuration lock poisoned");
            for id in &ids.scheme_managers {
                let Some(manager) = conf.scheme_manager(id) else { continue };
                if !manager.distributed {
                    continue;
                }
                // enrollment presence was checked during Resolving
                let Some(enrollment) = self.inner.client.keyshare_enrollment(id) else {
                    continue;
                };
                let url = manager.keyshare_server.clone().unwrap_or_default();
                participants.push(KeyshareParticipant {
                    id: id.clone(),
                    enrollment,
                    transport: self.inner.client.transports.keyshare(&url),
                });
            }
        }

        run_keyshare_session(
            self,
            self.inner.handler.as_ref(),
            builders,
            request.context(),
            request.effective_nonce(),
            participants,
        );
    }

    fn build_message(
        &self,
        choice: &DisclosureChoice,
        request: &SessionRequest,
    ) -> Result<ProofMessage, SessionError> {
        match request {
            SessionRequest::Disclosure(_) | SessionRequest::Signature(_) => {
                let proofs = self.inner.client.proofs(
                    choice,
                    &request.context(),
                    &request.effective_nonce(),
                )?;
                Ok(ProofMessage::Proofs(proofs))
            }
            SessionRequest::Issuance(ir) => Ok(ProofMessage::Commitments(
                self.inner.client.issue_commitments(ir)?,
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Response exchange and completion
    // -----------------------------------------------------------------------

    fn send_response(&self, message: ProofMessage) {
        // a dismissed session stays dismissed, even if consent resolved late
        if self.lock().done {
            return;
        }
        let mut result = String::new();
        let mut signatures_received: Vec<CLSignature> = Vec::new();

        if self.is_interactive() {
            self.transition(SessionState::Sending);
            let transport = self
                .lock()
                .transport
                .clone()
                .expect("interactive session has a transport");

            match &message {
                ProofMessage::Proofs(proofs) => {
                    let response = match transport.post_proofs(proofs) {
                        Ok(response) => response,
                        Err(e) => return self.fail(e),
                    };
                    if response != DISCLOSURE_RESPONSE_VALID {
                        return self.fail(SessionError::with_info(ErrorKind::Rejected, response));
                    }
                }
                ProofMessage::Commitments(commitments) => {
                    let signatures = match transport.post_commitments(commitments) {
                        Ok(signatures) => signatures,
                        Err(e) => return self.fail(e),
                    };
                    let request = self.lock().request.clone().expect("request set");
                    let SessionRequest::Issuance(ir) = &request else {
                        return self.fail(SessionError::with_info(
                            ErrorKind::Crypto,
                            "commitments without issuance request",
                        ));
                    };
                    signatures_received =
                        match self.inner.client.construct_credentials(&signatures, ir) {
                            Ok(received) => received,
                            Err(e) => return self.fail(e),
                        };
                }
            }

            // Journal trouble never changes the session outcome.
            match self.create_log_entry(&message, signatures_received) {
                Ok(entry) => {
                    if let Err(e) = self.inner.client.add_log_entry(entry) {
                        warn!(error = %e, "could not append session log entry");
                    }
                }
                Err(e) => warn!(error = %e, "could not create session log entry"),
            }
        } else {
            result = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => return self.fail(SessionError::wrap(ErrorKind::Serialization, e)),
            };
        }

        self.announce_downloaded();
        if self.inner.action == Action::Issuing {
            self.inner.client.handler.update_attributes();
        }
        self.lock().done = true;
        if self.transition(SessionState::Done) {
            self.inner.handler.success(self.inner.action, result);
        }
    }

    fn create_log_entry(
        &self,
        message: &ProofMessage,
        signatures_received: Vec<CLSignature>,
    ) -> Result<LogEntry, SessionError> {
        let (serialized_jwt, choice) = {
            let state = self.lock();
            (
                state.serialized_jwt.clone(),
                state
                    .request
                    .as_ref()
                    .and_then(|request| request.choice().cloned()),
            )
        };
        let disclosed = choice
            .map(|choice| self.inner.client.disclosed_attributes(&choice))
            .unwrap_or_default();
        Ok(LogEntry {
            time: Utc::now().timestamp(),
            action: self.inner.action,
            serialized_jwt,
            disclosed,
            raw_response: serde_json::to_value(message)?,
            signatures_received,
        })
    }

    // -----------------------------------------------------------------------
    // Scheme manager installation sessions
    // -----------------------------------------------------------------------

    /// A QR with the scheme manager action short-circuits the main machine:
    /// download the descriptor, ask, install, announce.
    fn manager_session(&self) {
        let manager = match Configuration::download_scheme_manager(
            self.inner.client.fetcher.as_ref(),
            &self.inner.server_url,
        ) {
            Ok(manager) => manager,
            Err(e) => return self.fail(e),
        };

        self.transition(SessionState::AwaitingUser);
        let callback = InstallCallback {
            session: self.clone(),
            manager: manager.clone(),
        };
        self.inner
            .handler
            .request_scheme_manager_permission(manager, callback);
    }

    fn install_manager(&self, manager: SchemeManager) {
        if self.lock().done {
            return;
        }
        let id = manager.id.clone();
        {
            let mut conf = self
                .inner
                .client
                .configuration
                .write()
                .expect("configuration lock poisoned");
            conf.install_scheme_manager(manager);
        }
        self.inner
            .client
            .handler
            .update_configuration(&IdentifierSet::singleton_manager(id));
        self.lock().done = true;
        if self.transition(SessionState::Done) {
            self.inner.handler.success(self.inner.action, String::new());
        }
    }
}

// ---------------------------------------------------------------------------
// Keyshare session outcomes feed back into the engine
// ---------------------------------------------------------------------------

impl KeyshareSessionHandler for SessionHandle {
    fn keyshare_done(&self, proofs: Vec<Proof>) {
        let message = if self.inner.action == Action::Issuing {
            match self.inner.client.issuance_nonce2() {
                Some(nonce2) => ProofMessage::Commitments(IssueCommitmentMessage {
                    combined_proofs: proofs,
                    nonce2,
                }),
                None => {
                    return self.fail(SessionError::with_info(
                        ErrorKind::Crypto,
                        "no issuance in progress",
                    ))
                }
            }
        } else {
            ProofMessage::Proofs(proofs)
        };
        self.send_response(message);
    }

    fn keyshare_cancelled(&self) {
        self.cancel();
    }

    fn keyshare_blocked(&self, manager: &SchemeManagerIdentifier, duration: u32) {
        self.inner
            .handler
            .keyshare_blocked(manager.clone(), duration);
    }

    fn keyshare_error(&self, error: SessionError) {
        self.fail(error.rekind(ErrorKind::Keyshare));
    }
}
