//! Transport seams: how the engine reaches requestor servers, keyshare
//! servers, and scheme manager descriptor hosts. Sessions only ever see
//! the traits; production wires in the blocking HTTP implementations.

use std::sync::Arc;

use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use irma_core::{
    CredentialType, CredentialTypeIdentifier, DescriptorFetcher, ErrorKind, Issuer,
    IssuerIdentifier, SchemeManager, SessionError, SessionInfo, SessionResult,
};
use irma_idemix::{IssueCommitmentMessage, IssueSignatureMessage, Proof, PublicKey};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Per-session channel to the requestor server.
pub trait RequestorTransport: Send + Sync {
    fn get_session_info(&self) -> SessionResult<SessionInfo>;
    fn post_proofs(&self, proofs: &[Proof]) -> SessionResult<String>;
    fn post_commitments(
        &self,
        message: &IssueCommitmentMessage,
    ) -> SessionResult<Vec<IssueSignatureMessage>>;
    /// Best-effort teardown; failures are deliberately dropped.
    fn delete(&self);
}

/// Outcome of a PIN verification round at a keyshare server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PinStatus {
    Success,
    Failure { remaining_attempts: u32 },
    Blocked { duration: u32 },
}

/// Channel to one keyshare server, strictly serialised per manager.
pub trait KeyshareTransport: Send + Sync {
    fn verify_pin(&self, username: &str, pin: &str) -> SessionResult<PinStatus>;
    /// One commitment per proof builder, in builder order. `keys` names the
    /// issuer public key each builder proves under.
    fn get_commitments(&self, keys: &[(String, u32)]) -> SessionResult<Vec<BigUint>>;
    /// The server's response share, encrypted under the user's Paillier key.
    fn get_response(&self, challenge: &BigUint) -> SessionResult<BigUint>;
}

/// Creates per-session transports. Injected so tests can run sessions
/// against scripted servers.
pub trait TransportFactory: Send + Sync {
    fn requestor(&self, url: &str) -> Arc<dyn RequestorTransport>;
    fn keyshare(&self, url: &str) -> Arc<dyn KeyshareTransport>;
}

// ---------------------------------------------------------------------------
// HTTP implementations
// ---------------------------------------------------------------------------

fn transport_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::wrap(ErrorKind::Transport, err)
}

struct HttpClient {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpClient {
    fn new(base: &str) -> Self {
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            base,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.client
            .get(self.url(path))
            .send()
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?
            .json()
            .map_err(transport_error)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> SessionResult<T> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?
            .json()
            .map_err(transport_error)
    }
}

/// Requestor endpoints relative to the session URL from the QR.
pub struct HttpRequestorTransport {
    http: HttpClient,
}

impl HttpRequestorTransport {
    pub fn new(session_url: &str) -> Self {
        Self {
            http: HttpClient::new(session_url),
        }
    }
}

impl RequestorTransport for HttpRequestorTransport {
    fn get_session_info(&self) -> SessionResult<SessionInfo> {
        self.http.get("jwt")
    }

    fn post_proofs(&self, proofs: &[Proof]) -> SessionResult<String> {
        self.http.post("proofs", &proofs)
    }

    fn post_commitments(
        &self,
        message: &IssueCommitmentMessage,
    ) -> SessionResult<Vec<IssueSignatureMessage>> {
        self.http.post("commitments", message)
    }

    fn delete(&self) {
        let _ = self.http.client.delete(self.http.base.clone()).send();
    }
}

#[derive(Serialize)]
struct VerifyPinBody<'a> {
    id: &'a str,
    pin: &'a str,
}

#[derive(Serialize)]
struct KeyBody<'a> {
    keys: &'a [(String, u32)],
}

/// Keyshare server endpoints. Big integers travel as decimal strings.
pub struct HttpKeyshareTransport {
    http: HttpClient,
}

impl HttpKeyshareTransport {
    pub fn new(server_url: &str) -> Self {
        Self {
            http: HttpClient::new(server_url),
        }
    }
}

impl KeyshareTransport for HttpKeyshareTransport {
    fn verify_pin(&self, username: &str, pin: &str) -> SessionResult<PinStatus> {
        self.http.post(
            "users/verify/pin",
            &VerifyPinBody {
                id: username,
                pin,
            },
        )
    }

    fn get_commitments(&self, keys: &[(String, u32)]) -> SessionResult<Vec<BigUint>> {
        let raw: Vec<String> = self.http.post("prove/getCommitments", &KeyBody { keys })?;
        raw.iter()
            .map(|s| {
                s.parse().map_err(|_| {
                    SessionError::with_info(ErrorKind::Transport, "malformed commitment")
                })
            })
            .collect()
    }

    fn get_response(&self, challenge: &BigUint) -> SessionResult<BigUint> {
        let raw: String = self
            .http
            .post("prove/getResponse", &challenge.to_string())?;
        raw.parse()
            .map_err(|_| SessionError::with_info(ErrorKind::Transport, "malformed response"))
    }
}

pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn requestor(&self, url: &str) -> Arc<dyn RequestorTransport> {
        Arc::new(HttpRequestorTransport::new(url))
    }

    fn keyshare(&self, url: &str) -> Arc<dyn KeyshareTransport> {
        Arc::new(HttpKeyshareTransport::new(url))
    }
}

// ---------------------------------------------------------------------------
// Descriptor fetching over HTTP
// ---------------------------------------------------------------------------

/// Fetches descriptors from a scheme manager's URL tree:
/// `<url>/description.json`, `<url>/<issuer>/description.json`,
/// `<url>/<issuer>/Issues/<type>/description.json`,
/// `<url>/<issuer>/PublicKeys/<counter>.json`.
pub struct HttpDescriptorFetcher;

impl HttpDescriptorFetcher {
    fn get<T: DeserializeOwned>(url: &str) -> SessionResult<T> {
        reqwest::blocking::get(url)
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?
            .json()
            .map_err(transport_error)
    }
}

impl DescriptorFetcher for HttpDescriptorFetcher {
    fn scheme_manager(&self, url: &str) -> SessionResult<SchemeManager> {
        let mut manager: SchemeManager = Self::get(&format!("{}/description.json", url))?;
        if manager.url.is_empty() {
            manager.url = url.to_string();
        }
        Ok(manager)
    }

    fn issuer(&self, manager: &SchemeManager, id: &IssuerIdentifier) -> SessionResult<Issuer> {
        Self::get(&format!(
            "{}/{}/description.json",
            manager.url,
            id.name()
        ))
    }

    fn credential_type(
        &self,
        manager: &SchemeManager,
        id: &CredentialTypeIdentifier,
    ) -> SessionResult<CredentialType> {
        Self::get(&format!(
            "{}/{}/Issues/{}/description.json",
            manager.url,
            id.issuer().name(),
            id.name()
        ))
    }

    fn public_key(
        &self,
        manager: &SchemeManager,
        issuer: &IssuerIdentifier,
        counter: u32,
    ) -> SessionResult<PublicKey> {
        let mut key: PublicKey = Self::get(&format!(
            "{}/{}/PublicKeys/{}.json",
            manager.url,
            issuer.name(),
            counter
        ))?;
        key.counter = counter;
        key.issuer = issuer.as_str().to_string();
        Ok(key)
    }
}
