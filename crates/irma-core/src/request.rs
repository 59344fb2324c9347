//! Session requests (disclosure, signature, issuance), the QR entry point,
//! and requestor JWT parsing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::attributes::{
    AttributeDisjunction, AttributeList, AttributeRef, CredentialInfo, DisclosureChoice,
    MetadataAttribute, DEFAULT_VALIDITY_DAYS,
};
use crate::configuration::Configuration;
use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::identifiers::{CredentialTypeIdentifier, IdentifierSet};

// ---------------------------------------------------------------------------
// Action and QR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Disclosing,
    Signing,
    Issuing,
    SchemeManager,
    Unknown,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Disclosing => "disclosing",
            Action::Signing => "signing",
            Action::Issuing => "issuing",
            Action::SchemeManager => "schememanager",
            Action::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Scanned session entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qr {
    #[serde(rename = "u")]
    pub url: String,
    #[serde(rename = "v")]
    pub protocol_version: String,
    #[serde(rename = "vmax")]
    pub protocol_max_version: String,
    #[serde(rename = "irmaqr")]
    pub action: Action,
}

// ---------------------------------------------------------------------------
// Request base and variants
// ---------------------------------------------------------------------------

/// Fields shared by every request variant. `candidates`, `choice` and the
/// memoised identifier set live only for the duration of a session and are
/// never serialised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBase {
    #[serde(default)]
    pub context: Option<BigUint>,
    #[serde(default)]
    pub nonce: Option<BigUint>,
    #[serde(skip)]
    pub candidates: Vec<Vec<AttributeRef>>,
    #[serde(skip)]
    pub choice: Option<DisclosureChoice>,
    #[serde(skip)]
    pub ids: OnceLock<IdentifierSet>,
}

impl RequestBase {
    fn identifiers(&self, compute: impl FnOnce() -> IdentifierSet) -> &IdentifierSet {
        self.ids.get_or_init(compute)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisclosureRequest {
    #[serde(flatten)]
    pub base: RequestBase,
    pub content: Vec<AttributeDisjunction>,
}

impl DisclosureRequest {
    pub fn identifiers(&self) -> &IdentifierSet {
        self.base
            .identifiers(|| identifiers_of_disjunctions(&self.content))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureRequest {
    #[serde(flatten)]
    pub base: RequestBase,
    pub content: Vec<AttributeDisjunction>,
    pub message: String,
    #[serde(rename = "messageType", default)]
    pub message_type: String,
}

impl SignatureRequest {
    pub fn identifiers(&self) -> &IdentifierSet {
        self.base
            .identifiers(|| identifiers_of_disjunctions(&self.content))
    }

    /// The nonce actually signed over: `SHA256(DER(SEQ[INTEGER 2, nonce,
    /// SHA256(message)]))`, binding the message into the challenge.
    pub fn signature_nonce(&self) -> BigUint {
        let message_hash = BigUint::from_bytes_be(&Sha256::digest(self.message.as_bytes()));
        let nonce = self.base.nonce.clone().unwrap_or_else(BigUint::zero);
        let der = der_integer_sequence(&[&BigUint::from(2u8), &nonce, &message_hash]);
        BigUint::from_bytes_be(&Sha256::digest(&der))
    }
}

/// One credential to be issued: its type, values, validity, and the issuer
/// key that will sign it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// Expiry as a unix timestamp; a default validity applies when absent.
    #[serde(default)]
    pub validity: Option<i64>,
    #[serde(rename = "keyCounter", default)]
    pub key_counter: u32,
    #[serde(rename = "credential")]
    pub credential_type: CredentialTypeIdentifier,
    pub attributes: BTreeMap<String, String>,
}

impl CredentialRequest {
    fn validity_days(&self) -> u16 {
        match self.validity {
            Some(expiry) => {
                let days = (expiry - chrono::Utc::now().timestamp()) / 86_400;
                days.clamp(0, u16::MAX as i64) as u16
            }
            None => DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Attribute integers for this request: metadata first, then the values
    /// in the credential type's declared order. The attribute map must
    /// match the declared attribute types exactly, no more and no fewer.
    pub fn attribute_list(&self, conf: &Configuration) -> SessionResult<AttributeList> {
        let credtype = conf
            .credential_type(&self.credential_type)
            .ok_or_else(|| {
                SessionError::with_info(
                    ErrorKind::UnknownCredentialType,
                    self.credential_type.as_str(),
                )
            })?;

        if credtype.attribute_types.len() != self.attributes.len() {
            return Err(SessionError::with_info(
                ErrorKind::UnknownCredentialType,
                format!(
                    "expected {} attributes, got {}",
                    credtype.attribute_types.len(),
                    self.attributes.len()
                ),
            ));
        }

        let meta = MetadataAttribute::new(
            self.credential_type.clone(),
            self.key_counter as u16,
            self.validity_days(),
        );
        let mut ints = vec![meta.to_int()];
        for name in &credtype.attribute_types {
            let value = self.attributes.get(name).ok_or_else(|| {
                SessionError::with_info(
                    ErrorKind::UnknownCredentialType,
                    format!("missing attribute {}", name),
                )
            })?;
            ints.push(crate::attributes::encode_attribute_value(value));
        }
        Ok(AttributeList::new(ints))
    }

    /// Consent-dialog preview for this request.
    pub fn info(&self, conf: &Configuration) -> SessionResult<CredentialInfo> {
        let list = self.attribute_list(conf)?;
        let meta = list.metadata()?;
        Ok(CredentialInfo {
            credential_type: self.credential_type.clone(),
            signing_date: meta.signing_date(),
            expiry: meta.expiry(),
            key_counter: meta.key_counter,
            attributes: self.attributes.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuanceRequest {
    #[serde(flatten)]
    pub base: RequestBase,
    pub credentials: Vec<CredentialRequest>,
    #[serde(default)]
    pub disclose: Vec<AttributeDisjunction>,
    /// Previews built before the consent dialog; session-local.
    #[serde(skip)]
    pub credential_info_list: Vec<CredentialInfo>,
}

impl IssuanceRequest {
    /// Identifiers of both the credentials to be issued and any embedded
    /// disclosure. Memoised; call only after key counters are filled in
    /// from the session info.
    pub fn identifiers(&self) -> &IdentifierSet {
        self.base.identifiers(|| {
            let mut set = identifiers_of_disjunctions(&self.disclose);
            for credreq in &self.credentials {
                set.add_credential_type(&credreq.credential_type);
                set.add_public_key(&credreq.credential_type.issuer(), credreq.key_counter);
            }
            set
        })
    }
}

fn identifiers_of_disjunctions(disjunctions: &[AttributeDisjunction]) -> IdentifierSet {
    let mut set = IdentifierSet::default();
    for disjunction in disjunctions {
        for attr in &disjunction.attributes {
            set.add_credential_type(&attr.credential_type());
        }
    }
    set
}

// ---------------------------------------------------------------------------
// SessionRequest -- the tagged variant the engine drives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SessionRequest {
    Disclosure(DisclosureRequest),
    Signature(SignatureRequest),
    Issuance(IssuanceRequest),
}

impl SessionRequest {
    pub fn action(&self) -> Action {
        match self {
            SessionRequest::Disclosure(_) => Action::Disclosing,
            SessionRequest::Signature(_) => Action::Signing,
            SessionRequest::Issuance(_) => Action::Issuing,
        }
    }

    fn base(&self) -> &RequestBase {
        match self {
            SessionRequest::Disclosure(r) => &r.base,
            SessionRequest::Signature(r) => &r.base,
            SessionRequest::Issuance(r) => &r.base,
        }
    }

    fn base_mut(&mut self) -> &mut RequestBase {
        match self {
            SessionRequest::Disclosure(r) => &mut r.base,
            SessionRequest::Signature(r) => &mut r.base,
            SessionRequest::Issuance(r) => &mut r.base,
        }
    }

    pub fn context(&self) -> BigUint {
        self.base().context.clone().unwrap_or_else(BigUint::zero)
    }

    pub fn set_context(&mut self, context: BigUint) {
        self.base_mut().context = Some(context);
    }

    pub fn nonce(&self) -> BigUint {
        self.base().nonce.clone().unwrap_or_else(BigUint::zero)
    }

    pub fn set_nonce(&mut self, nonce: BigUint) {
        self.base_mut().nonce = Some(nonce);
    }

    /// The nonce proofs are built over. Signature sessions hash the message
    /// into it; the other variants use the server nonce as-is.
    pub fn effective_nonce(&self) -> BigUint {
        match self {
            SessionRequest::Signature(r) => r.signature_nonce(),
            _ => self.nonce(),
        }
    }

    pub fn to_disclose(&self) -> &[AttributeDisjunction] {
        match self {
            SessionRequest::Disclosure(r) => &r.content,
            SessionRequest::Signature(r) => &r.content,
            SessionRequest::Issuance(r) => &r.disclose,
        }
    }

    pub fn identifiers(&self) -> &IdentifierSet {
        match self {
            SessionRequest::Disclosure(r) => r.identifiers(),
            SessionRequest::Signature(r) => r.identifiers(),
            SessionRequest::Issuance(r) => r.identifiers(),
        }
    }

    pub fn set_candidates(&mut self, candidates: Vec<Vec<AttributeRef>>) {
        self.base_mut().candidates = candidates;
    }

    pub fn candidates(&self) -> &[Vec<AttributeRef>] {
        &self.base().candidates
    }

    pub fn set_choice(&mut self, choice: DisclosureChoice) {
        self.base_mut().choice = Some(choice);
    }

    pub fn choice(&self) -> Option<&DisclosureChoice> {
        self.base().choice.as_ref()
    }
}

// ---------------------------------------------------------------------------
// DER encoding of integer sequences
// ---------------------------------------------------------------------------

fn der_length(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        let mut out = vec![0x80 | bytes.len() as u8];
        out.extend(bytes);
        out
    }
}

fn der_integer(v: &BigUint) -> Vec<u8> {
    let mut content = v.to_bytes_be();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    let mut out = vec![0x02];
    out.extend(der_length(content.len()));
    out.extend(content);
    out
}

fn der_integer_sequence(ints: &[&BigUint]) -> Vec<u8> {
    let content: Vec<u8> = ints.iter().flat_map(|v| der_integer(v)).collect();
    let mut out = vec![0x30];
    out.extend(der_length(content.len()));
    out.extend(content);
    out
}

// ---------------------------------------------------------------------------
// Requestor JWTs
// ---------------------------------------------------------------------------

const SUBJECT_VERIFICATION: &str = "verification_request";
const SUBJECT_SIGNATURE: &str = "signature_request";
const SUBJECT_ISSUE: &str = "issue_request";

/// The requestor's session request as carried in its JWT. Parsing only
/// decodes the payload; signature verification is the server federation's
/// concern, not the wallet's.
#[derive(Debug, Clone)]
pub enum RequestorJwt {
    ServiceProvider {
        server_name: String,
        issued_at: i64,
        request: DisclosureRequest,
    },
    SignatureRequestor {
        server_name: String,
        issued_at: i64,
        request: SignatureRequest,
    },
    IdentityProvider {
        server_name: String,
        issued_at: i64,
        request: IssuanceRequest,
    },
}

#[derive(Serialize, Deserialize)]
struct Wrapped<T> {
    request: T,
}

#[derive(Serialize, Deserialize)]
struct JwtBody<T> {
    sub: String,
    iss: String,
    #[serde(default)]
    iat: i64,
    #[serde(flatten)]
    payload: T,
}

#[derive(Serialize, Deserialize)]
struct SpPayload {
    sprequest: Wrapped<DisclosureRequest>,
}

#[derive(Serialize, Deserialize)]
struct AbsPayload {
    absrequest: Wrapped<SignatureRequest>,
}

#[derive(Serialize, Deserialize)]
struct IpPayload {
    iprequest: Wrapped<IssuanceRequest>,
}

impl RequestorJwt {
    pub fn requestor(&self) -> &str {
        match self {
            RequestorJwt::ServiceProvider { server_name, .. } => server_name,
            RequestorJwt::SignatureRequestor { server_name, .. } => server_name,
            RequestorJwt::IdentityProvider { server_name, .. } => server_name,
        }
    }

    pub fn session_request(&self) -> SessionRequest {
        match self {
            RequestorJwt::ServiceProvider { request, .. } => {
                SessionRequest::Disclosure(request.clone())
            }
            RequestorJwt::SignatureRequestor { request, .. } => {
                SessionRequest::Signature(request.clone())
            }
            RequestorJwt::IdentityProvider { request, .. } => {
                SessionRequest::Issuance(request.clone())
            }
        }
    }

    /// Compact serialisation (`header.payload.`) with an unsigned header.
    pub fn to_compact(&self) -> SessionResult<String> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = match self {
            RequestorJwt::ServiceProvider {
                server_name,
                issued_at,
                request,
            } => serde_json::to_vec(&JwtBody {
                sub: SUBJECT_VERIFICATION.into(),
                iss: server_name.clone(),
                iat: *issued_at,
                payload: SpPayload {
                    sprequest: Wrapped {
                        request: request.clone(),
                    },
                },
            })?,
            RequestorJwt::SignatureRequestor {
                server_name,
                issued_at,
                request,
            } => serde_json::to_vec(&JwtBody {
                sub: SUBJECT_SIGNATURE.into(),
                iss: server_name.clone(),
                iat: *issued_at,
                payload: AbsPayload {
                    absrequest: Wrapped {
                        request: request.clone(),
                    },
                },
            })?,
            RequestorJwt::IdentityProvider {
                server_name,
                issued_at,
                request,
            } => serde_json::to_vec(&JwtBody {
                sub: SUBJECT_ISSUE.into(),
                iss: server_name.clone(),
                iat: *issued_at,
                payload: IpPayload {
                    iprequest: Wrapped {
                        request: request.clone(),
                    },
                },
            })?,
        };
        Ok(format!("{}.{}.", header, URL_SAFE_NO_PAD.encode(payload)))
    }
}

/// Decode the payload of a requestor JWT, checking that its subject matches
/// the session's action.
pub fn parse_requestor_jwt(action: Action, jwt: &str) -> SessionResult<RequestorJwt> {
    if !matches!(action, Action::Disclosing | Action::Signing | Action::Issuing) {
        return Err(SessionError::with_info(
            ErrorKind::UnknownAction,
            action.to_string(),
        ));
    }
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() < 2 {
        return Err(SessionError::with_info(
            ErrorKind::InvalidJwt,
            "not a compact jwt",
        ));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| SessionError::wrap(ErrorKind::InvalidJwt, e))?;

    match action {
        Action::Disclosing => {
            let body: JwtBody<SpPayload> = serde_json::from_slice(&payload)
                .map_err(|e| SessionError::wrap(ErrorKind::InvalidJwt, e))?;
            expect_subject(&body.sub, SUBJECT_VERIFICATION)?;
            Ok(RequestorJwt::ServiceProvider {
                server_name: body.iss,
                issued_at: body.iat,
                request: body.payload.sprequest.request,
            })
        }
        Action::Signing => {
            let body: JwtBody<AbsPayload> = serde_json::from_slice(&payload)
                .map_err(|e| SessionError::wrap(ErrorKind::InvalidJwt, e))?;
            expect_subject(&body.sub, SUBJECT_SIGNATURE)?;
            Ok(RequestorJwt::SignatureRequestor {
                server_name: body.iss,
                issued_at: body.iat,
                request: body.payload.absrequest.request,
            })
        }
        Action::Issuing => {
            let body: JwtBody<IpPayload> = serde_json::from_slice(&payload)
                .map_err(|e| SessionError::wrap(ErrorKind::InvalidJwt, e))?;
            expect_subject(&body.sub, SUBJECT_ISSUE)?;
            Ok(RequestorJwt::IdentityProvider {
                server_name: body.iss,
                issued_at: body.iat,
                request: body.payload.iprequest.request,
            })
        }
        other => Err(SessionError::with_info(
            ErrorKind::UnknownAction,
            other.to_string(),
        )),
    }
}

fn expect_subject(got: &str, want: &str) -> SessionResult<()> {
    if got == want {
        Ok(())
    } else {
        Err(SessionError::with_info(
            ErrorKind::InvalidJwt,
            format!("subject {} does not match session action", got),
        ))
    }
}
