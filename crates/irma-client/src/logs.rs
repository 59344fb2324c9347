//! Append-only session journal. Entries carry the requestor JWT as opaque
//! bytes and the outgoing proof in raw form; both are decoded lazily on
//! read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use irma_core::{
    parse_requestor_jwt, Action, AttributeTypeIdentifier, RequestorJwt, SessionResult,
};
use irma_idemix::CLSignature;

use crate::session::ProofMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix timestamp of session completion.
    pub time: i64,
    pub action: Action,
    /// The requestor JWT exactly as received; re-parsable on demand.
    pub serialized_jwt: String,
    /// Disclosed attribute values, by attribute type.
    #[serde(default)]
    pub disclosed: BTreeMap<AttributeTypeIdentifier, String>,
    /// The outgoing proof message, raw.
    pub raw_response: serde_json::Value,
    /// CL signatures received (issuance sessions only).
    #[serde(default)]
    pub signatures_received: Vec<CLSignature>,
}

impl LogEntry {
    /// Re-parse the stored JWT into its typed shape.
    pub fn jwt(&self) -> SessionResult<RequestorJwt> {
        parse_requestor_jwt(self.action, &self.serialized_jwt)
    }

    /// Decode the raw proof back to the typed message that was sent.
    pub fn response(&self) -> SessionResult<ProofMessage> {
        Ok(serde_json::from_value(self.raw_response.clone())?)
    }
}
