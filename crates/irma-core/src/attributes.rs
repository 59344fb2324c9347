//! Attribute values, the bit-packed metadata attribute, attribute lists
//! with their content hash, and the disjunction/choice policy types.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::identifiers::{AttributeTypeIdentifier, CredentialTypeIdentifier};

/// Current metadata attribute layout version.
pub const METADATA_VERSION: u8 = 0x02;

/// Default credential validity when a request does not specify one.
pub const DEFAULT_VALIDITY_DAYS: u16 = 365;

const SECONDS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Attribute value encoding
// ---------------------------------------------------------------------------

/// UTF-8 string to arbitrary-precision integer, big-endian bytes.
pub fn encode_attribute_value(s: &str) -> BigUint {
    BigUint::from_bytes_be(s.as_bytes())
}

/// Inverse of `encode_attribute_value`.
pub fn decode_attribute_value(v: &BigUint) -> String {
    String::from_utf8_lossy(&v.to_bytes_be()).into_owned()
}

// ---------------------------------------------------------------------------
// MetadataAttribute -- credential attribute index 0
// ---------------------------------------------------------------------------

/// The bit-packed first attribute of every credential.
///
/// Byte layout, big-endian: version (1) | signing date in days since epoch
/// (4) | validity in days from signing (2) | key counter (2) | credential
/// type identifier (UTF-8, rest). The version byte is non-zero, so the
/// packed integer never loses its leading byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataAttribute {
    pub version: u8,
    pub signing_date_days: u32,
    pub validity_days: u16,
    pub key_counter: u16,
    pub credential_type: CredentialTypeIdentifier,
}

impl MetadataAttribute {
    /// Fresh metadata signed today.
    pub fn new(
        credential_type: CredentialTypeIdentifier,
        key_counter: u16,
        validity_days: u16,
    ) -> Self {
        Self {
            version: METADATA_VERSION,
            signing_date_days: (Utc::now().timestamp() / SECONDS_PER_DAY) as u32,
            validity_days,
            key_counter,
            credential_type,
        }
    }

    pub fn to_int(&self) -> BigUint {
        let mut bytes = Vec::with_capacity(9 + self.credential_type.as_str().len());
        bytes.push(self.version);
        bytes.extend_from_slice(&self.signing_date_days.to_be_bytes());
        bytes.extend_from_slice(&self.validity_days.to_be_bytes());
        bytes.extend_from_slice(&self.key_counter.to_be_bytes());
        bytes.extend_from_slice(self.credential_type.as_str().as_bytes());
        BigUint::from_bytes_be(&bytes)
    }

    pub fn from_int(v: &BigUint) -> SessionResult<Self> {
        let bytes = v.to_bytes_be();
        if bytes.len() < 9 {
            return Err(SessionError::with_info(
                ErrorKind::Serialization,
                "metadata attribute too short",
            ));
        }
        let credential_type = String::from_utf8(bytes[9..].to_vec()).map_err(|_| {
            SessionError::with_info(ErrorKind::Serialization, "metadata credential type not utf-8")
        })?;
        Ok(Self {
            version: bytes[0],
            signing_date_days: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            validity_days: u16::from_be_bytes([bytes[5], bytes[6]]),
            key_counter: u16::from_be_bytes([bytes[7], bytes[8]]),
            credential_type: CredentialTypeIdentifier::new(credential_type),
        })
    }

    pub fn signing_date(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.signing_date_days as i64 * SECONDS_PER_DAY, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.signing_date() + chrono::Duration::days(self.validity_days as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry() <= now
    }
}

// ---------------------------------------------------------------------------
// AttributeList -- a credential's attributes minus the master secret
// ---------------------------------------------------------------------------

/// Ordered attribute integers of one credential as the user sees them:
/// metadata first, then the values. The master secret is never part of
/// this list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeList {
    pub ints: Vec<BigUint>,
}

impl AttributeList {
    pub fn new(ints: Vec<BigUint>) -> Self {
        Self { ints }
    }

    pub fn metadata(&self) -> SessionResult<MetadataAttribute> {
        let first = self.ints.first().ok_or_else(|| {
            SessionError::with_info(ErrorKind::Serialization, "empty attribute list")
        })?;
        MetadataAttribute::from_int(first)
    }

    /// Content hash identifying this credential instance. Inputs are
    /// absorbed length-prefixed so adjacent values cannot collide.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for v in &self.ints {
            let bytes = v.to_bytes_be();
            hasher.update((bytes.len() as u32).to_be_bytes());
            hasher.update(&bytes);
        }
        hex::encode(hasher.finalize())
    }

    /// Decoded string value at `position` within the declared value order
    /// (0-based, metadata excluded).
    pub fn value(&self, position: usize) -> Option<String> {
        self.ints.get(position + 1).map(decode_attribute_value)
    }
}

// ---------------------------------------------------------------------------
// Disjunctions, references, choices
// ---------------------------------------------------------------------------

/// One policy primitive: satisfied by disclosing any one of `attributes`,
/// optionally constrained to a required literal value per attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDisjunction {
    #[serde(default)]
    pub label: String,
    pub attributes: Vec<AttributeTypeIdentifier>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<AttributeTypeIdentifier, String>,
}

impl AttributeDisjunction {
    pub fn required_value(&self, attr: &AttributeTypeIdentifier) -> Option<&str> {
        self.values.get(attr).map(String::as_str)
    }
}

/// Points at one attribute inside one stored credential instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub attr_type: AttributeTypeIdentifier,
    pub credential_hash: String,
    /// Position in the full credential attribute vector (0 metadata,
    /// 1 master secret, 2.. values), as used during proof construction.
    pub attribute_index: usize,
}

/// The user's consent outcome: one reference per disjunction, in
/// disjunction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureChoice {
    pub attributes: Vec<AttributeRef>,
}

// ---------------------------------------------------------------------------
// CredentialInfo -- consent-dialog preview of a credential
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInfo {
    pub credential_type: CredentialTypeIdentifier,
    pub signing_date: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub key_counter: u16,
    /// Attribute short name to decoded value, in no particular order.
    pub attributes: BTreeMap<String, String>,
}
