//! Wire format of the requestor's first message.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::identifiers::IssuerIdentifier;

/// Response body of `POST proofs` signalling acceptance.
pub const DISCLOSURE_RESPONSE_VALID: &str = "VALID";

/// The requestor's first message: the session JWT plus the nonce, context,
/// and (for issuance) which public key counter each issuer will sign with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub jwt: String,
    pub nonce: BigUint,
    pub context: BigUint,
    pub keys: BTreeMap<IssuerIdentifier, u32>,
}

#[derive(Serialize, Deserialize)]
struct KeyIdentifier {
    identifier: IssuerIdentifier,
}

/// Accepts the number, decimal-string, and native encodings of a big
/// integer; emitted as a decimal string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBigNum {
    Int(u64),
    Str(String),
    Native(BigUint),
}

impl RawBigNum {
    fn into_big(self) -> Result<BigUint, String> {
        match self {
            RawBigNum::Int(v) => Ok(BigUint::from(v)),
            RawBigNum::Str(s) => s
                .parse()
                .map_err(|_| format!("not a decimal integer: {}", s)),
            RawBigNum::Native(v) => Ok(v),
        }
    }
}

#[derive(Deserialize)]
struct RawSessionInfo {
    #[serde(default)]
    jwt: String,
    nonce: RawBigNum,
    context: RawBigNum,
    /// Legacy array-of-pairs shape: `[[{"identifier": issuer}, counter], ...]`.
    #[serde(default)]
    keys: Vec<(KeyIdentifier, u32)>,
}

impl<'de> Deserialize<'de> for SessionInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawSessionInfo::deserialize(deserializer)?;
        let mut keys = BTreeMap::new();
        for (id, counter) in raw.keys {
            keys.insert(id.identifier, counter);
        }
        Ok(SessionInfo {
            jwt: raw.jwt,
            nonce: raw.nonce.into_big().map_err(serde::de::Error::custom)?,
            context: raw.context.into_big().map_err(serde::de::Error::custom)?,
            keys,
        })
    }
}

impl Serialize for SessionInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let keys: Vec<(KeyIdentifier, u32)> = self
            .keys
            .iter()
            .map(|(id, counter)| {
                (
                    KeyIdentifier {
                        identifier: id.clone(),
                    },
                    *counter,
                )
            })
            .collect();
        let mut st = serializer.serialize_struct("SessionInfo", 4)?;
        st.serialize_field("jwt", &self.jwt)?;
        st.serialize_field("nonce", &self.nonce.to_string())?;
        st.serialize_field("context", &self.context.to_string())?;
        st.serialize_field("keys", &keys)?;
        st.end()
    }
}
