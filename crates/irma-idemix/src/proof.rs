//! Zero-knowledge proofs exchanged with requestors, and the shared
//! Fiat-Shamir challenge derivation.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Attribute position holding the user's master secret in every credential.
pub const SECRET_ATTRIBUTE_INDEX: usize = 1;

/// Disclosure proof: knowledge of a CL signature over a vector of which a
/// subset is revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofD {
    pub c: BigUint,
    pub a: BigUint,
    pub e_response: BigUint,
    pub v_response: BigUint,
    /// Responses for hidden attribute positions.
    pub a_responses: BTreeMap<usize, BigUint>,
    /// Plaintext values for disclosed attribute positions.
    pub a_disclosed: BTreeMap<usize, BigUint>,
}

/// Issuance commitment proof: knowledge of the master secret and blinding
/// inside the commitment `U` sent to the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofU {
    pub u: BigUint,
    pub c: BigUint,
    pub v_prime_response: BigUint,
    pub s_response: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proof {
    Disclosure(ProofD),
    IssuanceCommitment(ProofU),
}

pub type ProofList = Vec<Proof>;

impl Proof {
    /// Fold a keyshare server's share into the master-secret response.
    ///
    /// The master secret is additively shared, so the server's response
    /// share simply adds onto the locally computed one.
    pub fn merge_keyshare_response(&mut self, share: &BigUint) {
        match self {
            Proof::Disclosure(p) => {
                if let Some(r) = p.a_responses.get_mut(&SECRET_ATTRIBUTE_INDEX) {
                    *r += share;
                }
            }
            Proof::IssuanceCommitment(p) => {
                p.s_response += share;
            }
        }
    }
}

/// Fiat-Shamir challenge over the fixed ordered commitment list.
///
/// Inputs are absorbed length-prefixed big-endian, so distinct lists never
/// collide by concatenation.
pub fn create_challenge(context: &BigUint, nonce: &BigUint, contributions: &[BigUint]) -> BigUint {
    let mut hasher = Sha256::new();
    absorb(&mut hasher, context);
    for c in contributions {
        absorb(&mut hasher, c);
    }
    absorb(&mut hasher, nonce);
    BigUint::from_bytes_be(&hasher.finalize())
}

fn absorb(hasher: &mut Sha256, value: &BigUint) {
    let bytes = value.to_bytes_be();
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(&bytes);
}
