//! CL signatures over attribute vectors.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::key::PublicKey;

/// A CL signature `(A, e, v)` over an ordered attribute vector.
///
/// `keyshare_p` carries the keyshare server's blinding contribution for
/// credentials issued under a distributed scheme manager; it participates
/// in verification as an extra factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CLSignature {
    pub a: BigUint,
    pub e: BigUint,
    pub v: BigUint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyshare_p: Option<BigUint>,
}

impl CLSignature {
    /// Check `Z == A^e * S^v * prod(R_i^{m_i}) [* keyshareP] mod n`.
    ///
    /// `attributes[i]` pairs with base `r[i]`; a vector longer than the key
    /// never verifies.
    pub fn verify(&self, pk: &PublicKey, attributes: &[BigUint]) -> bool {
        if attributes.len() > pk.r.len() {
            return false;
        }
        let mut acc = self.a.modpow(&self.e, &pk.n);
        acc = acc * self.s_component(pk) % &pk.n;
        for (m, r) in attributes.iter().zip(pk.r.iter()) {
            acc = acc * r.modpow(m, &pk.n) % &pk.n;
        }
        if let Some(p) = &self.keyshare_p {
            acc = acc * (p % &pk.n) % &pk.n;
        }
        acc == pk.z.clone() % &pk.n
    }

    fn s_component(&self, pk: &PublicKey) -> BigUint {
        pk.s.modpow(&self.v, &pk.n)
    }
}
