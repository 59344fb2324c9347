//! CL issuer public keys.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::params::{system_parameters, SystemParameters};

/// An issuer's CL public key: modulus `n` and the bases `z`, `s`, `r[i]`.
///
/// Base `r[i]` commits attribute `i` of a credential signed under this key;
/// the key therefore fixes the maximum attribute count of its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub n: BigUint,
    pub z: BigUint,
    pub s: BigUint,
    pub r: Vec<BigUint>,
    /// Key rollover counter; credentials record which counter signed them.
    pub counter: u32,
    /// Dotted issuer identifier this key belongs to; keyshare servers are
    /// told `(issuer, counter)` pairs to select their key material.
    #[serde(default)]
    pub issuer: String,
}

impl PublicKey {
    /// The parameter family matching this key's modulus size.
    pub fn params(&self) -> &'static SystemParameters {
        system_parameters(self.n.bits())
    }

    /// Base for attribute position `i`, if the key covers it.
    pub fn base(&self, i: usize) -> Option<&BigUint> {
        self.r.get(i)
    }

    /// Maximum number of attributes a credential under this key can carry.
    pub fn max_attributes(&self) -> usize {
        self.r.len()
    }
}
