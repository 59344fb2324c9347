//! Issuer-side signature construction.
//!
//! The wallet never issues; this module exists so that local verification
//! and the test suites have a counterpart that produces verifiable CL
//! signatures. It signs with unit exponent over a fixed modulus with known
//! (Mersenne) prime factors, so completing a signature needs only a modular
//! inverse and no prime generation.

use num_bigint::BigUint;
use num_traits::One;

use crate::builder::IssueSignatureMessage;
use crate::error::{IdemixError, IdemixResult};
use crate::key::PublicKey;
use crate::params::{random_big_int, random_big_int_below};
use crate::proof::SECRET_ATTRIBUTE_INDEX;
use crate::signature::CLSignature;

/// `(2^127 - 1) * (2^521 - 1)`: a 648-bit modulus whose two factors are
/// Mersenne primes, so random residues are invertible with overwhelming
/// probability.
fn test_modulus() -> BigUint {
    let m127 = (BigUint::one() << 127u32) - 1u32;
    let m521 = (BigUint::one() << 521u32) - 1u32;
    m127 * m521
}

pub struct TestIssuer {
    pk: PublicKey,
}

impl TestIssuer {
    pub fn new(attribute_count: usize) -> Self {
        Self::with_counter(attribute_count, 0)
    }

    pub fn with_counter(attribute_count: usize, counter: u32) -> Self {
        let n = test_modulus();
        let z = random_big_int_below(&n);
        let s = random_big_int_below(&n);
        let r = (0..attribute_count)
            .map(|_| random_big_int_below(&n))
            .collect();
        Self {
            pk: PublicKey {
                n,
                z,
                s,
                r,
                counter,
                issuer: String::new(),
            },
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    /// Sign a full attribute vector: `A = Z * (S^v * prod R_i^{m_i})^-1`,
    /// `e = 1`, which satisfies the CL verification equation directly.
    pub fn sign(&self, attributes: &[BigUint]) -> CLSignature {
        self.complete(attributes, &BigUint::one(), None)
            .expect("test modulus has no small factors")
    }

    /// Like `sign`, with a keyshare blinding factor folded in.
    pub fn sign_with_keyshare_p(&self, attributes: &[BigUint], p: &BigUint) -> CLSignature {
        let mut sig = self
            .complete(attributes, &(p % &self.pk.n), None)
            .expect("test modulus has no small factors");
        sig.keyshare_p = Some(p.clone());
        sig
    }

    /// Issuance counterpart: given the user's commitment `U` (which hides
    /// the master secret), produce the partial signature over the remaining
    /// attribute positions. The user's `v'` and the issuer's `v''` add up
    /// on the user side.
    pub fn issue_from_commitment(
        &self,
        u: &BigUint,
        attributes: &[BigUint],
    ) -> IssueSignatureMessage {
        let signature = self
            .complete_skipping_secret(u, attributes)
            .expect("test modulus has no small factors");
        IssueSignatureMessage { signature }
    }

    fn complete(
        &self,
        attributes: &[BigUint],
        extra_factor: &BigUint,
        skip: Option<usize>,
    ) -> IdemixResult<CLSignature> {
        let n = &self.pk.n;
        let v = random_big_int(self.pk.params().l_v);
        let mut denom = self.pk.s.modpow(&v, n) * extra_factor % n;
        for (i, m) in attributes.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            let base = self.pk.base(i).ok_or(IdemixError::AttributeCountMismatch)?;
            denom = denom * base.modpow(m, n) % n;
        }
        let inv = denom.modinv(n).ok_or(IdemixError::NotInvertible)?;
        Ok(CLSignature {
            a: &self.pk.z * inv % n,
            e: BigUint::one(),
            v,
            keyshare_p: None,
        })
    }

    fn complete_skipping_secret(
        &self,
        u: &BigUint,
        attributes: &[BigUint],
    ) -> IdemixResult<CLSignature> {
        self.complete(attributes, &(u % &self.pk.n), Some(SECRET_ATTRIBUTE_INDEX))
    }
}
