//! Paillier keypair used by the keyshare protocol.
//!
//! The session layer treats this as an opaque boxed value: the keyshare
//! server returns its response share encrypted under the user's Paillier
//! public key, and the client decrypts it before blending.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{IdemixError, IdemixResult};
use crate::params::random_big_int_below;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaillierPublicKey {
    pub n: BigUint,
    pub n_squared: BigUint,
    pub g: BigUint,
}

impl PaillierPublicKey {
    /// Encrypt `m < n` as `g^m * r^n mod n^2` with fresh randomness.
    pub fn encrypt(&self, m: &BigUint) -> IdemixResult<BigUint> {
        if m >= &self.n {
            return Err(IdemixError::PaillierRange);
        }
        let r = loop {
            let candidate = random_big_int_below(&self.n);
            if !candidate.is_zero() && candidate.gcd(&self.n).is_one() {
                break candidate;
            }
        };
        Ok(self.g.modpow(m, &self.n_squared) * r.modpow(&self.n, &self.n_squared)
            % &self.n_squared)
    }

    /// Homomorphic blend `c1^x * c2 mod n^2`, i.e. `[[a]]^x * [[b]] = [[a*x + b]]`.
    pub fn blend(&self, c1: &BigUint, x: &BigUint, c2: &BigUint) -> BigUint {
        c1.modpow(x, &self.n_squared) * c2 % &self.n_squared
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaillierPrivateKey {
    pub public_key: PaillierPublicKey,
    pub lambda: BigUint,
    pub mu: BigUint,
}

impl PaillierPrivateKey {
    /// Derive a keypair from two distinct primes.
    pub fn from_primes(p: &BigUint, q: &BigUint) -> IdemixResult<Self> {
        let n = p * q;
        let n_squared = &n * &n;
        let g = &n + BigUint::one();
        let lambda = (p - BigUint::one()).lcm(&(q - BigUint::one()));
        let l_g = l_function(&g.modpow(&lambda, &n_squared), &n);
        let mu = l_g.modinv(&n).ok_or(IdemixError::NotInvertible)?;
        Ok(Self {
            public_key: PaillierPublicKey { n, n_squared, g },
            lambda,
            mu,
        })
    }

    /// Fixed keypair from two Mersenne primes, used to seed the key cache.
    /// TODO: source primes from a real prime generator once enrollment
    /// performs online keygen.
    pub fn bootstrap() -> Self {
        let m89 = (BigUint::one() << 89u32) - 1u32;
        let m107 = (BigUint::one() << 107u32) - 1u32;
        Self::from_primes(&m89, &m107).expect("fixed primes are valid Paillier parameters")
    }

    pub fn encrypt(&self, m: &BigUint) -> IdemixResult<BigUint> {
        self.public_key.encrypt(m)
    }

    pub fn decrypt(&self, c: &BigUint) -> BigUint {
        let n = &self.public_key.n;
        let n_squared = &self.public_key.n_squared;
        let l = l_function(&c.modpow(&self.lambda, n_squared), n);
        l * &self.mu % n
    }
}

fn l_function(x: &BigUint, n: &BigUint) -> BigUint {
    (x - BigUint::one()) / n
}
