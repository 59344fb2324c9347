//! System parameter families for the CL protocol, keyed by modulus size.

use num_bigint::{BigUint, RandBigInt};

/// Bit lengths governing one CL parameter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemParameters {
    /// Modulus size.
    pub l_n: u64,
    /// Attribute (message) size.
    pub l_m: u64,
    /// Signature exponent size.
    pub l_e: u64,
    /// Signature blinding size.
    pub l_v: u64,
    /// Statistical zero-knowledge slack.
    pub l_statzk: u64,
    /// Challenge (hash) size.
    pub l_h: u64,
}

impl SystemParameters {
    /// Randomizer size for an attribute-sized witness.
    pub fn l_m_commit(&self) -> u64 {
        self.l_m + self.l_statzk + self.l_h
    }

    /// Randomizer size for the exponent witness.
    pub fn l_e_commit(&self) -> u64 {
        self.l_e + self.l_statzk + self.l_h
    }

    /// Randomizer size for the blinding witness.
    pub fn l_v_commit(&self) -> u64 {
        self.l_v + self.l_statzk + self.l_h
    }
}

pub const PARAMS_1024: SystemParameters = SystemParameters {
    l_n: 1024,
    l_m: 256,
    l_e: 597,
    l_v: 1700,
    l_statzk: 80,
    l_h: 256,
};

pub const PARAMS_2048: SystemParameters = SystemParameters {
    l_n: 2048,
    l_m: 256,
    l_e: 597,
    l_v: 2724,
    l_statzk: 128,
    l_h: 256,
};

pub const PARAMS_4096: SystemParameters = SystemParameters {
    l_n: 4096,
    l_m: 512,
    l_e: 597,
    l_v: 5772,
    l_statzk: 128,
    l_h: 256,
};

/// The family whose modulus size is the smallest one covering `bits`.
pub fn system_parameters(bits: u64) -> &'static SystemParameters {
    if bits <= 1024 {
        &PARAMS_1024
    } else if bits <= 2048 {
        &PARAMS_2048
    } else {
        &PARAMS_4096
    }
}

/// Uniform random integer of at most `bits` bits from the OS RNG.
pub fn random_big_int(bits: u64) -> BigUint {
    let mut rng = rand::rngs::OsRng;
    rng.gen_biguint(bits)
}

/// Uniform random integer below `bound` from the OS RNG.
pub fn random_big_int_below(bound: &BigUint) -> BigUint {
    let mut rng = rand::rngs::OsRng;
    rng.gen_biguint_below(bound)
}
