//! Camenisch-Lysyanskaya credential primitives.
//!
//! This crate is the cryptographic substrate of the wallet: CL public keys
//! and signatures, disclosure proof builders, issuance commitment builders,
//! Fiat-Shamir challenge derivation, and the Paillier keypair used by the
//! keyshare protocol. Everything is plain `num-bigint` modular arithmetic;
//! the session layer above treats this crate as a black box.

pub mod builder;
pub mod error;
pub mod issuer;
pub mod key;
pub mod paillier;
pub mod params;
pub mod proof;
pub mod signature;

pub use builder::*;
pub use error::*;
pub use issuer::*;
pub use key::*;
pub use paillier::*;
pub use params::*;
pub use proof::*;
pub use signature::*;
