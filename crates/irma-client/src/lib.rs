//! The credential wallet and its session engine.
//!
//! A [`Client`] owns the stored credentials, the master secret, keyshare
//! enrollments and the session log, and drives disclosure, signature and
//! issuance sessions against requestor servers, with optional keyshare
//! server cooperation for distributed scheme managers.

pub mod client;
pub mod config;
pub mod keyshare;
pub mod logs;
pub mod session;
pub mod storage;
pub mod transport;

pub use client::*;
pub use config::*;
pub use keyshare::PinCallback;
pub use logs::*;
pub use session::*;
pub use transport::*;
