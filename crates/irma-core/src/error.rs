use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a session failure. Every error surfaced to a handler
/// carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownSchemeManager,
    InvalidSchemeManager,
    UnknownAction,
    ProtocolVersionNotSupported,
    InvalidJwt,
    UnknownCredentialType,
    ConfigurationDownload,
    Crypto,
    Rejected,
    Serialization,
    Keyshare,
    Panic,
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnknownSchemeManager => "unknown scheme manager",
            ErrorKind::InvalidSchemeManager => "invalid scheme manager",
            ErrorKind::UnknownAction => "unknown action",
            ErrorKind::ProtocolVersionNotSupported => "protocol version not supported",
            ErrorKind::InvalidJwt => "invalid jwt",
            ErrorKind::UnknownCredentialType => "unknown credential type",
            ErrorKind::ConfigurationDownload => "configuration download failed",
            ErrorKind::Crypto => "cryptographic operation failed",
            ErrorKind::Rejected => "rejected by server",
            ErrorKind::Serialization => "serialization failed",
            ErrorKind::Keyshare => "keyshare protocol failed",
            ErrorKind::Panic => "panic in session task",
            ErrorKind::Transport => "transport failure",
        };
        write!(f, "{}", s)
    }
}

/// A session failure: kind plus a free-form `info` (identifier, server
/// response, panic payload) and the stringified underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub info: String,
    pub cause: Option<String>,
}

impl SessionError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            info: String::new(),
            cause: None,
        }
    }

    pub fn with_info(kind: ErrorKind, info: impl Into<String>) -> Self {
        Self {
            kind,
            info: info.into(),
            cause: None,
        }
    }

    pub fn wrap(kind: ErrorKind, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            info: String::new(),
            cause: Some(cause.to_string()),
        }
    }

    /// Re-kind an existing error, keeping its info and cause. Used by the
    /// keyshare layer, which wraps any underlying failure as `Keyshare`.
    pub fn rekind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.info.is_empty() {
            write!(f, " ({})", self.info)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionError {}

impl From<irma_idemix::IdemixError> for SessionError {
    fn from(err: irma_idemix::IdemixError) -> Self {
        SessionError::wrap(ErrorKind::Crypto, err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::wrap(ErrorKind::Serialization, err)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_kind_only() {
        let err = SessionError::new(ErrorKind::Rejected);
        assert_eq!(err.to_string(), "rejected by server");
    }

    #[test]
    fn test_display_with_info_and_cause() {
        let mut err = SessionError::with_info(ErrorKind::UnknownSchemeManager, "irma-demo");
        err.cause = Some("no such directory".into());
        assert_eq!(
            err.to_string(),
            "unknown scheme manager (irma-demo): no such directory"
        );
    }

    #[test]
    fn test_rekind_keeps_detail() {
        let err = SessionError::with_info(ErrorKind::Transport, "timeout").rekind(ErrorKind::Keyshare);
        assert_eq!(err.kind, ErrorKind::Keyshare);
        assert_eq!(err.info, "timeout");
    }

    #[test]
    fn test_from_idemix_error() {
        let err: SessionError = irma_idemix::IdemixError::InvalidSignature.into();
        assert_eq!(err.kind, ErrorKind::Crypto);
        assert!(err.cause.unwrap().contains("signature"));
    }

    #[test]
    fn test_all_kinds_display() {
        let kinds = [
            ErrorKind::UnknownSchemeManager,
            ErrorKind::InvalidSchemeManager,
            ErrorKind::UnknownAction,
            ErrorKind::ProtocolVersionNotSupported,
            ErrorKind::InvalidJwt,
            ErrorKind::UnknownCredentialType,
            ErrorKind::ConfigurationDownload,
            ErrorKind::Crypto,
            ErrorKind::Rejected,
            ErrorKind::Serialization,
            ErrorKind::Keyshare,
            ErrorKind::Panic,
            ErrorKind::Transport,
        ];
        for k in kinds {
            assert!(!k.to_string().is_empty());
        }
    }
}
