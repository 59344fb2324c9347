//! Protocol version negotiation against the server's advertised range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ErrorKind, SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SessionError::with_info(ErrorKind::ProtocolVersionNotSupported, s);
        let (major, minor) = s.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Versions this client speaks. Majors descending, and each minor list
/// descending, so iteration yields the highest mutually supported version
/// first. Frozen at initialisation; never mutate.
pub const SUPPORTED_VERSIONS: &[(u8, &[u8])] = &[(2, &[2, 1])];

/// Pinned version for manual (serverless) sessions. Deliberately kept
/// independent of `SUPPORTED_VERSIONS`; whether it should track the table
/// is an open protocol question, so it stays a separate constant.
pub const MANUAL_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 0);

/// Highest supported version inside the server's `[min, max]` range.
pub fn negotiate(min: ProtocolVersion, max: ProtocolVersion) -> SessionResult<ProtocolVersion> {
    negotiate_with(SUPPORTED_VERSIONS, min, max)
}

pub fn negotiate_with(
    table: &[(u8, &[u8])],
    min: ProtocolVersion,
    max: ProtocolVersion,
) -> SessionResult<ProtocolVersion> {
    for (major, minors) in table {
        for minor in *minors {
            let candidate = ProtocolVersion::new(*major, *minor);
            if candidate >= min && candidate <= max {
                return Ok(candidate);
            }
        }
    }
    Err(SessionError::with_info(
        ErrorKind::ProtocolVersionNotSupported,
        format!("no supported version between {} and {}", min, max),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u8, minor: u8) -> ProtocolVersion {
        ProtocolVersion::new(major, minor)
    }

    #[test]
    fn test_parse_and_display() {
        let parsed: ProtocolVersion = "2.1".parse().unwrap();
        assert_eq!(parsed, v(2, 1));
        assert_eq!(parsed.to_string(), "2.1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("2".parse::<ProtocolVersion>().is_err());
        assert!("a.b".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(v(2, 1) < v(2, 2));
        assert!(v(2, 9) < v(3, 0));
    }

    #[test]
    fn test_negotiate_picks_highest_in_range() {
        let table: &[(u8, &[u8])] = &[(2, &[2, 1])];
        assert_eq!(negotiate_with(table, v(2, 1), v(2, 3)).unwrap(), v(2, 2));
    }

    #[test]
    fn test_negotiate_exact_match() {
        let table: &[(u8, &[u8])] = &[(2, &[2, 1])];
        assert_eq!(negotiate_with(table, v(2, 1), v(2, 1)).unwrap(), v(2, 1));
    }

    #[test]
    fn test_negotiate_above_supported_fails() {
        let table: &[(u8, &[u8])] = &[(2, &[2, 1])];
        let err = negotiate_with(table, v(2, 3), v(2, 4)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolVersionNotSupported);
    }

    #[test]
    fn test_negotiate_below_supported_fails() {
        let table: &[(u8, &[u8])] = &[(2, &[2, 1])];
        assert!(negotiate_with(table, v(1, 0), v(2, 0)).is_err());
    }

    #[test]
    fn test_negotiate_across_majors() {
        let table: &[(u8, &[u8])] = &[(3, &[1, 0]), (2, &[2, 1])];
        // server caps at 2.x, so the 3.x entries are skipped
        assert_eq!(negotiate_with(table, v(2, 0), v(2, 9)).unwrap(), v(2, 2));
        // server speaks 3.x, highest wins
        assert_eq!(negotiate_with(table, v(2, 0), v(3, 5)).unwrap(), v(3, 1));
    }

    #[test]
    fn test_default_table_negotiation() {
        assert_eq!(negotiate(v(2, 1), v(2, 2)).unwrap(), v(2, 2));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v(2, 1)).unwrap();
        assert_eq!(json, "\"2.1\"");
        let back: ProtocolVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v(2, 1));
    }
}
