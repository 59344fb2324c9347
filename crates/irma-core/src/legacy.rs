//! Read-only compatibility with the legacy Android app's session journal.
//! Parsed for display and migration; never emitted.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::identifiers::CredentialTypeIdentifier;

pub const ANDROID_LOG_VERIFICATION: &str = "verification";
pub const ANDROID_LOG_ISSUE: &str = "issue";
pub const ANDROID_LOG_SIGNATURE: &str = "signature";
pub const ANDROID_LOG_REMOVE: &str = "remove";

/// Parse the legacy timestamp format, e.g.
/// `September 29, 2017 11:12:57 AM GMT+02:00`.
///
/// The offset in positive-offset entries is glued to the zone abbreviation
/// (`GMT+02:00`), which no strptime-style pattern accepts as a numeric
/// offset. So: put a space between `GMT` and `+02:00`, then drop the
/// abbreviation token entirely and parse the numeric offset.
pub fn parse_android_log_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    let spaced = raw.replacen('+', " +", 1);
    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }
    let abbrev_position = tokens.len() - 2;
    if tokens[abbrev_position]
        .chars()
        .all(|c| c.is_ascii_alphabetic())
    {
        tokens.remove(abbrev_position);
    }
    let normalized = tokens.join(" ");
    DateTime::parse_from_str(&normalized, "%B %e, %Y %I:%M:%S %p %:z").ok()
}

/// Outer envelope of one legacy journal entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AndroidLogEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndroidLogCredential {
    pub identifier: CredentialTypeIdentifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndroidLogEntry {
    #[serde(rename = "timestamp", default)]
    pub time: String,
    #[serde(default)]
    pub credential: Option<AndroidLogCredential>,
}

impl AndroidLogEntry {
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        parse_android_log_time(&self.time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndroidLogVerification {
    #[serde(flatten)]
    pub entry: AndroidLogEntry,
    #[serde(rename = "attributeDisclosed", default)]
    pub disclosed: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndroidLogSignature {
    #[serde(flatten)]
    pub verification: AndroidLogVerification,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum AndroidLog {
    Verification(AndroidLogVerification),
    Issuance(AndroidLogEntry),
    Signature(AndroidLogSignature),
    Removal(AndroidLogEntry),
}

impl AndroidLogEnvelope {
    pub fn parse(&self) -> SessionResult<AndroidLog> {
        let value = self.value.clone();
        match self.kind.as_str() {
            ANDROID_LOG_VERIFICATION => Ok(AndroidLog::Verification(serde_json::from_value(
                value,
            )?)),
            ANDROID_LOG_ISSUE => Ok(AndroidLog::Issuance(serde_json::from_value(value)?)),
            ANDROID_LOG_SIGNATURE => Ok(AndroidLog::Signature(serde_json::from_value(value)?)),
            ANDROID_LOG_REMOVE => Ok(AndroidLog::Removal(serde_json::from_value(value)?)),
            other => Err(SessionError::with_info(
                ErrorKind::Serialization,
                format!("invalid android log type {}", other),
            )),
        }
    }
}
