//! Revision identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

const ZERO_HEX: &str = "0000000000000000000000000000000000000000";

/// Opaque identifier of a commit in the configuration repository.
///
/// The zero revision (forty `0` digits) is a sentinel meaning "nothing has
/// been observed yet". It never names a real commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Returns the zero revision.
    pub fn zero() -> Self {
        Self(ZERO_HEX.to_string())
    }

    /// Parses a full hexadecimal object id as printed by `git rev-parse`.
    ///
    /// Accepts SHA-1 (40) and SHA-256 (64) ids; surrounding whitespace is
    /// ignored and the result is lowercased.
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        let valid_len = hex.len() == 40 || hex.len() == 64;
        if !valid_len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(hex.to_ascii_lowercase()))
    }

    /// Returns true for the "nothing observed yet" sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Returns the full hexadecimal id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first seven characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl Default for RevisionId {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
