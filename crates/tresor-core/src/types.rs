// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain enums shared by the crypto and audit crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TresorError;

/// Cipher selected for an encryption operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// AES in GCM mode (authenticated encryption, tag appended).
    #[default]
    #[serde(rename = "aes-gcm")]
    AesGcm,
    /// AES in CBC mode with an HMAC-SHA256 tag (encrypt-then-MAC).
    #[serde(rename = "aes-cbc")]
    AesCbc,
    /// RSA-OAEP with SHA-256. Keys come from the RSA key store.
    #[serde(rename = "rsa")]
    Rsa,
}

impl EncryptionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AesGcm => "aes-gcm",
            Self::AesCbc => "aes-cbc",
            Self::Rsa => "rsa",
        }
    }

    /// Whether the algorithm uses symmetric key material from the key manager.
    pub fn is_symmetric(self) -> bool {
        !matches!(self, Self::Rsa)
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = TresorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-gcm" | "gcm" => Ok(Self::AesGcm),
            "aes-cbc" | "cbc" => Ok(Self::AesCbc),
            "rsa" | "rsa-oaep" => Ok(Self::Rsa),
            other => Err(TresorError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Digest used by the hash chain (plain, or as the HMAC hash when keyed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = TresorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(TresorError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Severity of an audit event.
///
/// Ordering follows the explicit rank, never the string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AuditLevel {
    #[default]
    Info = 0,
    Warning = 1,
    Error = 2,
    Alert = 3,
    Critical = 4,
}

impl AuditLevel {
    pub const ALL: [AuditLevel; 5] = [
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Alert,
        Self::Critical,
    ];

    /// Numeric severity rank (info = 0 ... critical = 4).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// High-severity events bypass batching and are flushed immediately.
    pub fn is_urgent(self) -> bool {
        self >= Self::Alert
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Alert => "alert",
            Self::Critical => "critical",
        }
    }
}

impl PartialOrd for AuditLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AuditLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLevel {
    type Err = TresorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TresorError::InvalidParameter(format!("unknown audit level: {s}")))
    }
}

/// When the key manager retires its active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Never rotate automatically.
    None,
    /// Rotate once the active key reaches `max_age_days`.
    #[default]
    TimeBased,
    /// Rotate once the active key reaches `max_uses`.
    UsageBased,
    /// Rotate on whichever threshold is hit first.
    Hybrid,
    /// Only rotate when asked to.
    Manual,
}

impl RotationPolicy {
    pub fn checks_age(self) -> bool {
        matches!(self, Self::TimeBased | Self::Hybrid)
    }

    pub fn checks_usage(self) -> bool {
        matches!(self, Self::UsageBased | Self::Hybrid)
    }
}

/// Purpose of a symmetric key held by the key manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Encrypts payloads directly.
    #[default]
    Data,
    /// Wraps data-encryption keys.
    KeyEncryption,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::KeyEncryption => f.write_str("key_encryption"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_rank_not_name() {
        // "critical" < "info" alphabetically; the rank must win.
        assert!(AuditLevel::Critical > AuditLevel::Info);
        assert!(AuditLevel::Alert > AuditLevel::Error);
        assert!(AuditLevel::Warning < AuditLevel::Error);
        let mut levels = vec![AuditLevel::Critical, AuditLevel::Info, AuditLevel::Alert];
        levels.sort();
        assert_eq!(levels, vec![AuditLevel::Info, AuditLevel::Alert, AuditLevel::Critical]);
    }

    #[test]
    fn urgent_levels() {
        assert!(AuditLevel::Alert.is_urgent());
        assert!(AuditLevel::Critical.is_urgent());
        assert!(!AuditLevel::Error.is_urgent());
    }

    #[test]
    fn algorithm_wire_names() {
        assert_eq!(
            serde_json::to_string(&EncryptionAlgorithm::AesGcm).unwrap(),
            "\"aes-gcm\""
        );
        assert_eq!(
            serde_json::from_str::<EncryptionAlgorithm>("\"aes-cbc\"").unwrap(),
            EncryptionAlgorithm::AesCbc
        );
        assert_eq!("RSA".parse::<EncryptionAlgorithm>().unwrap(), EncryptionAlgorithm::Rsa);
        assert!("des".parse::<EncryptionAlgorithm>().is_err());
    }

    #[test]
    fn policy_checks() {
        assert!(RotationPolicy::Hybrid.checks_age());
        assert!(RotationPolicy::Hybrid.checks_usage());
        assert!(!RotationPolicy::Manual.checks_age());
        assert!(!RotationPolicy::None.checks_usage());
        assert_eq!(
            serde_json::to_string(&RotationPolicy::UsageBased).unwrap(),
            "\"usage_based\""
        );
    }

    #[test]
    fn hash_algorithm_parse() {
        assert_eq!("SHA-384".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha384);
        assert_eq!(HashAlgorithm::Sha512.hex_len(), 128);
    }
}
