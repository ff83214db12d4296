// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tresor.

use thiserror::Error;

/// Top-level error type for all Tresor operations.
///
/// Chain verification outcomes are deliberately absent: an invalid chain is a
/// query answer (`ChainVerification`), not a failure.
#[derive(Debug, Error)]
pub enum TresorError {
    // -- Algorithm / parameter errors --
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    // -- Cryptographic errors --
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    // -- Key management --
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no active key configured")]
    NoActiveKey,

    #[error("key store is corrupt: {0}")]
    KeyStoreCorrupt(String),

    // -- Formats --
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    // -- Storage / persistence --
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),
}

impl TresorError {
    /// Whether the error stems from a failed integrity check (AEAD tag, HMAC).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailure(_))
    }

    /// Map a poisoned lock into a storage error.
    pub fn lock_poisoned(what: &str) -> Self {
        Self::Storage(format!("{what} lock poisoned"))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TresorError>;
