// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tresor-audit: tamper-evident audit logging.
//
// Every event is folded into a keyed hash chain (`chain`) before it is
// buffered by the `logger`. Records and the chain are persisted through a
// `storage` backend: rotating JSON files, SQLite, or either of those behind
// the encrypting decorator.

pub mod chain;
pub mod digest;
pub mod encrypted_storage;
pub mod file_storage;
pub mod logger;
pub mod sqlite_storage;
pub mod storage;

pub use chain::{
    ChainEntry, ChainProof, ChainSnapshot, ChainVerification, HashChain, ProofStep,
    VerificationResult,
};
pub use digest::Digester;
pub use encrypted_storage::EncryptedLogStorage;
pub use file_storage::FileLogStorage;
pub use logger::{AuditLogEntry, AuditLogger, AuditLoggerOptions};
pub use sqlite_storage::SqliteLogStorage;
pub use storage::{LogQuery, LogStorageBackend};
