// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tresor: core types, errors and configuration shared across all crates.

pub mod b64;
pub mod config;
pub mod data_dir;
pub mod error;
pub mod fsutil;
pub mod types;

pub use config::{AuditBackend, AuditConfig, EncryptionConfig, KeyConfig, RotationSettings, TresorConfig};
pub use error::{Result, TresorError};
pub use types::*;
