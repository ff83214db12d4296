// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `tresor encrypt` / `tresor decrypt`

use std::path::Path;

use serde_json::json;
use tresor_core::error::Result;
use tresor_core::types::{AuditLevel, EncryptionAlgorithm};
use tresor_crypto::FileEncryptionOptions;

use crate::services::Services;

pub fn options(
    algorithm: Option<EncryptionAlgorithm>,
    envelope: bool,
    chunk_size: Option<usize>,
) -> FileEncryptionOptions {
    FileEncryptionOptions {
        algorithm,
        envelope,
        chunk_size,
    }
}

pub fn encrypt(
    services: &mut Services,
    input: &Path,
    output: &Path,
    options: &FileEncryptionOptions,
) -> Result<()> {
    let header = services.encryption().encrypt_file(input, output, options)?;
    services.record(
        AuditLevel::Info,
        "file_encrypted",
        "file encrypted",
        Some(&input.display().to_string()),
        Some(json!({
            "output": output.display().to_string(),
            "algorithm": header.algorithm,
            "envelope": header.envelope,
            "key_id": header.key_id,
            "chunk_size": header.chunk_size,
        })),
    )?;
    println!(
        "{} -> {} ({}, key {})",
        input.display(),
        output.display(),
        header.algorithm,
        header.key_id
    );
    Ok(())
}

/// Authentication failures are audited as alerts before the error is
/// returned.
pub fn decrypt(services: &mut Services, input: &Path, output: &Path) -> Result<()> {
    let resource = input.display().to_string();
    let header = match services.encryption().decrypt_file(input, output) {
        Ok(header) => header,
        Err(e) => {
            if e.is_authentication_failure() {
                services.record(
                    AuditLevel::Alert,
                    "file_tampered",
                    "encrypted file failed authentication",
                    Some(&resource),
                    Some(json!({ "error": e.to_string() })),
                )?;
            }
            return Err(e);
        }
    };
    services.record(
        AuditLevel::Info,
        "file_decrypted",
        "file decrypted",
        Some(&resource),
        Some(json!({
            "output": output.display().to_string(),
            "key_id": header.key_id,
        })),
    )?;
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}
