// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `tresor keys ...`

use clap::ValueEnum;
use serde_json::json;
use tresor_core::error::Result;
use tresor_core::types::{AuditLevel, KeyType};

use crate::services::Services;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KeyKind {
    Data,
    KeyEncryption,
}

impl From<KeyKind> for KeyType {
    fn from(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Data => KeyType::Data,
            KeyKind::KeyEncryption => KeyType::KeyEncryption,
        }
    }
}

pub fn list(services: &Services) -> Result<()> {
    let keys = services.encryption().key_manager().list_keys()?;
    if keys.is_empty() {
        println!("no keys");
        return Ok(());
    }
    println!(
        "{:<34} {:<15} {:<26} {:>8}  STATUS",
        "ID", "TYPE", "CREATED", "USES"
    );
    for key in keys {
        let status = if key.is_active {
            "active"
        } else if key.rotated {
            "rotated"
        } else {
            "inactive"
        };
        println!(
            "{:<34} {:<15} {:<26} {:>8}  {status}",
            key.id,
            key.key_type.to_string(),
            key.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            key.use_count,
        );
    }
    Ok(())
}

pub fn generate(services: &mut Services, kind: KeyKind) -> Result<()> {
    let key_type = KeyType::from(kind);
    let id = services.encryption().key_manager().generate_key(key_type)?;
    services.record(
        AuditLevel::Info,
        "key_generated",
        "symmetric key generated",
        Some(&id),
        Some(json!({ "type": key_type })),
    )?;
    println!("{id}");
    Ok(())
}

pub fn rotate(services: &mut Services) -> Result<()> {
    let previous = services.encryption().key_manager().active_key_id()?;
    let id = services.encryption().key_manager().rotate_key()?;
    services.record(
        AuditLevel::Warning,
        "key_rotated",
        "active key rotated",
        Some(&id),
        Some(json!({ "previous": previous })),
    )?;
    println!("{id}");
    Ok(())
}

/// `false` when the key is active or unknown.
pub fn delete(services: &mut Services, id: &str) -> Result<bool> {
    let deleted = services.encryption().key_manager().delete_key(id)?;
    if deleted {
        services.record(AuditLevel::Warning, "key_deleted", "key deleted", Some(id), None)?;
        println!("deleted {id}");
    } else {
        eprintln!("{id} was not deleted: it is the active key or does not exist");
    }
    Ok(deleted)
}

pub fn check(services: &mut Services, apply: bool) -> Result<()> {
    let keys = services.encryption().key_manager();
    if !apply {
        let due = keys.check_rotation_needed()?;
        println!("{}", if due { "rotation due" } else { "rotation not due" });
        return Ok(());
    }
    match keys.rotate_if_needed()? {
        Some(id) => {
            services.record(
                AuditLevel::Warning,
                "key_rotated",
                "rotation policy triggered",
                Some(&id),
                None,
            )?;
            println!("rotated to {id}");
        }
        None => println!("rotation not due"),
    }
    Ok(())
}
