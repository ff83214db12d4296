// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `tresor audit ...`

use serde_json::Value;
use tresor_audit::LogQuery;
use tresor_core::error::Result;
use tresor_core::types::AuditLevel;

use crate::services::Services;

/// `user` defaults to the invoking user.
pub fn log(
    services: &mut Services,
    level: AuditLevel,
    event_type: &str,
    message: &str,
    user: Option<&str>,
    resource: Option<&str>,
    details: Option<Value>,
) -> Result<()> {
    let user = user.or(services.user()).map(str::to_owned);
    match services
        .audit()?
        .log(level, event_type, message, user.as_deref(), resource, details)
    {
        Some(entry) => println!("{} {}", entry.id, entry.chain_hash),
        None => eprintln!("{level} is below the configured minimum level, nothing recorded"),
    }
    Ok(())
}

pub fn query(services: &mut Services, query: &LogQuery) -> Result<()> {
    for record in services.audit()?.get_logs(query)? {
        println!("{record}");
    }
    Ok(())
}

/// `false` when the stored chain does not verify.
pub fn verify(services: &mut Services) -> Result<bool> {
    let audit = services.audit()?;
    let verification = audit.verify_integrity()?;
    println!("{verification}");
    Ok(verification.is_valid())
}
