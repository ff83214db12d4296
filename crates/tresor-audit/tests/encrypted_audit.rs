// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end: audit logger over encrypted storage, built from configuration.

use std::path::Path;

use serde_json::json;
use tresor_audit::{AuditLogger, LogQuery, VerificationResult};
use tresor_core::config::{AuditBackend, TresorConfig};
use tresor_core::types::AuditLevel;
use tresor_crypto::EncryptionService;

fn make_config(dir: &Path, backend: AuditBackend) -> TresorConfig {
    let secret = dir.join("chain.secret");
    std::fs::write(&secret, b"integration-chain-secret").unwrap();

    let mut config = TresorConfig::default();
    config.data_dir = Some(dir.to_path_buf());
    config.keys.kdf_iterations = 1_000;
    config.audit.app_name = "integration".into();
    config.audit.sync_interval_secs = 3600;
    config.audit.chain_secret_path = Some(secret);
    config.audit.use_encryption = true;
    config.audit.backend = backend;
    config
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn file_backend_encrypts_at_rest_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), AuditBackend::File);

    {
        let logger = AuditLogger::from_config(&config, None).unwrap();
        logger
            .info("login", "alice signed in from the vault room", Some("alice"), None, None)
            .unwrap();
        logger
            .alert("policy", "bob exported the ledger", Some("bob"), Some("ledger"), Some(json!({"rows": 42})))
            .unwrap();
        logger.close().unwrap();
    }

    for entry in std::fs::read_dir(config.audit_log_dir()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.starts_with("audit_") || name == "chain.json" {
            let raw = std::fs::read(&path).unwrap();
            assert!(!contains_bytes(&raw, b"vault room"), "{name} leaks plaintext");
            assert!(!contains_bytes(&raw, b"alice"), "{name} leaks user ids");
        }
    }

    let logger = AuditLogger::from_config(&config, None).unwrap();
    assert!(logger.startup_verification().is_valid());
    assert_eq!(logger.chain_len(), 2);

    let all = logger.get_logs(&LogQuery::new()).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["user_id"], "bob");
    assert_eq!(all[0]["details"]["rows"], 42);

    let alerts = logger.get_logs(&LogQuery::new().level(AuditLevel::Alert)).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["resource"], "ledger");

    assert!(logger.verify_integrity().unwrap().is_valid());
}

#[test]
fn sqlite_backend_reads_records_across_key_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), AuditBackend::Sqlite);
    let service = EncryptionService::from_config(&config).unwrap();

    let logger = AuditLogger::from_config(&config, Some(service.clone())).unwrap();
    logger.info("before", "sealed with the first key", None, None, None).unwrap();
    logger.flush().unwrap();

    let first = service.key_manager().active_key_id().unwrap();
    let second = service.key_manager().rotate_key().unwrap();
    assert_ne!(first.as_deref(), Some(second.as_str()));

    logger.info("after", "sealed with the second key", None, None, None).unwrap();
    logger.flush().unwrap();

    let records = logger.get_logs(&LogQuery::new()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["event_type"], "after");
    assert_eq!(records[1]["event_type"], "before");
    assert!(logger.verify_integrity().unwrap().is_valid());
}

#[test]
fn chain_secret_change_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = make_config(dir.path(), AuditBackend::Sqlite);
    {
        let logger = AuditLogger::from_config(&config, None).unwrap();
        logger.warning("config", "threshold lowered", Some("carol"), None, None).unwrap();
        logger.close().unwrap();
    }

    let other_secret = dir.path().join("other.secret");
    std::fs::write(&other_secret, b"a different secret").unwrap();
    config.audit.chain_secret_path = Some(other_secret);

    let logger = AuditLogger::from_config(&config, None).unwrap();
    let startup = logger.startup_verification();
    assert_eq!(startup.result, VerificationResult::InvalidHash);
    assert_eq!(startup.first_invalid_sequence, Some(1));
}

#[test]
fn missing_chain_secret_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = make_config(dir.path(), AuditBackend::File);
    config.audit.chain_secret_path = Some(dir.path().join("absent.secret"));
    assert!(matches!(
        AuditLogger::from_config(&config, None),
        Err(tresor_core::TresorError::Config(_))
    ));
}
