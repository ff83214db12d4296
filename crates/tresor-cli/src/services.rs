// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: loads the configuration and owns the encryption service and
// audit logger for the lifetime of one command.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use tresor_audit::AuditLogger;
use tresor_core::config::TresorConfig;
use tresor_core::data_dir::default_data_dir;
use tresor_core::error::Result;
use tresor_core::types::AuditLevel;
use tresor_crypto::EncryptionService;

pub struct Services {
    config: TresorConfig,
    encryption: EncryptionService,
    /// Opened on first use so key-only commands never touch the log dir.
    audit: Option<AuditLogger>,
    /// Recorded as `user_id` on events this tool emits.
    user: Option<String>,
}

impl Services {
    /// Without an explicit config file, `<data dir>/config.json` is read if
    /// present.
    pub fn init(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => TresorConfig::load(path)?,
            None => {
                let dir = data_dir.clone().unwrap_or_else(default_data_dir);
                TresorConfig::load_or_default(dir.join("config.json"))?
            }
        };
        if data_dir.is_some() {
            config.data_dir = data_dir;
        }

        let encryption = EncryptionService::from_config(&config)?;
        info!(data_dir = %config.resolved_data_dir().display(), "services initialised");
        Ok(Self {
            config,
            encryption,
            audit: None,
            user: std::env::var("USER").ok().filter(|u| !u.is_empty()),
        })
    }

    #[cfg(test)]
    pub fn config(&self) -> &TresorConfig {
        &self.config
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.encryption
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn audit(&mut self) -> Result<&AuditLogger> {
        let logger = match self.audit.take() {
            Some(logger) => logger,
            None => {
                let logger = AuditLogger::from_config(&self.config, Some(self.encryption.clone()))?;
                let startup = logger.startup_verification();
                if !startup.is_valid() {
                    warn!(verification = %startup, "stored audit chain failed verification");
                }
                logger
            }
        };
        Ok(self.audit.insert(logger))
    }

    /// Record an event emitted by this tool under the current user.
    pub fn record(
        &mut self,
        level: AuditLevel,
        event_type: &str,
        message: &str,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Result<()> {
        let user = self.user.clone();
        self.audit()?
            .log(level, event_type, message, user.as_deref(), resource, details);
        Ok(())
    }

    /// Flush the audit log and key use counts.
    pub fn shutdown(self) -> Result<()> {
        if let Some(audit) = &self.audit {
            audit.close()?;
        }
        self.encryption.key_manager().flush()?;
        debug!("services shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tresor_audit::LogQuery;
    use tresor_core::error::TresorError;

    use super::*;
    use crate::commands;

    fn make_services(dir: &Path) -> Services {
        let mut config = TresorConfig::default();
        config.data_dir = Some(dir.to_path_buf());
        config.keys.kdf_iterations = 1_000;
        config.audit.sync_interval_secs = 3600;
        let path = dir.join("config.json");
        config.save(&path).expect("save config");
        Services::init(Some(&path), None).expect("init services")
    }

    fn event_types(services: &mut Services, query: &LogQuery) -> Vec<String> {
        let audit = services.audit().unwrap();
        audit.flush().unwrap();
        audit
            .get_logs(query)
            .unwrap()
            .iter()
            .filter_map(|r| r["event_type"].as_str().map(str::to_owned))
            .collect()
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let mut config = TresorConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        config.keys.kdf_iterations = 1_000;
        let path = dir.path().join("config.json");
        config.save(&path).unwrap();

        let services = Services::init(Some(&path), Some(other.path().to_path_buf())).unwrap();
        assert_eq!(services.config().data_dir.as_deref(), Some(other.path()));
        assert!(other.path().join("encryption").join("master.key").exists());
    }

    #[test]
    fn file_roundtrip_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let mut services = make_services(dir.path());
        let input = dir.path().join("report.txt");
        let sealed = dir.path().join("report.tresor");
        let restored = dir.path().join("report.out");
        std::fs::write(&input, b"quarterly numbers, do not share".repeat(10)).unwrap();

        let options = commands::files::options(None, true, Some(16));
        commands::files::encrypt(&mut services, &input, &sealed, &options).unwrap();
        commands::files::decrypt(&mut services, &sealed, &restored).unwrap();
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&restored).unwrap());

        assert_eq!(
            event_types(&mut services, &LogQuery::new()),
            ["file_decrypted", "file_encrypted"]
        );
        services.shutdown().unwrap();
    }

    #[test]
    fn tampered_file_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        let mut services = make_services(dir.path());
        let input = dir.path().join("in.bin");
        let sealed = dir.path().join("in.tresor");
        std::fs::write(&input, vec![7u8; 100]).unwrap();

        let options = commands::files::options(None, false, None);
        commands::files::encrypt(&mut services, &input, &sealed, &options).unwrap();
        let mut bytes = std::fs::read(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&sealed, bytes).unwrap();

        let err = commands::files::decrypt(&mut services, &sealed, &dir.path().join("out.bin"))
            .unwrap_err();
        assert!(matches!(err, TresorError::AuthenticationFailure(_)));
        assert!(!dir.path().join("out.bin").exists());
        assert_eq!(
            event_types(&mut services, &LogQuery::new().level(AuditLevel::Alert)),
            ["file_tampered"]
        );
    }

    #[test]
    fn key_commands_leave_a_verifiable_trail() {
        let dir = tempfile::tempdir().unwrap();
        let mut services = make_services(dir.path());
        commands::keys::rotate(&mut services).unwrap();
        let active = services
            .encryption()
            .key_manager()
            .active_key_id()
            .unwrap()
            .unwrap();
        assert!(!commands::keys::delete(&mut services, &active).unwrap());
        services.shutdown().unwrap();

        let mut services = make_services(dir.path());
        assert!(commands::audit::verify(&mut services).unwrap());
        assert_eq!(
            event_types(&mut services, &LogQuery::new().event_type("key_rotated")),
            ["key_rotated"]
        );
    }
}
