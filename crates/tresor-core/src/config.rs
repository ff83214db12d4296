// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data_dir;
use crate::error::{Result, TresorError};
use crate::types::{AuditLevel, EncryptionAlgorithm, HashAlgorithm, RotationPolicy};

/// Persistent settings for every Tresor component.
///
/// Every section falls back to its defaults when absent from the file, so a
/// config containing only `{"audit": {"app_name": "svc"}}` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TresorConfig {
    /// Root for keys and audit logs. Resolved via XDG when unset.
    pub data_dir: Option<PathBuf>,
    pub keys: KeyConfig,
    pub encryption: EncryptionConfig,
    pub audit: AuditConfig,
}

/// Key manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Raw 32-byte master key. Defaults to `<data_dir>/encryption/master.key`.
    pub master_key_path: Option<PathBuf>,
    /// Encrypted key store. Defaults to `<data_dir>/encryption/keys.json`.
    pub key_store_path: Option<PathBuf>,
    /// PBKDF2-HMAC-SHA256 iterations for the store-encryption key.
    pub kdf_iterations: u32,
    /// Number of `get_key` calls between use-count write-backs.
    pub persist_every_uses: u32,
    pub rotation: RotationSettings,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            master_key_path: None,
            key_store_path: None,
            kdf_iterations: 100_000,
            persist_every_uses: 16,
            rotation: RotationSettings::default(),
        }
    }
}

/// When the active key is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub policy: RotationPolicy,
    pub max_age_days: u32,
    pub max_uses: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::TimeBased,
            max_age_days: 90,
            max_uses: 10_000,
        }
    }
}

/// Encryption service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub default_algorithm: EncryptionAlgorithm,
    /// Plaintext bytes per chunk for file encryption.
    pub file_chunk_size: usize,
    /// Directory holding RSA key pairs as PKCS#8 PEM. In-memory only when unset.
    pub rsa_key_dir: Option<PathBuf>,
    pub rsa_key_bits: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: EncryptionAlgorithm::AesGcm,
            file_chunk_size: 64 * 1024,
            rsa_key_dir: None,
            rsa_key_bits: 2048,
        }
    }
}

/// Which storage backend the audit logger writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    /// JSON files under `log_dir`, rotated and pruned.
    #[default]
    File,
    /// A single SQLite database at `<log_dir>/audit.db`.
    Sqlite,
}

/// Audit logger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub app_name: String,
    /// Defaults to `<data_dir>/audit/logs`.
    pub log_dir: Option<PathBuf>,
    /// File backend window size. Every flush rewrites the current window,
    /// so larger windows make each flush proportionally slower.
    pub max_file_size_mb: u64,
    pub rotation_interval_hours: u64,
    pub retention_days: u64,
    /// Seconds between background flushes. 0 flushes on every event.
    pub sync_interval_secs: u64,
    pub min_level: AuditLevel,
    pub hash_algorithm: HashAlgorithm,
    /// File holding the chain HMAC secret. Plain hashing when unset.
    pub chain_secret_path: Option<PathBuf>,
    /// Encrypt stored records through the encryption service.
    pub use_encryption: bool,
    pub backend: AuditBackend,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            app_name: "tresor".to_owned(),
            log_dir: None,
            max_file_size_mb: 10,
            rotation_interval_hours: 24,
            retention_days: 90,
            sync_interval_secs: 10,
            min_level: AuditLevel::Info,
            hash_algorithm: HashAlgorithm::Sha256,
            chain_secret_path: None,
            use_encryption: true,
            backend: AuditBackend::File,
        }
    }
}

impl TresorConfig {
    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TresorError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| TresorError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Read `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::fsutil::atomic_write(path.as_ref(), json.as_bytes(), false)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(data_dir::default_data_dir)
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.keys
            .master_key_path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("encryption").join("master.key"))
    }

    pub fn key_store_path(&self) -> PathBuf {
        self.keys
            .key_store_path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("encryption").join("keys.json"))
    }

    pub fn audit_log_dir(&self) -> PathBuf {
        self.audit
            .log_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("audit").join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TresorConfig::default();
        assert_eq!(cfg.keys.kdf_iterations, 100_000);
        assert_eq!(cfg.keys.rotation.policy, RotationPolicy::TimeBased);
        assert_eq!(cfg.encryption.file_chunk_size, 65_536);
        assert_eq!(cfg.audit.min_level, AuditLevel::Info);
        assert!(cfg.audit.use_encryption);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: TresorConfig =
            serde_json::from_str(r#"{"audit": {"app_name": "svc", "min_level": "error"}}"#)
                .unwrap();
        assert_eq!(cfg.audit.app_name, "svc");
        assert_eq!(cfg.audit.min_level, AuditLevel::Error);
        assert_eq!(cfg.audit.retention_days, 90);
        assert_eq!(cfg.keys.persist_every_uses, 16);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tresor.json");

        let mut cfg = TresorConfig::default();
        cfg.data_dir = Some(dir.path().to_path_buf());
        cfg.audit.backend = AuditBackend::Sqlite;
        cfg.save(&path).unwrap();

        let loaded = TresorConfig::load(&path).unwrap();
        assert_eq!(loaded.audit.backend, AuditBackend::Sqlite);
        assert_eq!(loaded.master_key_path(), dir.path().join("encryption/master.key"));
        assert_eq!(loaded.audit_log_dir(), dir.path().join("audit/logs"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TresorConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.audit.app_name, "tresor");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(TresorConfig::load(&path), Err(TresorError::Config(_))));
    }
}
