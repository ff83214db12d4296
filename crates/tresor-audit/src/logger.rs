// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit logger: every event is folded into the hash chain, buffered, and
// flushed to storage together with the chain.
//
// Flushes happen
//   * inline for alert and critical events,
//   * inline once the sync interval has elapsed (every event when it is 0),
//   * from a background tokio task every sync interval, when a runtime is
//     available at construction,
//   * on `flush()`, `close()` and drop.
// Only explicit `flush()`/`close()` report storage errors; the other paths
// log them and keep the records buffered for the next attempt.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use tresor_core::config::{AuditBackend, AuditConfig, TresorConfig};
use tresor_core::error::{Result, TresorError};
use tresor_core::types::{AuditLevel, HashAlgorithm};
use tresor_crypto::EncryptionService;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::chain::{ChainVerification, HashChain, format_timestamp};
use crate::digest::Digester;
use crate::encrypted_storage::EncryptedLogStorage;
use crate::file_storage::FileLogStorage;
use crate::sqlite_storage::SqliteLogStorage;
use crate::storage::{LogQuery, LogStorageBackend};

/// One recorded audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event_type: String,
    pub message: String,
    pub user_id: Option<String>,
    pub resource: Option<String>,
    pub details: Option<Value>,
    /// `<app_name>@<hostname>`.
    pub source: String,
    /// Hash of the chain entry this event was folded into.
    pub chain_hash: String,
}

/// Construction parameters for [`AuditLogger`].
#[derive(Clone)]
pub struct AuditLoggerOptions {
    pub app_name: String,
    pub min_level: AuditLevel,
    /// Zero flushes on every event.
    pub sync_interval: Duration,
    pub hash_algorithm: HashAlgorithm,
    /// HMAC key for the chain. Plain hashing when `None`.
    pub chain_secret: Option<Zeroizing<Vec<u8>>>,
}

impl Default for AuditLoggerOptions {
    fn default() -> Self {
        Self {
            app_name: "tresor".to_owned(),
            min_level: AuditLevel::Info,
            sync_interval: Duration::from_secs(10),
            hash_algorithm: HashAlgorithm::Sha256,
            chain_secret: None,
        }
    }
}

impl fmt::Debug for AuditLoggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLoggerOptions")
            .field("app_name", &self.app_name)
            .field("min_level", &self.min_level)
            .field("sync_interval", &self.sync_interval)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("keyed", &self.chain_secret.is_some())
            .finish()
    }
}

impl AuditLoggerOptions {
    /// Reads the chain secret from `chain_secret_path` when set.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let chain_secret = match &config.chain_secret_path {
            Some(path) => Some(read_secret(path)?),
            None => None,
        };
        Ok(Self {
            app_name: config.app_name.clone(),
            min_level: config.min_level,
            sync_interval: Duration::from_secs(config.sync_interval_secs),
            hash_algorithm: config.hash_algorithm,
            chain_secret,
        })
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_min_level(mut self, level: AuditLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_chain_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.chain_secret = Some(Zeroizing::new(secret.into()));
        self
    }
}

fn read_secret(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let secret = Zeroizing::new(std::fs::read(path).map_err(|e| {
        TresorError::Config(format!("chain secret {}: {e}", path.display()))
    })?);
    if secret.is_empty() {
        return Err(TresorError::Config(format!(
            "chain secret {} is empty",
            path.display()
        )));
    }
    Ok(secret)
}

/// A poisoned lock only means another logging call panicked; the guarded
/// data is still consistent, so keep going.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().trim().to_owned();
    if name.is_empty() {
        "localhost".to_owned()
    } else {
        name
    }
}

/// State shared between callers and the background task.
struct Shared {
    app_name: String,
    hostname: String,
    min_level: AuditLevel,
    sync_interval: Duration,
    digester: Digester,
    storage: Arc<dyn LogStorageBackend>,
    /// Lock order: chain, then buffer.
    chain: Mutex<HashChain>,
    buffer: Mutex<Vec<Value>>,
    last_sync: Mutex<Instant>,
    /// Serialises flushes so storage sees whole batches in order.
    flush_lock: Mutex<()>,
    /// Chain length last written to storage.
    persisted_len: AtomicUsize,
}

impl Shared {
    fn sync_due(&self) -> bool {
        self.sync_interval.is_zero() || lock(&self.last_sync).elapsed() >= self.sync_interval
    }

    fn flush(&self) -> Result<()> {
        let _flushing = lock(&self.flush_lock);
        let (snapshot, pending) = {
            let chain = lock(&self.chain);
            let pending = std::mem::take(&mut *lock(&self.buffer));
            if pending.is_empty() && chain.len() == self.persisted_len.load(Ordering::Acquire) {
                *lock(&self.last_sync) = Instant::now();
                return Ok(());
            }
            (chain.export_chain(), pending)
        };

        if let Err(e) = self.storage.store_chain_entries(&snapshot) {
            self.requeue(pending);
            return Err(e);
        }
        self.persisted_len
            .store(snapshot.entries.len(), Ordering::Release);

        if !pending.is_empty() {
            if let Err(e) = self.storage.store_log_entries(&pending) {
                self.requeue(pending);
                return Err(e);
            }
        }
        *lock(&self.last_sync) = Instant::now();
        debug!(records = pending.len(), chain = snapshot.entries.len(), "audit buffer flushed");
        Ok(())
    }

    /// Put records back in front of anything logged since they were taken.
    fn requeue(&self, mut pending: Vec<Value>) {
        let mut buffer = lock(&self.buffer);
        pending.append(&mut buffer);
        *buffer = pending;
    }
}

struct SyncTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SyncTask {
    /// Spawn on the current tokio runtime; `None` outside one.
    fn spawn(shared: &Arc<Shared>) -> Option<Self> {
        if shared.sync_interval.is_zero() {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let shared = Arc::clone(shared);
        let period = shared.sync_interval;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        let shared = Arc::clone(&shared);
                        match tokio::task::spawn_blocking(move || shared.flush()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => error!(error = %e, "background audit flush failed"),
                            Err(e) => error!(error = %e, "background audit flush aborted"),
                        }
                    }
                }
            }
            debug!("audit sync task stopped");
        });
        debug!(?period, "audit sync task started");
        Some(Self { shutdown, handle })
    }

    fn stop(self) {
        // `notify_one` keeps a permit if the task is mid-flush.
        self.shutdown.notify_one();
        drop(self.handle);
    }
}

/// Tamper-evident audit log.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AuditLogger {
    shared: Arc<Shared>,
    startup: ChainVerification,
    task: Mutex<Option<SyncTask>>,
}

impl AuditLogger {
    /// Open a logger over `storage`, reloading its persisted chain.
    ///
    /// A persisted chain that fails verification is reported through
    /// [`startup_verification`](Self::startup_verification) and replaced by a
    /// fresh chain.
    #[instrument(skip_all, fields(app = %options.app_name))]
    pub fn new(storage: Arc<dyn LogStorageBackend>, options: AuditLoggerOptions) -> Result<Self> {
        let digester = Digester::new(
            options.hash_algorithm,
            options.chain_secret.as_deref().map(Vec::as_slice),
        );
        let mut chain = HashChain::with_digester(digester.clone())?;
        let mut startup = ChainVerification::valid();
        if let Some(snapshot) = storage.get_chain_entries()? {
            startup = chain.import_chain(snapshot);
            if !startup.is_valid() {
                warn!(verification = %startup, "persisted audit chain is invalid, starting a new chain");
                chain = HashChain::with_digester(digester.clone())?;
            }
        }
        let persisted_len = chain.len();

        let shared = Arc::new(Shared {
            app_name: options.app_name,
            hostname: hostname(),
            min_level: options.min_level,
            sync_interval: options.sync_interval,
            digester,
            storage,
            chain: Mutex::new(chain),
            buffer: Mutex::new(Vec::new()),
            last_sync: Mutex::new(Instant::now()),
            flush_lock: Mutex::new(()),
            persisted_len: AtomicUsize::new(persisted_len),
        });
        let task = SyncTask::spawn(&shared);
        info!(
            chain_len = persisted_len,
            background = task.is_some(),
            "audit logger opened"
        );
        Ok(Self {
            shared,
            startup,
            task: Mutex::new(task),
        })
    }

    /// Build the storage stack described by `config`.
    ///
    /// When `config.audit.use_encryption` is set, records are sealed through
    /// `encryption`, or through a service opened from `config` if `None`.
    pub fn from_config(config: &TresorConfig, encryption: Option<EncryptionService>) -> Result<Self> {
        let base: Arc<dyn LogStorageBackend> = match config.audit.backend {
            AuditBackend::File => Arc::new(FileLogStorage::from_config(config)?),
            AuditBackend::Sqlite => Arc::new(SqliteLogStorage::from_config(config)?),
        };
        let storage: Arc<dyn LogStorageBackend> = if config.audit.use_encryption {
            let service = match encryption {
                Some(service) => service,
                None => EncryptionService::from_config(config)?,
            };
            Arc::new(EncryptedLogStorage::new(base, service))
        } else {
            base
        };
        Self::new(storage, AuditLoggerOptions::from_config(&config.audit)?)
    }

    /// Record an event. Returns `None` when `level` is below the minimum.
    ///
    /// Alert and critical events are flushed before this returns. Storage
    /// errors on that path are logged and the event stays buffered.
    pub fn log(
        &self,
        level: AuditLevel,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        let shared = &self.shared;
        if level < shared.min_level {
            return None;
        }
        let id = Uuid::new_v4();
        let timestamp = Utc::now();

        let mut record = Map::new();
        record.insert("id".into(), Value::String(id.to_string()));
        record.insert("timestamp".into(), Value::String(format_timestamp(&timestamp)));
        record.insert("level".into(), Value::String(level.as_str().into()));
        record.insert("event_type".into(), Value::String(event_type.into()));
        record.insert("message".into(), Value::String(message.into()));
        record.insert("app_name".into(), Value::String(shared.app_name.clone()));
        record.insert("hostname".into(), Value::String(shared.hostname.clone()));
        if let Some(user_id) = user_id {
            record.insert("user_id".into(), Value::String(user_id.into()));
        }
        if let Some(resource) = resource {
            record.insert("resource".into(), Value::String(resource.into()));
        }
        if let Some(details) = &details {
            record.insert("details".into(), details.clone());
        }

        let chain_hash = {
            let mut chain = lock(&shared.chain);
            let hash = chain.add_entry(Value::Object(record.clone())).hash;
            record.insert("chain_hash".into(), Value::String(hash.clone()));
            // Pushed under the chain lock so the buffer stays in chain order.
            lock(&shared.buffer).push(Value::Object(record));
            hash
        };

        if level.is_urgent() || shared.sync_due() {
            if let Err(e) = shared.flush() {
                error!(error = %e, %level, "audit flush failed, records kept for retry");
            }
        }

        Some(AuditLogEntry {
            id,
            timestamp,
            level,
            event_type: event_type.to_owned(),
            message: message.to_owned(),
            user_id: user_id.map(str::to_owned),
            resource: resource.map(str::to_owned),
            details,
            source: format!("{}@{}", shared.app_name, shared.hostname),
            chain_hash,
        })
    }

    pub fn info(
        &self,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.log(AuditLevel::Info, event_type, message, user_id, resource, details)
    }

    pub fn warning(
        &self,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.log(AuditLevel::Warning, event_type, message, user_id, resource, details)
    }

    pub fn error(
        &self,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.log(AuditLevel::Error, event_type, message, user_id, resource, details)
    }

    pub fn alert(
        &self,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.log(AuditLevel::Alert, event_type, message, user_id, resource, details)
    }

    pub fn critical(
        &self,
        event_type: &str,
        message: &str,
        user_id: Option<&str>,
        resource: Option<&str>,
        details: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.log(AuditLevel::Critical, event_type, message, user_id, resource, details)
    }

    /// Stored records matching `query`, newest first. Buffered records that
    /// have not been flushed yet are not included.
    pub fn get_logs(&self, query: &LogQuery) -> Result<Vec<Value>> {
        self.shared.storage.retrieve_log_entries(query)
    }

    /// Reload the persisted chain and verify it from its stored genesis hash.
    #[instrument(skip_all)]
    pub fn verify_integrity(&self) -> Result<ChainVerification> {
        let Some(snapshot) = self.shared.storage.get_chain_entries()? else {
            return Ok(ChainVerification::valid());
        };
        let mut chain = HashChain::with_digester(self.shared.digester.clone())?;
        let verification = chain.import_chain(snapshot);
        debug!(%verification, "persisted chain verified");
        Ok(verification)
    }

    /// Result of verifying the persisted chain when this logger was opened.
    pub fn startup_verification(&self) -> ChainVerification {
        self.startup
    }

    /// Number of entries in the in-memory chain.
    pub fn chain_len(&self) -> usize {
        lock(&self.shared.chain).len()
    }

    pub fn latest_hash(&self) -> String {
        lock(&self.shared.chain).latest_hash().to_owned()
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        lock(&self.shared.buffer).len()
    }

    /// Write the chain and all buffered records to storage.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Stop the background task and flush everything.
    pub fn close(&self) -> Result<()> {
        if let Some(task) = lock(&self.task).take() {
            task.stop();
        }
        self.shared.flush()?;
        info!("audit logger closed");
        Ok(())
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.stop();
        }
        if let Err(e) = self.shared.flush() {
            warn!(error = %e, "final audit flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use serde_json::json;

    use super::*;
    use crate::chain::VerificationResult;

    const HOUR: Duration = Duration::from_secs(3600);

    fn options() -> AuditLoggerOptions {
        AuditLoggerOptions::default()
            .with_app_name("test-app")
            .with_sync_interval(HOUR)
            .with_chain_secret(b"k1".to_vec())
    }

    fn sqlite() -> Arc<SqliteLogStorage> {
        Arc::new(SqliteLogStorage::open_in_memory().expect("open in-memory storage"))
    }

    /// Fails every write while `failing` is set.
    struct FlakyStorage {
        inner: SqliteLogStorage,
        failing: AtomicBool,
        rejected: AtomicUsize,
    }

    impl FlakyStorage {
        fn new(failing: bool) -> Self {
            Self {
                inner: SqliteLogStorage::open_in_memory().unwrap(),
                failing: AtomicBool::new(failing),
                rejected: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                Err(TresorError::Storage("disk unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    impl LogStorageBackend for FlakyStorage {
        fn store_log_entries(&self, entries: &[Value]) -> Result<()> {
            self.check()?;
            self.inner.store_log_entries(entries)
        }

        fn retrieve_log_entries(&self, query: &LogQuery) -> Result<Vec<Value>> {
            self.inner.retrieve_log_entries(query)
        }

        fn get_chain_entries(&self) -> Result<Option<crate::chain::ChainSnapshot>> {
            self.inner.get_chain_entries()
        }

        fn store_chain_entries(&self, snapshot: &crate::chain::ChainSnapshot) -> Result<()> {
            self.check()?;
            self.inner.store_chain_entries(snapshot)
        }
    }

    #[test]
    fn entry_fields_and_source() {
        let logger = AuditLogger::new(sqlite(), options()).unwrap();
        let entry = logger
            .info("login", "user logged in", Some("alice"), Some("console"), Some(json!({"ip": "10.0.0.1"})))
            .unwrap();
        assert_eq!(entry.level, AuditLevel::Info);
        assert_eq!(entry.user_id.as_deref(), Some("alice"));
        assert!(entry.source.starts_with("test-app@"));
        assert!(entry.source.len() > "test-app@".len(), "hostname resolved");
        assert_eq!(entry.chain_hash, logger.latest_hash());
        assert_eq!(logger.chain_len(), 1);
    }

    #[test]
    fn below_min_level_is_dropped_by_rank() {
        let logger =
            AuditLogger::new(sqlite(), options().with_min_level(AuditLevel::Error)).unwrap();
        assert!(logger.info("e", "m", None, None, None).is_none());
        assert!(logger.warning("e", "m", None, None, None).is_none());
        assert!(logger.error("e", "m", None, None, None).is_some());
        // "critical" sorts before "error" as a string but outranks it.
        assert!(logger.critical("e", "m", None, None, None).is_some());
        assert_eq!(logger.chain_len(), 2);
    }

    #[test]
    fn urgent_events_flush_immediately() {
        let storage = sqlite();
        let logger = AuditLogger::new(storage.clone(), options()).unwrap();

        logger.info("read", "buffered", None, None, None).unwrap();
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(logger.pending(), 1);

        logger.alert("intrusion", "flushes", None, None, None).unwrap();
        assert_eq!(storage.count().unwrap(), 2);
        assert_eq!(logger.pending(), 0);
        assert_eq!(storage.get_chain_entries().unwrap().unwrap().entries.len(), 2);
    }

    #[test]
    fn zero_interval_writes_through() {
        let storage = sqlite();
        let logger =
            AuditLogger::new(storage.clone(), options().with_sync_interval(Duration::ZERO)).unwrap();
        logger.info("a", "m", None, None, None).unwrap();
        logger.info("b", "m", None, None, None).unwrap();
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn get_logs_filters() {
        let logger = AuditLogger::new(sqlite(), options()).unwrap();
        logger.info("login", "m", Some("alice"), None, None).unwrap();
        logger.warning("login", "m", Some("bob"), None, None).unwrap();
        logger.info("logout", "m", Some("alice"), Some("db"), None).unwrap();
        logger.flush().unwrap();

        assert_eq!(logger.get_logs(&LogQuery::new()).unwrap().len(), 3);
        let alice = logger.get_logs(&LogQuery::new().user_id("alice")).unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0]["event_type"], "logout");
        assert_eq!(
            logger.get_logs(&LogQuery::new().level(AuditLevel::Warning)).unwrap().len(),
            1
        );
        assert_eq!(logger.get_logs(&LogQuery::new().resource("db")).unwrap().len(), 1);
    }

    #[test]
    fn stored_records_carry_chain_hash() {
        let logger = AuditLogger::new(sqlite(), options()).unwrap();
        let entry = logger.info("e", "m", None, None, None).unwrap();
        logger.flush().unwrap();
        let records = logger.get_logs(&LogQuery::new()).unwrap();
        assert_eq!(records[0]["chain_hash"], entry.chain_hash.as_str());
        assert_eq!(records[0]["id"], entry.id.to_string().as_str());
        assert_eq!(records[0]["app_name"], "test-app");
    }

    #[test]
    fn verify_integrity_of_persisted_chain() {
        let logger = AuditLogger::new(sqlite(), options()).unwrap();
        assert!(logger.verify_integrity().unwrap().is_valid(), "nothing stored yet");
        for i in 0..5 {
            logger.info("e", &format!("event {i}"), None, None, None).unwrap();
        }
        logger.flush().unwrap();
        assert_eq!(logger.verify_integrity().unwrap(), ChainVerification::valid());
    }

    #[test]
    fn reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            let storage = Arc::new(
                FileLogStorage::open(dir.path(), 1 << 20, chrono::Duration::hours(1), chrono::Duration::days(1))
                    .unwrap(),
            );
            AuditLogger::new(storage, options()).unwrap()
        };

        let first = open();
        first.info("a", "m", None, None, None).unwrap();
        first.info("b", "m", None, None, None).unwrap();
        let tip = first.latest_hash();
        first.close().unwrap();
        drop(first);

        let second = open();
        assert!(second.startup_verification().is_valid());
        assert_eq!(second.chain_len(), 2);
        assert_eq!(second.latest_hash(), tip);
        second.info("c", "m", None, None, None).unwrap();
        second.close().unwrap();
        assert_eq!(second.verify_integrity().unwrap(), ChainVerification::valid());
        assert_eq!(second.get_logs(&LogQuery::new()).unwrap().len(), 3);
    }

    #[test]
    fn tampered_chain_detected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            FileLogStorage::open(dir.path(), 1 << 20, chrono::Duration::hours(1), chrono::Duration::days(1))
                .unwrap(),
        );
        {
            let logger = AuditLogger::new(storage.clone(), options()).unwrap();
            for event in ["login", "access", "logout"] {
                logger.info(event, "m", None, None, None).unwrap();
            }
            logger.close().unwrap();
        }

        let mut snapshot = storage.get_chain_entries().unwrap().unwrap();
        snapshot.entries[1].data["message"] = json!("rewritten");
        storage.store_chain_entries(&snapshot).unwrap();

        let logger = AuditLogger::new(storage.clone(), options()).unwrap();
        let expected = ChainVerification {
            result: VerificationResult::InvalidHash,
            first_invalid_sequence: Some(2),
        };
        assert_eq!(logger.startup_verification(), expected);
        assert_eq!(logger.verify_integrity().unwrap(), expected);
        assert_eq!(logger.chain_len(), 0, "fresh chain started");
    }

    #[test]
    fn wrong_secret_fails_integrity() {
        let storage = sqlite();
        {
            let logger = AuditLogger::new(storage.clone(), options()).unwrap();
            logger.info("e", "m", None, None, None).unwrap();
            logger.close().unwrap();
        }
        let other = AuditLogger::new(storage, options().with_chain_secret(b"k2".to_vec())).unwrap();
        assert_eq!(other.startup_verification().result, VerificationResult::InvalidHash);
    }

    #[test]
    fn failed_flush_requeues() {
        let storage = Arc::new(FlakyStorage::new(true));
        let logger = AuditLogger::new(storage.clone(), options()).unwrap();

        // Urgent path swallows the error and keeps the record.
        assert!(logger.critical("breach", "m", None, None, None).is_some());
        logger.info("later", "m", None, None, None).unwrap();
        assert_eq!(logger.pending(), 2);
        assert!(logger.flush().is_err());
        assert_eq!(logger.pending(), 2);

        storage.failing.store(false, Ordering::SeqCst);
        logger.flush().unwrap();
        assert_eq!(logger.pending(), 0);
        let stored = storage.inner.retrieve_log_entries(&LogQuery::new()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1]["event_type"], "breach", "order preserved");
        assert!(logger.verify_integrity().unwrap().is_valid());
    }

    #[test]
    fn concurrent_logging_keeps_chain_linked() {
        let storage = sqlite();
        let logger = Arc::new(AuditLogger::new(storage.clone(), options()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        logger
                            .info("load", &format!("{t}-{i}"), None, None, None)
                            .unwrap();
                        if i % 10 == 0 {
                            logger.flush().unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        logger.flush().unwrap();

        assert_eq!(logger.chain_len(), 400);
        assert_eq!(storage.count().unwrap(), 400);
        assert!(logger.verify_integrity().unwrap().is_valid());
    }

    #[test]
    fn no_background_task_without_runtime() {
        let logger = AuditLogger::new(sqlite(), options()).unwrap();
        assert!(lock(&logger.task).is_none());
    }

    #[tokio::test]
    async fn background_task_flushes() {
        let storage = sqlite();
        let logger = AuditLogger::new(
            storage.clone(),
            options().with_sync_interval(Duration::from_millis(50)),
        )
        .unwrap();
        assert!(lock(&logger.task).is_some());

        logger.info("tick", "m", None, None, None).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(logger.pending(), 0);
        logger.close().unwrap();
        assert!(lock(&logger.task).is_none());
    }

    #[tokio::test]
    async fn background_task_survives_failed_flush() {
        let storage = Arc::new(FlakyStorage::new(true));
        let logger = AuditLogger::new(
            storage.clone(),
            options().with_sync_interval(Duration::from_millis(50)),
        )
        .unwrap();

        logger.info("first", "m", None, None, None).unwrap();
        logger.warning("second", "m", None, None, None).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(storage.rejected.load(Ordering::SeqCst) > 0, "task attempted a flush");
        assert_eq!(logger.pending(), 2);
        assert!(!lock(&logger.task).as_ref().unwrap().handle.is_finished());

        storage.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(logger.pending(), 0);
        assert_eq!(storage.inner.count().unwrap(), 2);

        // Still ticking after recovery.
        logger.info("third", "m", None, None, None).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(storage.inner.count().unwrap(), 3);

        let stored = storage.inner.retrieve_log_entries(&LogQuery::new()).unwrap();
        assert_eq!(stored[2]["event_type"], "first", "order preserved");
        assert!(logger.verify_integrity().unwrap().is_valid());
        logger.close().unwrap();
    }
}
