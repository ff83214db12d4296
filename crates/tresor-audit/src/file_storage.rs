// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON-file audit storage.
//
// Layout under the log directory:
//   audit_YYYYmmdd_HHMMSS.json        JSON array of records, one per window
//   audit_YYYYmmdd_HHMMSS_0001.json   extra windows opened within one second
//   chain.json                        ChainSnapshot
//
// File names carry their UTC creation time, which drives both rotation and
// retention. Every write goes through temp-file, fsync, rename at 0600.
//
// A store rewrites the whole current window, so each flush costs O(window
// size) and a window costs O(size^2) overall. `max_file_size` is the bound;
// keep it small (the default is 10 MiB) or use the SQLite backend for high
// event rates.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use tresor_core::config::TresorConfig;
use tresor_core::error::{Result, TresorError};
use tresor_core::fsutil::atomic_write;

use crate::chain::ChainSnapshot;
use crate::storage::{LogQuery, LogStorageBackend, finish_query};

const CHAIN_FILE: &str = "chain.json";
const PREFIX: &str = "audit_";
const SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// Rotated JSON files in a single directory.
#[derive(Debug)]
pub struct FileLogStorage {
    dir: PathBuf,
    max_file_size: u64,
    rotation_interval: Duration,
    retention: Duration,
    /// File currently being appended to.
    current: Mutex<Option<PathBuf>>,
}

impl FileLogStorage {
    /// Open (creating if needed) `dir` with the given size and age limits.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(
        dir: impl AsRef<Path>,
        max_file_size: u64,
        rotation_interval: Duration,
        retention: Duration,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let storage = Self {
            dir,
            max_file_size,
            rotation_interval,
            retention,
            current: Mutex::new(None),
        };
        let latest = storage.log_files()?.pop();
        *storage
            .current
            .lock()
            .map_err(|_| TresorError::lock_poisoned("log file"))? = latest;
        debug!("file audit storage opened");
        Ok(storage)
    }

    pub fn from_config(config: &TresorConfig) -> Result<Self> {
        let audit = &config.audit;
        Self::open(
            config.audit_log_dir(),
            audit.max_file_size_mb.saturating_mul(1024 * 1024),
            i64::try_from(audit.rotation_interval_hours)
                .ok()
                .and_then(Duration::try_hours)
                .unwrap_or(Duration::MAX),
            i64::try_from(audit.retention_days)
                .ok()
                .and_then(Duration::try_days)
                .unwrap_or(Duration::MAX),
        )
    }

    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    fn chain_path(&self) -> PathBuf {
        self.dir.join(CHAIN_FILE)
    }

    /// Log files, oldest first.
    fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(PREFIX) && name.ends_with(SUFFIX) && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn should_rotate(&self, path: &Path, now: DateTime<Utc>) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        if meta.len() >= self.max_file_size {
            return true;
        }
        match file_time(path) {
            Some(created) => now - created > self.rotation_interval,
            None => true,
        }
    }

    /// Fresh file name for a window starting at `now`.
    fn new_file(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format(STAMP_FORMAT).to_string();
        let base = self.dir.join(format!("{PREFIX}{stamp}{SUFFIX}"));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|n| self.dir.join(format!("{PREFIX}{stamp}_{n:04}{SUFFIX}")))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }

    /// Delete files whose window started before the retention cut-off.
    fn prune(&self, now: DateTime<Utc>, current: Option<&Path>) -> Result<()> {
        for path in self.log_files()? {
            if Some(path.as_path()) == current {
                continue;
            }
            if let Some(created) = file_time(&path) {
                if now - created > self.retention {
                    fs::remove_file(&path)?;
                    debug!(file = %path.display(), "expired audit file removed");
                }
            }
        }
        Ok(())
    }
}

/// UTC creation time encoded in a log file name.
fn file_time(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(PREFIX)?.get(..STAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

fn read_records(path: &Path) -> Result<Vec<Value>> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| TresorError::InvalidFormat(format!("{}: {e}", path.display())))
}

impl LogStorageBackend for FileLogStorage {
    #[instrument(skip_all, fields(count = entries.len()))]
    fn store_log_entries(&self, entries: &[Value]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| TresorError::lock_poisoned("log file"))?;
        let now = Utc::now();
        self.prune(now, current.as_deref())?;

        let mut records = Vec::new();
        let target = match current.as_ref() {
            Some(path) if !self.should_rotate(path, now) => match read_records(path) {
                Ok(existing) => {
                    records = existing;
                    path.clone()
                }
                Err(TresorError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => path.clone(),
                Err(e) => {
                    // Never overwrite a file we cannot parse.
                    warn!(file = %path.display(), error = %e, "unreadable audit file, rotating");
                    self.new_file(now)
                }
            },
            _ => self.new_file(now),
        };

        records.extend_from_slice(entries);
        let json = serde_json::to_vec_pretty(&records)?;
        atomic_write(&target, &json, true)?;
        debug!(file = %target.display(), total = records.len(), "audit records written");
        *current = Some(target);
        Ok(())
    }

    fn retrieve_log_entries(&self, query: &LogQuery) -> Result<Vec<Value>> {
        let mut matched = Vec::new();
        for path in self.log_files()? {
            let records = match read_records(&path) {
                Ok(records) => records,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable audit file");
                    continue;
                }
            };
            matched.extend(records.into_iter().filter(|r| query.matches(r)));
        }
        Ok(finish_query(matched, query))
    }

    fn get_chain_entries(&self) -> Result<Option<ChainSnapshot>> {
        let path = self.chain_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| TresorError::InvalidFormat(format!("{}: {e}", path.display())))
    }

    #[instrument(skip_all, fields(entries = snapshot.entries.len()))]
    fn store_chain_entries(&self, snapshot: &ChainSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.chain_path(), &json, true)
    }
}
