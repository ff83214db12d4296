// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encrypting decorator over any audit storage backend.
//
// Each record is sealed as
//   {timestamp, encrypted: true, algorithm, key_id, iv, tag, data}
// with the timestamp left in the clear so the inner backend can still
// filter by time. Everything else is filtered after decryption.
//
// Chain snapshots keep sequence, timestamps and hashes in the clear; each
// entry's `data` (the full event payload) is sealed the same way as a
// record. Linkage can be inspected without keys, but recomputing hashes
// needs them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};
use tresor_core::b64;
use tresor_core::error::{Result, TresorError};
use tresor_core::types::EncryptionAlgorithm;
use tresor_crypto::{EncryptedData, EncryptionService};

use crate::chain::ChainSnapshot;
use crate::storage::{LogQuery, LogStorageBackend, finish_query};

#[derive(Debug, Serialize, Deserialize)]
struct SealedRecord {
    #[serde(default)]
    timestamp: Value,
    encrypted: bool,
    algorithm: EncryptionAlgorithm,
    key_id: String,
    #[serde(with = "b64::option", default)]
    iv: Option<Vec<u8>>,
    #[serde(with = "b64::option", default)]
    tag: Option<Vec<u8>>,
    #[serde(with = "b64::bytes")]
    data: Vec<u8>,
}

/// Seals records through an [`EncryptionService`] before handing them to
/// the inner backend.
pub struct EncryptedLogStorage {
    inner: Arc<dyn LogStorageBackend>,
    service: EncryptionService,
    /// Sealed chain payloads by entry hash. Snapshots are rewritten whole on
    /// every flush; entries already sealed are not sealed again.
    sealed_chain: Mutex<HashMap<String, Value>>,
}

impl EncryptedLogStorage {
    pub fn new(inner: Arc<dyn LogStorageBackend>, service: EncryptionService) -> Self {
        Self {
            inner,
            service,
            sealed_chain: Mutex::new(HashMap::new()),
        }
    }

    fn sealed_chain(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.sealed_chain
            .lock()
            .map_err(|_| TresorError::lock_poisoned("sealed chain cache"))
    }

    fn seal(&self, entry: &Value) -> Result<Value> {
        let plaintext = serde_json::to_vec(entry)?;
        // Records can exceed an RSA block; stay symmetric.
        let algorithm = Some(self.service.default_algorithm())
            .filter(|a| a.is_symmetric())
            .unwrap_or(EncryptionAlgorithm::AesGcm);
        let encrypted = self.service.encrypt(&plaintext, Some(algorithm), None, None)?;
        let sealed = SealedRecord {
            timestamp: entry.get("timestamp").cloned().unwrap_or(Value::Null),
            encrypted: true,
            algorithm: encrypted.algorithm,
            key_id: encrypted.key_id,
            iv: encrypted.iv,
            tag: encrypted.tag,
            data: encrypted.ciphertext,
        };
        Ok(serde_json::to_value(sealed)?)
    }

    /// Plaintext records written before encryption was enabled pass through.
    fn open(&self, record: Value) -> Result<Value> {
        if record.get("encrypted").and_then(Value::as_bool) != Some(true) {
            return Ok(record);
        }
        let sealed: SealedRecord = serde_json::from_value(record)?;
        let data = EncryptedData {
            ciphertext: sealed.data,
            algorithm: sealed.algorithm,
            key_id: sealed.key_id,
            iv: sealed.iv,
            tag: sealed.tag,
            aad: None,
        };
        let plaintext = self.service.decrypt(&data, None)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl LogStorageBackend for EncryptedLogStorage {
    #[instrument(skip_all, fields(count = entries.len()))]
    fn store_log_entries(&self, entries: &[Value]) -> Result<()> {
        let sealed = entries
            .iter()
            .map(|entry| self.seal(entry))
            .collect::<Result<Vec<_>>>()?;
        self.inner.store_log_entries(&sealed)
    }

    fn retrieve_log_entries(&self, query: &LogQuery) -> Result<Vec<Value>> {
        let candidates = self.inner.retrieve_log_entries(&query.time_range_only())?;
        let mut matched = Vec::new();
        for record in candidates {
            match self.open(record) {
                Ok(record) if query.matches_fields(&record) => matched.push(record),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping audit record that failed to decrypt"),
            }
        }
        // Inner results are newest first already; finish_query expects
        // storage order.
        matched.reverse();
        Ok(finish_query(matched, query))
    }

    /// Fails if any sealed payload does not decrypt: a chain with holes
    /// cannot be verified.
    fn get_chain_entries(&self) -> Result<Option<ChainSnapshot>> {
        let Some(mut snapshot) = self.inner.get_chain_entries()? else {
            return Ok(None);
        };
        let mut cache = self.sealed_chain()?;
        for entry in &mut snapshot.entries {
            let sealed = std::mem::take(&mut entry.data);
            entry.data = self.open(sealed.clone())?;
            if sealed.get("encrypted").and_then(Value::as_bool) == Some(true) {
                cache.insert(entry.hash.clone(), sealed);
            }
        }
        Ok(Some(snapshot))
    }

    #[instrument(skip_all, fields(entries = snapshot.entries.len()))]
    fn store_chain_entries(&self, snapshot: &ChainSnapshot) -> Result<()> {
        let mut sealed = snapshot.clone();
        let mut cache = self.sealed_chain()?;
        for entry in &mut sealed.entries {
            let data = match cache.get(&entry.hash) {
                Some(data) => data.clone(),
                None => {
                    let data = self.seal(&entry.data)?;
                    cache.insert(entry.hash.clone(), data.clone());
                    data
                }
            };
            entry.data = data;
        }
        drop(cache);
        self.inner.store_chain_entries(&sealed)
    }
}
