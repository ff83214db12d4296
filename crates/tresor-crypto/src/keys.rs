// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Symmetric key manager: a master key on disk, and an AES-GCM encrypted key
// store whose sealing key is derived from it with PBKDF2-HMAC-SHA256.
//
// On-disk layout:
//   master.key  raw 32 bytes, mode 0600
//   keys.json   {"salt": base64, "data": base64(nonce || ciphertext || tag)}
//
// The decrypted store is held in memory behind a mutex. Structural changes
// (generate, rotate, delete) are written through immediately and undone in
// memory if the write fails; use-count bumps are written back every
// `persist_every_uses` calls, on `flush()` and on drop.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use tresor_core::b64;
use tresor_core::config::{RotationSettings, TresorConfig};
use tresor_core::error::{Result, TresorError};
use tresor_core::fsutil::atomic_write;
use tresor_core::types::KeyType;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::aead::{self, GcmKey, NONCE_LEN};

/// Length of the master key and of every generated key.
pub const KEY_LEN: usize = 32;

/// PBKDF2 salt length for the store-sealing key.
pub const SALT_LEN: usize = 16;

/// Construction parameters for a [`KeyManager`].
#[derive(Debug, Clone)]
pub struct KeyManagerOptions {
    pub master_key_path: PathBuf,
    pub key_store_path: PathBuf,
    pub rotation: RotationSettings,
    pub kdf_iterations: u32,
    pub persist_every_uses: u32,
}

impl KeyManagerOptions {
    /// `master.key` and `keys.json` inside `dir`, default policy.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let defaults = tresor_core::config::KeyConfig::default();
        Self {
            master_key_path: dir.join("master.key"),
            key_store_path: dir.join("keys.json"),
            rotation: defaults.rotation,
            kdf_iterations: defaults.kdf_iterations,
            persist_every_uses: defaults.persist_every_uses,
        }
    }

    pub fn from_config(config: &TresorConfig) -> Self {
        Self {
            master_key_path: config.master_key_path(),
            key_store_path: config.key_store_path(),
            rotation: config.keys.rotation,
            kdf_iterations: config.keys.kdf_iterations,
            persist_every_uses: config.keys.persist_every_uses,
        }
    }

    pub fn with_rotation(mut self, rotation: RotationSettings) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn with_persist_every_uses(mut self, uses: u32) -> Self {
        self.persist_every_uses = uses;
        self
    }
}

/// A stored key. Deliberately not `Debug`: it holds raw key material.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    #[serde(with = "b64::secret")]
    key: Zeroizing<Vec<u8>>,
    #[serde(rename = "type")]
    key_type: KeyType,
    created_at: DateTime<Utc>,
    use_count: u64,
    rotated: bool,
}

#[derive(Serialize, Deserialize, Default)]
struct KeyStore {
    keys: BTreeMap<String, KeyRecord>,
    active_key_id: Option<String>,
}

/// Envelope written to `keys.json`.
#[derive(Serialize, Deserialize)]
struct SealedStore {
    #[serde(with = "b64::bytes")]
    salt: Vec<u8>,
    #[serde(with = "b64::bytes")]
    data: Vec<u8>,
}

/// Public view of a key, without the key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub created_at: DateTime<Utc>,
    pub use_count: u64,
    pub rotated: bool,
    pub is_active: bool,
}

struct KeyState {
    store: KeyStore,
    unsaved_uses: u32,
}

/// A structural change applied in memory but not yet on disk.
enum Change {
    Generated(String),
    Rotated {
        new_id: String,
        previous: Option<String>,
        previous_rotated: bool,
    },
    Deleted(String, KeyRecord),
}

impl Change {
    fn undo(self, store: &mut KeyStore) {
        match self {
            Self::Generated(id) => {
                store.keys.remove(&id);
            }
            Self::Rotated {
                new_id,
                previous,
                previous_rotated,
            } => {
                store.keys.remove(&new_id);
                if let Some(old) = previous.as_ref().and_then(|id| store.keys.get_mut(id)) {
                    old.rotated = previous_rotated;
                }
                store.active_key_id = previous;
            }
            Self::Deleted(id, record) => {
                store.keys.insert(id, record);
            }
        }
    }
}

/// Owner of all symmetric key material.
///
/// Safe to share between threads (`Arc<KeyManager>`): every operation takes
/// the store lock for its whole read-modify-write.
pub struct KeyManager {
    store_path: PathBuf,
    rotation: RotationSettings,
    persist_every_uses: u32,
    salt: Vec<u8>,
    sealing_key: GcmKey,
    state: Mutex<KeyState>,
}

impl KeyManager {
    /// Open the key store described by `options`, creating the master key
    /// and an initial active key on first use.
    ///
    /// A store that exists but cannot be decrypted or parsed is reported as
    /// [`TresorError::KeyStoreCorrupt`]; it is never replaced silently.
    #[instrument(skip_all, fields(store = %options.key_store_path.display()))]
    pub fn open(options: KeyManagerOptions) -> Result<Self> {
        let iterations = NonZeroU32::new(options.kdf_iterations)
            .ok_or_else(|| TresorError::Config("kdf_iterations must be non-zero".into()))?;
        let master = load_or_create_master_key(&options.master_key_path)?;

        let existing = if options.key_store_path.exists() {
            Some(read_sealed_store(&options.key_store_path)?)
        } else {
            None
        };
        let salt = match &existing {
            Some(sealed) => sealed.salt.clone(),
            None => aead::random_bytes(SALT_LEN)?,
        };
        let sealing_key = derive_sealing_key(&master, &salt, iterations)?;

        let store = match &existing {
            Some(sealed) => unseal_store(&sealing_key, &sealed.data)?,
            None => KeyStore::default(),
        };
        let fresh = existing.is_none();

        let manager = Self {
            store_path: options.key_store_path,
            rotation: options.rotation,
            persist_every_uses: options.persist_every_uses.max(1),
            salt,
            sealing_key,
            state: Mutex::new(KeyState {
                store,
                unsaved_uses: 0,
            }),
        };

        if fresh {
            let mut state = manager.lock()?;
            let id = insert_new_key(&mut state.store, KeyType::Data)?;
            state.store.active_key_id = Some(id.clone());
            manager.persist(&mut state)?;
            info!(key_id = %id, "key store initialised");
        } else {
            let state = manager.lock()?;
            debug!(keys = state.store.keys.len(), "key store loaded");
        }
        Ok(manager)
    }

    /// Generate and persist a new key. The active key is unchanged.
    #[instrument(skip(self))]
    pub fn generate_key(&self, key_type: KeyType) -> Result<String> {
        let mut state = self.lock()?;
        let id = insert_new_key(&mut state.store, key_type)?;
        self.commit(&mut state, Change::Generated(id.clone()))?;
        debug!(key_id = %id, "key generated");
        Ok(id)
    }

    /// Key material for `key_id`, or for the active key when `None`.
    ///
    /// Every call counts as one use. Under a usage-based or hybrid policy,
    /// the use that brings the active key to `max_uses` rotates it; the
    /// returned material is still the key that was asked for.
    pub fn get_key(&self, key_id: Option<&str>) -> Result<(String, Zeroizing<Vec<u8>>)> {
        let mut state = self.lock()?;
        let active = state.store.active_key_id.clone();
        let id = match key_id {
            Some(id) => id.to_owned(),
            None => active.clone().ok_or(TresorError::NoActiveKey)?,
        };

        let record = state
            .store
            .keys
            .get_mut(&id)
            .ok_or_else(|| TresorError::KeyNotFound(id.clone()))?;
        record.use_count += 1;
        let material = record.key.clone();
        let exhausted = self.rotation.policy.checks_usage()
            && record.use_count >= self.rotation.max_uses
            && active.as_deref() == Some(id.as_str());
        state.unsaved_uses += 1;

        if exhausted {
            let change = rotate_locked(&mut state.store)?;
            let new_id = self.commit(&mut state, change)?;
            info!(old_key = %id, new_key = %new_id, "usage limit reached, key rotated");
        } else if state.unsaved_uses >= self.persist_every_uses {
            self.persist(&mut state)?;
        }
        Ok((id, material))
    }

    /// Replace the active key with a freshly generated one.
    ///
    /// The previous key is flagged `rotated` and stays available by id.
    #[instrument(skip(self))]
    pub fn rotate_key(&self) -> Result<String> {
        let mut state = self.lock()?;
        let change = rotate_locked(&mut state.store)?;
        let new_id = self.commit(&mut state, change)?;
        info!(key_id = %new_id, "key rotated");
        Ok(new_id)
    }

    /// Whether the rotation policy calls for a new active key now.
    pub fn check_rotation_needed(&self) -> Result<bool> {
        let state = self.lock()?;
        Ok(self.rotation_due(&state.store))
    }

    /// Rotate if the policy says so. Returns the new key id when rotated.
    pub fn rotate_if_needed(&self) -> Result<Option<String>> {
        let mut state = self.lock()?;
        if !self.rotation_due(&state.store) {
            return Ok(None);
        }
        let change = rotate_locked(&mut state.store)?;
        let new_id = self.commit(&mut state, change)?;
        info!(key_id = %new_id, "rotation policy triggered");
        Ok(Some(new_id))
    }

    /// Remove a key. Returns `false`, leaving the store untouched, when the
    /// key is active or unknown.
    #[instrument(skip(self))]
    pub fn delete_key(&self, key_id: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state.store.active_key_id.as_deref() == Some(key_id) {
            warn!("refusing to delete the active key");
            return Ok(false);
        }
        let Some(record) = state.store.keys.remove(key_id) else {
            return Ok(false);
        };
        self.commit(&mut state, Change::Deleted(key_id.to_owned(), record))?;
        debug!("key deleted");
        Ok(true)
    }

    pub fn get_key_metadata(&self, key_id: &str) -> Result<KeyMetadata> {
        let state = self.lock()?;
        let record = state
            .store
            .keys
            .get(key_id)
            .ok_or_else(|| TresorError::KeyNotFound(key_id.to_owned()))?;
        Ok(metadata(key_id, record, state.store.active_key_id.as_deref()))
    }

    /// Metadata for every key, ordered by id.
    pub fn list_keys(&self) -> Result<Vec<KeyMetadata>> {
        let state = self.lock()?;
        let active = state.store.active_key_id.as_deref();
        Ok(state
            .store
            .keys
            .iter()
            .map(|(id, record)| metadata(id, record, active))
            .collect())
    }

    pub fn active_key_id(&self) -> Result<Option<String>> {
        Ok(self.lock()?.store.active_key_id.clone())
    }

    /// Write back any pending use-count changes.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.unsaved_uses > 0 {
            self.persist(&mut state)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, KeyState>> {
        self.state
            .lock()
            .map_err(|_| TresorError::lock_poisoned("key store"))
    }

    fn rotation_due(&self, store: &KeyStore) -> bool {
        let policy = self.rotation.policy;
        if !policy.checks_age() && !policy.checks_usage() {
            return false;
        }
        let Some(record) = store
            .active_key_id
            .as_ref()
            .and_then(|id| store.keys.get(id))
        else {
            // No usable active key at all.
            return true;
        };
        if policy.checks_age() {
            let age_days = (Utc::now() - record.created_at).num_days();
            if age_days >= i64::from(self.rotation.max_age_days) {
                return true;
            }
        }
        policy.checks_usage() && record.use_count >= self.rotation.max_uses
    }

    /// Persist `change`, undoing it in memory when the write fails so the
    /// store never runs ahead of `keys.json`. Returns the affected key id.
    fn commit(&self, state: &mut KeyState, change: Change) -> Result<String> {
        if let Err(e) = self.persist(state) {
            warn!(error = %e, "key store write failed, change rolled back");
            change.undo(&mut state.store);
            return Err(e);
        }
        Ok(match change {
            Change::Generated(id) | Change::Deleted(id, _) => id,
            Change::Rotated { new_id, .. } => new_id,
        })
    }

    fn persist(&self, state: &mut KeyState) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(&state.store)?);
        let nonce = aead::random_bytes(NONCE_LEN)?;
        let sealed = self.sealing_key.seal(&nonce, &[], &plaintext)?;

        let mut data = nonce;
        data.extend_from_slice(&sealed);
        let doc = SealedStore {
            salt: self.salt.clone(),
            data,
        };
        atomic_write(&self.store_path, &serde_json::to_vec_pretty(&doc)?, true)?;
        state.unsaved_uses = 0;
        debug!(keys = state.store.keys.len(), "key store persisted");
        Ok(())
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to persist key use counts on shutdown");
        }
    }
}

fn metadata(id: &str, record: &KeyRecord, active: Option<&str>) -> KeyMetadata {
    KeyMetadata {
        id: id.to_owned(),
        key_type: record.key_type,
        created_at: record.created_at,
        use_count: record.use_count,
        rotated: record.rotated,
        is_active: active == Some(id),
    }
}

fn insert_new_key(store: &mut KeyStore, key_type: KeyType) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    store.keys.insert(
        id.clone(),
        KeyRecord {
            key: aead::random_key(KEY_LEN)?,
            key_type,
            created_at: Utc::now(),
            use_count: 0,
            rotated: false,
        },
    );
    Ok(id)
}

fn rotate_locked(store: &mut KeyStore) -> Result<Change> {
    let new_id = insert_new_key(store, KeyType::Data)?;
    let previous = store.active_key_id.take();
    let mut previous_rotated = false;
    if let Some(old) = previous.as_ref().and_then(|id| store.keys.get_mut(id)) {
        previous_rotated = old.rotated;
        old.rotated = true;
    }
    store.active_key_id = Some(new_id.clone());
    Ok(Change::Rotated {
        new_id,
        previous,
        previous_rotated,
    })
}

fn load_or_create_master_key(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    if path.exists() {
        let key = Zeroizing::new(std::fs::read(path)?);
        if key.len() != KEY_LEN {
            return Err(TresorError::KeyStoreCorrupt(format!(
                "master key at {} is {} bytes, expected {KEY_LEN}",
                path.display(),
                key.len()
            )));
        }
        return Ok(key);
    }
    let key = aead::random_key(KEY_LEN)?;
    atomic_write(path, &key, true)?;
    info!(path = %path.display(), "master key generated");
    Ok(key)
}

fn derive_sealing_key(master: &[u8], salt: &[u8], iterations: NonZeroU32) -> Result<GcmKey> {
    let mut derived = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        master,
        &mut derived[..],
    );
    GcmKey::new(&derived[..])
}

fn read_sealed_store(path: &Path) -> Result<SealedStore> {
    let raw = std::fs::read(path)?;
    let sealed: SealedStore = serde_json::from_slice(&raw)
        .map_err(|e| TresorError::KeyStoreCorrupt(format!("{}: {e}", path.display())))?;
    if sealed.salt.is_empty() || sealed.data.len() < NONCE_LEN {
        return Err(TresorError::KeyStoreCorrupt(format!(
            "{}: truncated store",
            path.display()
        )));
    }
    Ok(sealed)
}

fn unseal_store(key: &GcmKey, data: &[u8]) -> Result<KeyStore> {
    let (nonce, sealed) = data.split_at(NONCE_LEN);
    let plaintext = Zeroizing::new(
        key.open(nonce, &[], sealed)
            .map_err(|_| TresorError::KeyStoreCorrupt("store does not decrypt under the master key".into()))?,
    );
    serde_json::from_slice(&plaintext)
        .map_err(|e| TresorError::KeyStoreCorrupt(format!("store contents: {e}")))
}
