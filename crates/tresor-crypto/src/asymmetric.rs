// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RSA key store for OAEP (SHA-256) encryption.
//
// RSA key pairs live here and only here; the symmetric key manager never
// hands out material for the RSA path. Pairs are identified by a short
// fingerprint of the public key (hex of the first 8 bytes of SHA-256 over
// the SPKI DER).
//
// When backed by a directory:
//   <id>.pem      PKCS#8 private key, mode 0600
//   <id>.pub.pem  SPKI public key (imported public-only keys)
//   active        id of the active pair

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use tresor_core::config::TresorConfig;
use tresor_core::error::{Result, TresorError};
use tresor_core::fsutil::atomic_write;

/// Bytes of OAEP-SHA256 overhead: two digests plus two marker bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

const ACTIVE_FILE: &str = "active";

enum RsaEntry {
    Private(Box<RsaPrivateKey>),
    Public(RsaPublicKey),
}

impl RsaEntry {
    fn public_key(&self) -> RsaPublicKey {
        match self {
            Self::Private(key) => key.to_public_key(),
            Self::Public(key) => key.clone(),
        }
    }
}

#[derive(Default)]
struct RsaState {
    pairs: BTreeMap<String, RsaEntry>,
    active: Option<String>,
}

/// Asymmetric key material for the RSA-OAEP path.
pub struct RsaKeyStore {
    dir: Option<PathBuf>,
    bits: usize,
    state: Mutex<RsaState>,
}

impl RsaKeyStore {
    /// A store that forgets its keys when dropped.
    pub fn in_memory(bits: usize) -> Self {
        Self {
            dir: None,
            bits,
            state: Mutex::new(RsaState::default()),
        }
    }

    /// Load every key under `dir` (created if missing).
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, bits: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut state = RsaState::default();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = name.strip_suffix(".pub.pem") {
                let pem = std::fs::read_to_string(&path)?;
                let key = RsaPublicKey::from_public_key_pem(&pem).map_err(|e| {
                    TresorError::InvalidFormat(format!("{}: {e}", path.display()))
                })?;
                state.pairs.entry(id.to_owned()).or_insert(RsaEntry::Public(key));
            } else if let Some(id) = name.strip_suffix(".pem") {
                let pem = zeroize::Zeroizing::new(std::fs::read_to_string(&path)?);
                let key = RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| {
                    TresorError::InvalidFormat(format!("{}: {e}", path.display()))
                })?;
                state
                    .pairs
                    .insert(id.to_owned(), RsaEntry::Private(Box::new(key)));
            }
        }

        let active_path = dir.join(ACTIVE_FILE);
        if active_path.exists() {
            let id = std::fs::read_to_string(&active_path)?.trim().to_owned();
            if state.pairs.contains_key(&id) {
                state.active = Some(id);
            } else {
                warn!(key_id = %id, "active RSA key missing from store");
            }
        }

        debug!(keys = state.pairs.len(), "RSA key store loaded");
        Ok(Self {
            dir: Some(dir),
            bits,
            state: Mutex::new(state),
        })
    }

    /// Directory-backed when `encryption.rsa_key_dir` is set, in-memory otherwise.
    pub fn from_config(config: &TresorConfig) -> Result<Self> {
        match &config.encryption.rsa_key_dir {
            Some(dir) => Self::open(dir, config.encryption.rsa_key_bits),
            None => Ok(Self::in_memory(config.encryption.rsa_key_bits)),
        }
    }

    /// Generate a key pair and make it the active one.
    #[instrument(skip(self), fields(bits = self.bits))]
    pub fn generate(&self) -> Result<String> {
        let key = RsaPrivateKey::new(&mut OsRng, self.bits)
            .map_err(|e| TresorError::Encryption(format!("RSA key generation failed: {e}")))?;
        let id = fingerprint(&key.to_public_key())?;

        // Held across the writes so `active` on disk matches memory.
        let mut state = self.lock()?;
        if let Some(dir) = &self.dir {
            let pem = key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| TresorError::Encryption(format!("PKCS#8 encoding failed: {e}")))?;
            atomic_write(&dir.join(format!("{id}.pem")), pem.as_bytes(), true)?;
            atomic_write(&dir.join(ACTIVE_FILE), id.as_bytes(), false)?;
        }
        state.pairs.insert(id.clone(), RsaEntry::Private(Box::new(key)));
        state.active = Some(id.clone());
        info!(key_id = %id, "RSA key pair generated");
        Ok(id)
    }

    /// Add a public key (SPKI PEM) for encryption only.
    pub fn import_public_pem(&self, pem: &str) -> Result<String> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| TresorError::InvalidFormat(format!("public key PEM: {e}")))?;
        let id = fingerprint(&key)?;

        let mut state = self.lock()?;
        if state.pairs.contains_key(&id) {
            return Ok(id);
        }
        if let Some(dir) = &self.dir {
            atomic_write(&dir.join(format!("{id}.pub.pem")), pem.as_bytes(), false)?;
        }
        state.pairs.insert(id.clone(), RsaEntry::Public(key));
        debug!(key_id = %id, "RSA public key imported");
        Ok(id)
    }

    /// SPKI PEM of the public half of `id`.
    pub fn export_public_pem(&self, id: &str) -> Result<String> {
        let state = self.lock()?;
        let entry = state
            .pairs
            .get(id)
            .ok_or_else(|| TresorError::KeyNotFound(id.to_owned()))?;
        entry
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TresorError::Encryption(format!("SPKI encoding failed: {e}")))
    }

    pub fn active_id(&self) -> Result<Option<String>> {
        Ok(self.lock()?.active.clone())
    }

    pub fn key_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.pairs.keys().cloned().collect())
    }

    /// Largest plaintext `id` can encrypt in one OAEP block.
    pub fn max_plaintext_len(&self, id: &str) -> Result<usize> {
        let state = self.lock()?;
        let entry = state
            .pairs
            .get(id)
            .ok_or_else(|| TresorError::KeyNotFound(id.to_owned()))?;
        Ok(entry.public_key().size().saturating_sub(OAEP_OVERHEAD))
    }

    /// Encrypt with `id`, or with the active pair when `None`.
    pub fn encrypt(&self, id: Option<&str>, plaintext: &[u8]) -> Result<(String, Vec<u8>)> {
        let (id, public) = {
            let state = self.lock()?;
            let id = match id {
                Some(id) => id.to_owned(),
                None => state.active.clone().ok_or(TresorError::NoActiveKey)?,
            };
            let entry = state
                .pairs
                .get(&id)
                .ok_or_else(|| TresorError::KeyNotFound(id.clone()))?;
            (id, entry.public_key())
        };

        let limit = public.size().saturating_sub(OAEP_OVERHEAD);
        if plaintext.len() > limit {
            return Err(TresorError::InvalidParameter(format!(
                "RSA-OAEP plaintext limited to {limit} bytes, got {}",
                plaintext.len()
            )));
        }
        let ciphertext = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| TresorError::Encryption(format!("RSA-OAEP: {e}")))?;
        Ok((id, ciphertext))
    }

    /// Decrypt with the private half of `id`.
    pub fn decrypt(&self, id: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let state = self.lock()?;
        match state.pairs.get(id) {
            Some(RsaEntry::Private(key)) => key
                .decrypt(Oaep::new::<Sha256>(), ciphertext)
                .map_err(|_| TresorError::AuthenticationFailure("RSA-OAEP decryption failed".into())),
            Some(RsaEntry::Public(_)) => Err(TresorError::KeyNotFound(format!(
                "{id} (public key only)"
            ))),
            None => Err(TresorError::KeyNotFound(id.to_owned())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RsaState>> {
        self.state
            .lock()
            .map_err(|_| TresorError::lock_poisoned("RSA key store"))
    }
}

fn fingerprint(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| TresorError::Encryption(format!("SPKI encoding failed: {e}")))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small keys keep the suite fast; production defaults to 2048 bits.
    const TEST_BITS: usize = 1024;

    #[test]
    fn generate_encrypt_decrypt() {
        let store = RsaKeyStore::in_memory(TEST_BITS);
        let id = store.generate().unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(store.active_id().unwrap().as_deref(), Some(id.as_str()));

        let (used, ct) = store.encrypt(None, b"session key").unwrap();
        assert_eq!(used, id);
        assert_eq!(ct.len(), TEST_BITS / 8);
        assert_eq!(store.decrypt(&id, &ct).unwrap(), b"session key");
    }

    #[test]
    fn oversized_plaintext_rejected() {
        let store = RsaKeyStore::in_memory(TEST_BITS);
        let id = store.generate().unwrap();
        let limit = store.max_plaintext_len(&id).unwrap();
        assert_eq!(limit, TEST_BITS / 8 - OAEP_OVERHEAD);
        assert!(store.encrypt(Some(&id), &vec![0u8; limit]).is_ok());
        assert!(matches!(
            store.encrypt(Some(&id), &vec![0u8; limit + 1]),
            Err(TresorError::InvalidParameter(_))
        ));
    }

    #[test]
    fn public_only_import_cannot_decrypt() {
        let owner = RsaKeyStore::in_memory(TEST_BITS);
        let id = owner.generate().unwrap();
        let pem = owner.export_public_pem(&id).unwrap();

        let peer = RsaKeyStore::in_memory(TEST_BITS);
        let imported = peer.import_public_pem(&pem).unwrap();
        assert_eq!(imported, id);

        let (_, ct) = peer.encrypt(Some(&id), b"for the owner").unwrap();
        assert!(matches!(peer.decrypt(&id, &ct), Err(TresorError::KeyNotFound(_))));
        assert_eq!(owner.decrypt(&id, &ct).unwrap(), b"for the owner");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let store = RsaKeyStore::in_memory(TEST_BITS);
        let id = store.generate().unwrap();
        let (_, mut ct) = store.encrypt(None, b"x").unwrap();
        ct[10] ^= 0x01;
        assert!(store.decrypt(&id, &ct).unwrap_err().is_authentication_failure());
    }

    #[test]
    fn directory_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = RsaKeyStore::open(dir.path(), TEST_BITS).unwrap();
            store.generate().unwrap()
        };
        let store = RsaKeyStore::open(dir.path(), TEST_BITS).unwrap();
        assert_eq!(store.active_id().unwrap().as_deref(), Some(id.as_str()));
        let (_, ct) = store.encrypt(None, b"persisted").unwrap();
        assert_eq!(store.decrypt(&id, &ct).unwrap(), b"persisted");
    }

    #[test]
    fn concurrent_generate_keeps_active_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(RsaKeyStore::open(dir.path(), TEST_BITS).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.generate().unwrap())
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();

        let active = store.active_id().unwrap().unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join(ACTIVE_FILE)).unwrap();
        assert_eq!(on_disk, active);

        let reopened = RsaKeyStore::open(dir.path(), TEST_BITS).unwrap();
        assert_eq!(reopened.key_ids().unwrap(), ids);
        assert_eq!(reopened.active_id().unwrap(), Some(active));
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().contains(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn no_active_key() {
        let store = RsaKeyStore::in_memory(TEST_BITS);
        assert!(matches!(store.encrypt(None, b"x"), Err(TresorError::NoActiveKey)));
    }
}
