// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encryption service: algorithm dispatch over AES-GCM, AES-CBC+HMAC and
// RSA-OAEP, plus envelope encryption with per-call data keys.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use tresor_core::b64;
use tresor_core::config::TresorConfig;
use tresor_core::error::{Result, TresorError};
use tresor_core::types::EncryptionAlgorithm;
use zeroize::Zeroizing;

use crate::aead::{self, NONCE_LEN};
use crate::asymmetric::RsaKeyStore;
use crate::cbc_hmac::{self, BLOCK_LEN};
use crate::keys::{KEY_LEN, KeyManager, KeyManagerOptions};

/// Output of [`EncryptionService::encrypt`], everything needed to decrypt
/// apart from the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "b64::bytes")]
    pub ciphertext: Vec<u8>,
    pub algorithm: EncryptionAlgorithm,
    /// Symmetric key id, or RSA key fingerprint.
    pub key_id: String,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<Vec<u8>>,
    /// HMAC tag (AES-CBC only; GCM carries its tag inside `ciphertext`).
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub aad: Option<Vec<u8>>,
}

/// A payload sealed under a one-off data key, with the data key wrapped
/// under the key manager's active key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub algorithm: EncryptionAlgorithm,
    /// Id of the key-encryption key.
    pub key_id: String,
    #[serde(with = "b64::bytes")]
    pub encrypted_dek: Vec<u8>,
    #[serde(with = "b64::bytes")]
    pub dek_iv: Vec<u8>,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub dek_tag: Option<Vec<u8>>,
    #[serde(with = "b64::bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "b64::bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
}

/// Stateless front end over the key stores. Cheap to clone and share.
#[derive(Clone)]
pub struct EncryptionService {
    default_algorithm: EncryptionAlgorithm,
    keys: Arc<KeyManager>,
    rsa: Option<Arc<RsaKeyStore>>,
    pub(crate) chunk_size: usize,
}

impl EncryptionService {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self {
            default_algorithm: EncryptionAlgorithm::AesGcm,
            keys,
            rsa: None,
            chunk_size: 64 * 1024,
        }
    }

    /// Open the key manager and RSA store named in `config`.
    pub fn from_config(config: &TresorConfig) -> Result<Self> {
        let keys = Arc::new(KeyManager::open(KeyManagerOptions::from_config(config))?);
        let rsa = Arc::new(RsaKeyStore::from_config(config)?);
        Ok(Self::new(keys)
            .with_algorithm(config.encryption.default_algorithm)
            .with_rsa(rsa)
            .with_chunk_size(config.encryption.file_chunk_size))
    }

    pub fn with_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    pub fn with_rsa(mut self, rsa: Arc<RsaKeyStore>) -> Self {
        self.rsa = Some(rsa);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn default_algorithm(&self) -> EncryptionAlgorithm {
        self.default_algorithm
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn rsa_keys(&self) -> Result<&Arc<RsaKeyStore>> {
        self.rsa
            .as_ref()
            .ok_or_else(|| TresorError::UnsupportedAlgorithm("rsa (no RSA key store configured)".into()))
    }

    /// Encrypt `data` with `algorithm` (service default when `None`) under
    /// `key_id` (active key when `None`).
    ///
    /// `aad` is authenticated but not encrypted; only AES-GCM supports it.
    #[instrument(skip_all, fields(len = data.len(), ?algorithm))]
    pub fn encrypt(
        &self,
        data: &[u8],
        algorithm: Option<EncryptionAlgorithm>,
        aad: Option<&[u8]>,
        key_id: Option<&str>,
    ) -> Result<EncryptedData> {
        let algorithm = algorithm.unwrap_or(self.default_algorithm);
        if aad.is_some() && algorithm != EncryptionAlgorithm::AesGcm {
            return Err(TresorError::InvalidParameter(format!(
                "{algorithm} does not authenticate associated data"
            )));
        }

        let encrypted = match algorithm {
            EncryptionAlgorithm::AesGcm => {
                let (key_id, key) = self.keys.get_key(key_id)?;
                let iv = aead::random_bytes(NONCE_LEN)?;
                let ciphertext = aead::gcm_seal(&key, &iv, aad.unwrap_or_default(), data)?;
                EncryptedData {
                    ciphertext,
                    algorithm,
                    key_id,
                    iv: Some(iv),
                    tag: None,
                    aad: aad.map(<[u8]>::to_vec),
                }
            }
            EncryptionAlgorithm::AesCbc => {
                let (key_id, key) = self.keys.get_key(key_id)?;
                let iv = aead::random_bytes(BLOCK_LEN)?;
                let (ciphertext, tag) = cbc_hmac::encrypt(&key, &iv, data)?;
                EncryptedData {
                    ciphertext,
                    algorithm,
                    key_id,
                    iv: Some(iv),
                    tag: Some(tag),
                    aad: None,
                }
            }
            EncryptionAlgorithm::Rsa => {
                let (key_id, ciphertext) = self.rsa_keys()?.encrypt(key_id, data)?;
                EncryptedData {
                    ciphertext,
                    algorithm,
                    key_id,
                    iv: None,
                    tag: None,
                    aad: None,
                }
            }
        };
        debug!(key_id = %encrypted.key_id, "encrypted");
        Ok(encrypted)
    }

    /// UTF-8 convenience wrapper around [`encrypt`](Self::encrypt).
    pub fn encrypt_str(&self, text: &str) -> Result<EncryptedData> {
        self.encrypt(text.as_bytes(), None, None, None)
    }

    /// Inverse of [`encrypt`](Self::encrypt). `aad` overrides the value
    /// recorded in `data`. Fails closed: no plaintext is returned unless the
    /// tag verifies.
    #[instrument(skip_all, fields(algorithm = %data.algorithm, key_id = %data.key_id))]
    pub fn decrypt(&self, data: &EncryptedData, aad: Option<&[u8]>) -> Result<Vec<u8>> {
        match data.algorithm {
            EncryptionAlgorithm::AesGcm => {
                let iv = data.iv.as_deref().ok_or(TresorError::MissingParameter("iv"))?;
                let aad = aad.or(data.aad.as_deref()).unwrap_or_default();
                let (_, key) = self.keys.get_key(Some(&data.key_id))?;
                aead::gcm_open(&key, iv, aad, &data.ciphertext)
            }
            EncryptionAlgorithm::AesCbc => {
                let iv = data.iv.as_deref().ok_or(TresorError::MissingParameter("iv"))?;
                let tag = data.tag.as_deref().ok_or(TresorError::MissingParameter("tag"))?;
                if aad.is_some() || data.aad.is_some() {
                    return Err(TresorError::InvalidParameter(
                        "aes-cbc does not authenticate associated data".into(),
                    ));
                }
                let (_, key) = self.keys.get_key(Some(&data.key_id))?;
                cbc_hmac::decrypt(&key, iv, &data.ciphertext, tag)
            }
            EncryptionAlgorithm::Rsa => self.rsa_keys()?.decrypt(&data.key_id, &data.ciphertext),
        }
    }

    /// Seal `data` under a fresh 32-byte data key, then wrap the data key
    /// under the active key.
    #[instrument(skip_all, fields(len = data.len(), ?algorithm))]
    pub fn encrypt_envelope(
        &self,
        data: &[u8],
        algorithm: Option<EncryptionAlgorithm>,
    ) -> Result<Envelope> {
        let algorithm = algorithm.unwrap_or(self.default_algorithm);
        check_envelope_algorithm(algorithm)?;

        let dek = aead::random_key(KEY_LEN)?;
        let (iv, ciphertext, tag) = seal_symmetric(algorithm, &dek, data)?;
        let (key_id, kek) = self.keys.get_key(None)?;
        let (dek_iv, encrypted_dek, dek_tag) = seal_symmetric(algorithm, &kek, &dek)?;

        debug!(%key_id, "envelope sealed");
        Ok(Envelope {
            algorithm,
            key_id,
            encrypted_dek,
            dek_iv,
            dek_tag,
            iv,
            ciphertext,
            tag,
        })
    }

    /// Unwrap the data key with the key-encryption key named in the
    /// envelope, then open the payload.
    #[instrument(skip_all, fields(algorithm = %envelope.algorithm, key_id = %envelope.key_id))]
    pub fn decrypt_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        check_envelope_algorithm(envelope.algorithm)?;
        let (_, kek) = self.keys.get_key(Some(&envelope.key_id))?;
        let dek = Zeroizing::new(open_symmetric(
            envelope.algorithm,
            &kek,
            &envelope.dek_iv,
            &envelope.encrypted_dek,
            envelope.dek_tag.as_deref(),
        )?);
        open_symmetric(
            envelope.algorithm,
            &dek,
            &envelope.iv,
            &envelope.ciphertext,
            envelope.tag.as_deref(),
        )
    }

    /// Wrap a data key for a file header. Returns `(key_id, wrapped, iv, tag)`.
    pub(crate) fn wrap_dek(
        &self,
        algorithm: EncryptionAlgorithm,
        dek: &[u8],
    ) -> Result<(String, Vec<u8>, Vec<u8>, Option<Vec<u8>>)> {
        let (key_id, kek) = self.keys.get_key(None)?;
        let (iv, wrapped, tag) = seal_symmetric(algorithm, &kek, dek)?;
        Ok((key_id, wrapped, iv, tag))
    }

    pub(crate) fn unwrap_dek(
        &self,
        algorithm: EncryptionAlgorithm,
        key_id: &str,
        wrapped: &[u8],
        iv: &[u8],
        tag: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let (_, kek) = self.keys.get_key(Some(key_id))?;
        open_symmetric(algorithm, &kek, iv, wrapped, tag).map(Zeroizing::new)
    }
}

fn check_envelope_algorithm(algorithm: EncryptionAlgorithm) -> Result<()> {
    if algorithm.is_symmetric() {
        Ok(())
    } else {
        Err(TresorError::UnsupportedAlgorithm(format!(
            "{algorithm} cannot be used for envelope encryption"
        )))
    }
}

/// Returns `(iv, ciphertext, tag)`; `tag` is only set for CBC.
fn seal_symmetric(
    algorithm: EncryptionAlgorithm,
    key: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Option<Vec<u8>>)> {
    match algorithm {
        EncryptionAlgorithm::AesGcm => {
            let iv = aead::random_bytes(NONCE_LEN)?;
            let ciphertext = aead::gcm_seal(key, &iv, &[], plaintext)?;
            Ok((iv, ciphertext, None))
        }
        EncryptionAlgorithm::AesCbc => {
            let iv = aead::random_bytes(BLOCK_LEN)?;
            let (ciphertext, tag) = cbc_hmac::encrypt(key, &iv, plaintext)?;
            Ok((iv, ciphertext, Some(tag)))
        }
        EncryptionAlgorithm::Rsa => Err(TresorError::UnsupportedAlgorithm("rsa".into())),
    }
}

fn open_symmetric(
    algorithm: EncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match algorithm {
        EncryptionAlgorithm::AesGcm => aead::gcm_open(key, iv, &[], ciphertext),
        EncryptionAlgorithm::AesCbc => {
            let tag = tag.ok_or(TresorError::MissingParameter("tag"))?;
            cbc_hmac::decrypt(key, iv, ciphertext, tag)
        }
        EncryptionAlgorithm::Rsa => Err(TresorError::UnsupportedAlgorithm("rsa".into())),
    }
}
