// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// AES-GCM sealing and the process CSPRNG, both on top of `ring`.

use ring::aead::{AES_128_GCM, AES_256_GCM, Aad, Algorithm, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tresor_core::error::{Result, TresorError};
use zeroize::Zeroizing;

/// GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fill `buf` from the operating system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| TresorError::Encryption("system randomness unavailable".into()))
}

/// `len` fresh random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Fresh random key material, wiped on drop.
pub fn random_key(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    fill_random(&mut key)?;
    Ok(key)
}

/// A GCM key bound once and reused for many chunks.
pub struct GcmKey {
    key: LessSafeKey,
}

impl GcmKey {
    /// AES-256-GCM for 32-byte keys, AES-128-GCM for 16-byte keys.
    pub fn new(key: &[u8]) -> Result<Self> {
        let algorithm: &'static Algorithm = match key.len() {
            32 => &AES_256_GCM,
            16 => &AES_128_GCM,
            n => {
                return Err(TresorError::InvalidParameter(format!(
                    "AES-GCM key must be 16 or 32 bytes, got {n}"
                )));
            }
        };
        let unbound = UnboundKey::new(algorithm, key)
            .map_err(|_| TresorError::InvalidParameter("rejected AES-GCM key".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Encrypt `plaintext`; the 16-byte tag is appended to the output.
    pub fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = parse_nonce(nonce)?;
        let mut in_out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        in_out.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| TresorError::Encryption("AES-GCM seal failed".into()))?;
        Ok(in_out)
    }

    /// Decrypt and authenticate `ciphertext` (tag included). Nothing is
    /// returned unless the tag verifies.
    pub fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = parse_nonce(nonce)?;
        if ciphertext.len() < TAG_LEN {
            return Err(TresorError::AuthenticationFailure(
                "ciphertext shorter than the GCM tag".into(),
            ));
        }
        let mut in_out = ciphertext.to_vec();
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| TresorError::AuthenticationFailure("AES-GCM tag mismatch".into()))?
            .len();
        in_out.truncate(plain_len);
        Ok(in_out)
    }
}

/// One-shot seal with a fresh key schedule.
pub fn gcm_seal(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    GcmKey::new(key)?.seal(nonce, aad, plaintext)
}

/// One-shot open with a fresh key schedule.
pub fn gcm_open(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    GcmKey::new(key)?.open(nonce, aad, ciphertext)
}

fn parse_nonce(nonce: &[u8]) -> Result<Nonce> {
    Nonce::try_assume_unique_for_key(nonce).map_err(|_| {
        TresorError::InvalidParameter(format!(
            "AES-GCM nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        ))
    })
}
