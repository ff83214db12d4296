// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// AES-CBC with an HMAC-SHA256 tag over IV || ciphertext (encrypt-then-MAC).
//
// The supplied key is split in halves: the first half keys AES, the second
// half keys the HMAC. A 32-byte key gives AES-128 with a 16-byte MAC key, a
// 64-byte key gives AES-256 with a 32-byte MAC key.

use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::hmac;
use subtle::ConstantTimeEq;
use tresor_core::error::{Result, TresorError};
use zeroize::Zeroizing;

/// AES block and CBC IV length.
pub const BLOCK_LEN: usize = 16;

/// HMAC-SHA256 output length.
pub const TAG_LEN: usize = 32;

/// Encryption and MAC halves of a CBC key.
pub struct CbcHmacKey {
    enc: Zeroizing<Vec<u8>>,
    mac: hmac::Key,
}

impl CbcHmacKey {
    pub fn split(key: &[u8]) -> Result<Self> {
        if key.len() != 32 && key.len() != 64 {
            return Err(TresorError::InvalidParameter(format!(
                "AES-CBC key must be 32 or 64 bytes, got {}",
                key.len()
            )));
        }
        let (enc, mac) = key.split_at(key.len() / 2);
        Ok(Self {
            enc: Zeroizing::new(enc.to_vec()),
            mac: hmac::Key::new(hmac::HMAC_SHA256, mac),
        })
    }

    /// Start a MAC over `iv`; feed it the ciphertext afterwards.
    pub fn mac_context(&self, iv: &[u8]) -> hmac::Context {
        let mut ctx = hmac::Context::with_key(&self.mac);
        ctx.update(iv);
        ctx
    }
}

/// Constant-time comparison of a finished MAC against a stored tag.
pub fn verify_tag(ctx: hmac::Context, tag: &[u8]) -> Result<()> {
    let computed = ctx.sign();
    if bool::from(computed.as_ref().ct_eq(tag)) {
        Ok(())
    } else {
        Err(TresorError::AuthenticationFailure("HMAC tag mismatch".into()))
    }
}

enum BlockEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>),
}

enum BlockDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() == BLOCK_LEN {
        Ok(())
    } else {
        Err(TresorError::InvalidParameter(format!(
            "AES-CBC IV must be {BLOCK_LEN} bytes, got {}",
            iv.len()
        )))
    }
}

fn invalid_key(_: cbc::cipher::InvalidLength) -> TresorError {
    TresorError::InvalidParameter("rejected AES-CBC key/IV length".into())
}

impl BlockEncryptor {
    fn new(key: &CbcHmacKey, iv: &[u8]) -> Result<Self> {
        check_iv(iv)?;
        Ok(match key.enc.len() {
            16 => Self::Aes128(cbc::Encryptor::new_from_slices(&key.enc, iv).map_err(invalid_key)?),
            _ => Self::Aes256(cbc::Encryptor::new_from_slices(&key.enc, iv).map_err(invalid_key)?),
        })
    }

    /// Encrypt whole blocks in place. `buf.len()` must be block aligned.
    fn encrypt_blocks(&mut self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(c) => c.encrypt_block_mut(block),
                Self::Aes256(c) => c.encrypt_block_mut(block),
            }
        }
    }

    /// PKCS#7-pad and encrypt the final partial block (always emits one block).
    fn finish(self, tail: &[u8]) -> Vec<u8> {
        match self {
            Self::Aes128(c) => c.encrypt_padded_vec_mut::<Pkcs7>(tail),
            Self::Aes256(c) => c.encrypt_padded_vec_mut::<Pkcs7>(tail),
        }
    }
}

impl BlockDecryptor {
    fn new(key: &CbcHmacKey, iv: &[u8]) -> Result<Self> {
        check_iv(iv)?;
        Ok(match key.enc.len() {
            16 => Self::Aes128(cbc::Decryptor::new_from_slices(&key.enc, iv).map_err(invalid_key)?),
            _ => Self::Aes256(cbc::Decryptor::new_from_slices(&key.enc, iv).map_err(invalid_key)?),
        })
    }

    fn decrypt_blocks(&mut self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(c) => c.decrypt_block_mut(block),
                Self::Aes256(c) => c.decrypt_block_mut(block),
            }
        }
    }

    fn finish(self, last: &[u8]) -> Result<Vec<u8>> {
        let unpadded = match self {
            Self::Aes128(c) => c.decrypt_padded_vec_mut::<Pkcs7>(last),
            Self::Aes256(c) => c.decrypt_padded_vec_mut::<Pkcs7>(last),
        };
        unpadded.map_err(|_| TresorError::Decryption("invalid PKCS#7 padding".into()))
    }
}

/// Incremental CBC encryption that also accumulates the tag.
pub struct CbcStreamEncryptor {
    cipher: BlockEncryptor,
    mac: hmac::Context,
    carry: Vec<u8>,
}

impl CbcStreamEncryptor {
    pub fn new(key: &CbcHmacKey, iv: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: BlockEncryptor::new(key, iv)?,
            mac: key.mac_context(iv),
            carry: Vec::with_capacity(BLOCK_LEN),
        })
    }

    /// Encrypt as many whole blocks as are available; the remainder waits
    /// for the next call.
    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(data);
        let aligned = self.carry.len() - self.carry.len() % BLOCK_LEN;
        let mut out: Vec<u8> = self.carry.drain(..aligned).collect();
        self.cipher.encrypt_blocks(&mut out);
        self.mac.update(&out);
        out
    }

    /// Pad and encrypt the tail. Returns `(last_ciphertext, tag)`.
    pub fn finish(mut self) -> (Vec<u8>, Vec<u8>) {
        let last = self.cipher.finish(&self.carry);
        self.mac.update(&last);
        let tag = self.mac.sign().as_ref().to_vec();
        (last, tag)
    }
}

/// Incremental CBC decryption. Holds back the final block until
/// [`finish`](Self::finish) so the padding can be stripped.
///
/// Does not check the tag: callers verify it over the whole ciphertext first.
pub struct CbcStreamDecryptor {
    cipher: BlockDecryptor,
    held: Vec<u8>,
}

impl CbcStreamDecryptor {
    pub fn new(key: &CbcHmacKey, iv: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: BlockDecryptor::new(key, iv)?,
            held: Vec::with_capacity(2 * BLOCK_LEN),
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.held.extend_from_slice(data);
        if self.held.len() <= BLOCK_LEN {
            return Vec::new();
        }
        let ready = (self.held.len() - 1) / BLOCK_LEN * BLOCK_LEN;
        let mut out: Vec<u8> = self.held.drain(..ready).collect();
        self.cipher.decrypt_blocks(&mut out);
        out
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if self.held.len() != BLOCK_LEN {
            return Err(TresorError::Decryption(
                "ciphertext is not a whole number of blocks".into(),
            ));
        }
        self.cipher.finish(&self.held)
    }
}

/// One-shot encryption. Returns `(ciphertext, tag)`.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = CbcHmacKey::split(key)?;
    let mut stream = CbcStreamEncryptor::new(&key, iv)?;
    let mut ciphertext = stream.update(plaintext);
    let (last, tag) = stream.finish();
    ciphertext.extend_from_slice(&last);
    Ok((ciphertext, tag))
}

/// One-shot decryption. The tag is verified before any block is decrypted.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    let key = CbcHmacKey::split(key)?;
    check_iv(iv)?;
    let mut mac = key.mac_context(iv);
    mac.update(ciphertext);
    verify_tag(mac, tag)?;

    let mut stream = CbcStreamDecryptor::new(&key, iv)?;
    let mut plaintext = stream.update(ciphertext);
    plaintext.extend_from_slice(&stream.finish()?);
    Ok(plaintext)
}
