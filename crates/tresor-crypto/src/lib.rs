// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tresor-crypto: key management and authenticated encryption.
//
// Symmetric keys live in a store sealed under a PBKDF2-derived master key
// (`keys`). `service` dispatches over AES-GCM, AES-CBC with HMAC-SHA256 and
// RSA-OAEP, and adds envelope encryption; `file` streams whole files through
// the same primitives in bounded chunks.

pub mod aead;
pub mod asymmetric;
pub mod cbc_hmac;
pub mod file;
pub mod keys;
pub mod service;

pub use asymmetric::RsaKeyStore;
pub use file::{FileEncryptionOptions, FileHeader};
pub use keys::{KeyManager, KeyManagerOptions, KeyMetadata};
pub use service::{EncryptedData, EncryptionService, Envelope};
