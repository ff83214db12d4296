// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Digests for chain entries: plain SHA-2, or HMAC-SHA-2 when a secret is set.

use std::fmt;

use ring::hmac;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tresor_core::types::HashAlgorithm;

/// Hashes chain payloads with a fixed algorithm and optional HMAC key.
///
/// With a secret the chain is only verifiable by holders of that secret;
/// without one anybody can recompute every link.
#[derive(Clone)]
pub struct Digester {
    algorithm: HashAlgorithm,
    key: Option<hmac::Key>,
}

impl Digester {
    pub fn new(algorithm: HashAlgorithm, secret: Option<&[u8]>) -> Self {
        let key = secret.map(|secret| {
            let hmac_alg = match algorithm {
                HashAlgorithm::Sha256 => hmac::HMAC_SHA256,
                HashAlgorithm::Sha384 => hmac::HMAC_SHA384,
                HashAlgorithm::Sha512 => hmac::HMAC_SHA512,
            };
            hmac::Key::new(hmac_alg, secret)
        });
        Self { algorithm, key }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    /// Lowercase hex digest of `data`.
    pub fn digest(&self, data: &[u8]) -> String {
        if let Some(key) = &self.key {
            return hex::encode(hmac::sign(key, data).as_ref());
        }
        match self.algorithm {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester")
            .field("algorithm", &self.algorithm)
            .field("keyed", &self.is_keyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sha256_known_answers() {
        let digester = Digester::new(HashAlgorithm::Sha256, None);
        assert_eq!(
            digester.digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digester.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn plain_sha384_and_sha512_known_answers() {
        assert_eq!(
            Digester::new(HashAlgorithm::Sha384, None).digest(b"abc"),
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed\
             8086072ba1e7cc2358baeca134c825a7"
        );
        assert_eq!(
            Digester::new(HashAlgorithm::Sha512, None).digest(b"abc"),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn digest_lengths_follow_algorithm() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha384, HashAlgorithm::Sha512] {
            for secret in [None, Some(&b"k1"[..])] {
                let digest = Digester::new(algorithm, secret).digest(b"payload");
                assert_eq!(digest.len(), algorithm.hex_len(), "{algorithm} keyed={}", secret.is_some());
            }
        }
    }

    #[test]
    fn hmac_rfc4231_case_2() {
        let digester = Digester::new(HashAlgorithm::Sha256, Some(b"Jefe"));
        assert_eq!(
            digester.digest(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn keyed_differs_from_plain() {
        let plain = Digester::new(HashAlgorithm::Sha256, None);
        let keyed = Digester::new(HashAlgorithm::Sha256, Some(b"k1"));
        let other = Digester::new(HashAlgorithm::Sha256, Some(b"k2"));
        assert!(!plain.is_keyed());
        assert_ne!(plain.digest(b"x"), keyed.digest(b"x"));
        assert_ne!(keyed.digest(b"x"), other.digest(b"x"));
    }
}
