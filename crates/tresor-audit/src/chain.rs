// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hash chain: append-only, linked, individually hashed entries.
//
// Entry hash = Digest(canonical({data, prev_hash, sequence, timestamp}))
// where canonical JSON has keys sorted at every depth, no whitespace, and
// timestamps as RFC 3339 UTC with nanoseconds. The first entry links to the
// genesis hash, which is drawn once when the chain is created and travels
// with every export so a reloaded chain verifies against the same seed.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use tresor_core::error::Result;
use tresor_core::types::HashAlgorithm;

use crate::digest::Digester;

/// One link in the chain. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub sequence: u64,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

/// Outcome of walking a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    Valid,
    /// Stored hash differs from the recomputed digest.
    InvalidHash,
    /// `prev_hash` does not match the predecessor's hash.
    BrokenChain,
    /// Sequence numbers are not 1, 2, 3, ...
    InvalidSequence,
}

impl VerificationResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::InvalidHash => "invalid_hash",
            Self::BrokenChain => "broken_chain",
            Self::InvalidSequence => "invalid_sequence",
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification verdict plus the first sequence that failed, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub result: VerificationResult,
    pub first_invalid_sequence: Option<u64>,
}

impl ChainVerification {
    pub fn valid() -> Self {
        Self {
            result: VerificationResult::Valid,
            first_invalid_sequence: None,
        }
    }

    fn invalid(result: VerificationResult, sequence: u64) -> Self {
        Self {
            result,
            first_invalid_sequence: Some(sequence),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.result == VerificationResult::Valid
    }
}

impl fmt::Display for ChainVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_invalid_sequence {
            Some(sequence) => write!(f, "{} at sequence {sequence}", self.result),
            None => write!(f, "{}", self.result),
        }
    }
}

/// Everything needed to rebuild and re-verify a chain elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub genesis_hash: String,
    pub algorithm: HashAlgorithm,
    pub entries: Vec<ChainEntry>,
}

/// Link of a later entry inside a [`ChainProof`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sequence: u64,
    pub hash: String,
    pub prev_hash: String,
}

/// Forward-linkage proof: the target entry and every link after it, up to
/// the tip the proof was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainProof {
    pub entry: ChainEntry,
    pub subsequent: Vec<ProofStep>,
}

/// Append-only chain of hashed entries.
///
/// Not internally synchronised: shared users wrap it in a lock so that
/// `add_entry` calls are serialised.
#[derive(Debug)]
pub struct HashChain {
    digester: Digester,
    genesis_hash: String,
    entries: Vec<ChainEntry>,
    current_sequence: u64,
    latest_hash: String,
    rejected: Vec<ChainEntry>,
}

impl HashChain {
    /// New empty chain with a freshly drawn genesis hash.
    pub fn new(algorithm: HashAlgorithm, secret: Option<&[u8]>) -> Result<Self> {
        Self::with_digester(Digester::new(algorithm, secret))
    }

    pub fn with_digester(digester: Digester) -> Result<Self> {
        let nonce = tresor_crypto::aead::random_bytes(16)?;
        let mut seed = Map::new();
        seed.insert("nonce".into(), Value::String(hex::encode(nonce)));
        seed.insert("timestamp".into(), Value::String(format_timestamp(&Utc::now())));
        seed.insert("type".into(), Value::String("genesis".into()));
        let genesis_hash = digester.digest(canonical_json(&Value::Object(seed)).as_bytes());
        Ok(Self::with_genesis(digester, genesis_hash))
    }

    /// Empty chain seeded with a known genesis hash.
    pub fn with_genesis(digester: Digester, genesis_hash: String) -> Self {
        Self {
            digester,
            latest_hash: genesis_hash.clone(),
            genesis_hash,
            entries: Vec::new(),
            current_sequence: 0,
            rejected: Vec::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.digester.algorithm()
    }

    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    pub fn latest_hash(&self) -> &str {
        &self.latest_hash
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Entries held back by the last failed [`import_chain`](Self::import_chain).
    pub fn rejected_entries(&self) -> &[ChainEntry] {
        &self.rejected
    }

    /// Append `data` as the next entry and return a copy of it.
    pub fn add_entry(&mut self, data: Value) -> ChainEntry {
        let sequence = self.current_sequence + 1;
        let timestamp = Utc::now();
        let hash = self.entry_hash(sequence, &data, &timestamp, &self.latest_hash);
        let entry = ChainEntry {
            sequence,
            data,
            timestamp,
            prev_hash: std::mem::replace(&mut self.latest_hash, hash.clone()),
            hash,
        };
        self.current_sequence = sequence;
        self.entries.push(entry.clone());
        entry
    }

    /// Walk every entry from the stored genesis hash.
    pub fn verify_chain(&self) -> ChainVerification {
        self.verify_entries(&self.genesis_hash, &self.entries)
    }

    pub fn get_entry(&self, sequence: u64) -> Option<&ChainEntry> {
        // Sequences are dense from 1 in a valid chain.
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.entries
            .get(index)
            .filter(|e| e.sequence == sequence)
            .or_else(|| self.entries.iter().find(|e| e.sequence == sequence))
    }

    pub fn export_chain(&self) -> ChainSnapshot {
        ChainSnapshot {
            genesis_hash: self.genesis_hash.clone(),
            algorithm: self.algorithm(),
            entries: self.entries.clone(),
        }
    }

    /// Replace this chain's contents with `snapshot` if it verifies.
    ///
    /// Entries are sorted by sequence first. On any failure the working
    /// state is left untouched and the sorted entries are kept in
    /// [`rejected_entries`](Self::rejected_entries).
    pub fn import_chain(&mut self, snapshot: ChainSnapshot) -> ChainVerification {
        let ChainSnapshot {
            genesis_hash,
            algorithm,
            mut entries,
        } = snapshot;
        entries.sort_by_key(|e| e.sequence);

        let verification = if algorithm == self.algorithm() {
            self.verify_entries(&genesis_hash, &entries)
        } else {
            warn!(expected = %self.algorithm(), found = %algorithm, "chain algorithm mismatch");
            ChainVerification::invalid(
                VerificationResult::InvalidHash,
                entries.first().map_or(1, |e| e.sequence),
            )
        };

        if !verification.is_valid() {
            warn!(%verification, entries = entries.len(), "chain import rejected");
            self.rejected = entries;
            return verification;
        }

        self.current_sequence = entries.last().map_or(0, |e| e.sequence);
        self.latest_hash = entries
            .last()
            .map_or_else(|| genesis_hash.clone(), |e| e.hash.clone());
        self.genesis_hash = genesis_hash;
        self.entries = entries;
        self.rejected.clear();
        debug!(entries = self.entries.len(), "chain imported");
        verification
    }

    /// Proof that entry `sequence` still links forward to the current tip.
    pub fn get_proof(&self, sequence: u64) -> Option<ChainProof> {
        let entry = self.get_entry(sequence)?.clone();
        let subsequent = self
            .entries
            .iter()
            .filter(|e| e.sequence > sequence)
            .map(|e| ProofStep {
                sequence: e.sequence,
                hash: e.hash.clone(),
                prev_hash: e.prev_hash.clone(),
            })
            .collect();
        Some(ChainProof { entry, subsequent })
    }

    /// Check that `data` is the payload of the proof's entry, that the
    /// entry hash recomputes, and that the links run unbroken to this
    /// chain's current tip.
    pub fn verify_proof(&self, data: &Value, proof: &ChainProof) -> bool {
        let entry = &proof.entry;
        if entry.data != *data {
            return false;
        }
        let recomputed = self.entry_hash(entry.sequence, &entry.data, &entry.timestamp, &entry.prev_hash);
        if recomputed != entry.hash {
            return false;
        }

        let mut prev_hash = &entry.hash;
        let mut sequence = entry.sequence;
        for step in &proof.subsequent {
            if step.prev_hash != *prev_hash || Some(step.sequence) != sequence.checked_add(1) {
                return false;
            }
            prev_hash = &step.hash;
            sequence = step.sequence;
        }
        *prev_hash == self.latest_hash
    }

    fn verify_entries(&self, genesis_hash: &str, entries: &[ChainEntry]) -> ChainVerification {
        let mut prev_hash = genesis_hash;
        for (expected, entry) in (1u64..).zip(entries) {
            if entry.sequence != expected {
                return ChainVerification::invalid(VerificationResult::InvalidSequence, entry.sequence);
            }
            if entry.prev_hash != prev_hash {
                return ChainVerification::invalid(VerificationResult::BrokenChain, entry.sequence);
            }
            let computed = self.entry_hash(entry.sequence, &entry.data, &entry.timestamp, &entry.prev_hash);
            if computed != entry.hash {
                return ChainVerification::invalid(VerificationResult::InvalidHash, entry.sequence);
            }
            prev_hash = &entry.hash;
        }
        ChainVerification::valid()
    }

    fn entry_hash(&self, sequence: u64, data: &Value, timestamp: &DateTime<Utc>, prev_hash: &str) -> String {
        // Keys written in sorted order.
        let mut out = String::from("{\"data\":");
        write_canonical(data, &mut out);
        out.push_str(",\"prev_hash\":");
        out.push_str(&Value::from(prev_hash).to_string());
        out.push_str(",\"sequence\":");
        out.push_str(&sequence.to_string());
        out.push_str(",\"timestamp\":");
        out.push_str(&Value::String(format_timestamp(timestamp)).to_string());
        out.push('}');
        self.digester.digest(out.as_bytes())
    }
}

/// RFC 3339, UTC, nanosecond precision.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
