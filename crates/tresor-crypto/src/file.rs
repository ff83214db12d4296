// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chunked file encryption.
//
// Layout:
//   [u32 BE header length][UTF-8 JSON FileHeader][body]
//
// AES-GCM body, one frame per chunk:
//   [u32 BE sealed length][u32 BE chunk index][ciphertext || tag]
// Chunk i is sealed with nonce iv[0..8] || u32_be(i) and associated data
// [1] for the last chunk, [0] otherwise. Every file has exactly one last
// chunk (an empty input gives one empty chunk), so truncation, reordering
// and splicing all fail authentication.
//
// AES-CBC body:
//   [ciphertext of the whole file, PKCS#7 on the last block][HMAC tag]
// The tag covers IV || ciphertext and is checked before anything is
// decrypted.
//
// Output is written to `<output>.partial` and renamed into place only once
// the whole body has been processed; the partial file is removed on error.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use tresor_core::b64;
use tresor_core::error::{Result, TresorError};
use tresor_core::fsutil::{create_file, sibling_with_suffix};
use tresor_core::types::EncryptionAlgorithm;

use crate::aead::{self, GcmKey, NONCE_LEN, TAG_LEN as GCM_TAG_LEN};
use crate::cbc_hmac::{
    self, BLOCK_LEN, CbcHmacKey, CbcStreamDecryptor, CbcStreamEncryptor, TAG_LEN as CBC_TAG_LEN,
};
use crate::keys::KEY_LEN;
use crate::service::EncryptionService;

/// Upper bound on the JSON header.
const MAX_HEADER_LEN: usize = 1 << 20;

/// Upper bound on the plaintext chunk size.
pub const MAX_CHUNK_SIZE: usize = 64 << 20;

/// Metadata block at the front of every encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub algorithm: EncryptionAlgorithm,
    pub envelope: bool,
    /// Key-encryption key when `envelope`, otherwise the data key itself.
    pub key_id: String,
    #[serde(with = "b64::bytes")]
    pub iv: Vec<u8>,
    pub chunk_size: usize,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_dek: Option<Vec<u8>>,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub dek_iv: Option<Vec<u8>>,
    #[serde(with = "b64::option", default, skip_serializing_if = "Option::is_none")]
    pub dek_tag: Option<Vec<u8>>,
    /// Length of the trailing HMAC tag (CBC only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_length: Option<usize>,
}

/// Knobs for [`EncryptionService::encrypt_file`].
#[derive(Debug, Clone, Copy)]
pub struct FileEncryptionOptions {
    /// Service default when `None`.
    pub algorithm: Option<EncryptionAlgorithm>,
    /// Seal the body under a one-off data key wrapped by the active key.
    pub envelope: bool,
    /// Service default when `None`.
    pub chunk_size: Option<usize>,
}

impl Default for FileEncryptionOptions {
    fn default() -> Self {
        Self {
            algorithm: None,
            envelope: true,
            chunk_size: None,
        }
    }
}

impl EncryptionService {
    /// Encrypt `input` into `output`, streaming in bounded chunks.
    #[instrument(skip_all, fields(input = %input.as_ref().display(), output = %output.as_ref().display()))]
    pub fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &FileEncryptionOptions,
    ) -> Result<FileHeader> {
        let algorithm = options.algorithm.unwrap_or(self.default_algorithm());
        if !algorithm.is_symmetric() {
            return Err(TresorError::UnsupportedAlgorithm(format!(
                "{algorithm} cannot be used for file encryption"
            )));
        }
        let chunk_size = options.chunk_size.unwrap_or(self.chunk_size);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(TresorError::InvalidParameter(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE} bytes"
            )));
        }

        let mut reader = BufReader::new(File::open(input.as_ref())?);

        let (key_id, key, wrapped) = if options.envelope {
            let dek = aead::random_key(KEY_LEN)?;
            let (kek_id, encrypted_dek, dek_iv, dek_tag) = self.wrap_dek(algorithm, &dek)?;
            (kek_id, dek, Some((encrypted_dek, dek_iv, dek_tag)))
        } else {
            let (id, key) = self.key_manager().get_key(None)?;
            (id, key, None)
        };

        let iv = match algorithm {
            EncryptionAlgorithm::AesGcm => aead::random_bytes(NONCE_LEN)?,
            _ => aead::random_bytes(BLOCK_LEN)?,
        };
        let (encrypted_dek, dek_iv, dek_tag) = match wrapped {
            Some((dek, iv, tag)) => (Some(dek), Some(iv), tag),
            None => (None, None, None),
        };
        let header = FileHeader {
            algorithm,
            envelope: options.envelope,
            key_id,
            iv,
            chunk_size,
            encrypted_dek,
            dek_iv,
            dek_tag,
            tag_length: (algorithm == EncryptionAlgorithm::AesCbc).then_some(CBC_TAG_LEN),
        };

        write_via_partial(output.as_ref(), |writer| {
            write_header(writer, &header)?;
            match algorithm {
                EncryptionAlgorithm::AesGcm => {
                    write_gcm_body(&mut reader, writer, &key, &header.iv, chunk_size)
                }
                _ => write_cbc_body(&mut reader, writer, &key, &header.iv, chunk_size),
            }
        })?;

        debug!(key_id = %header.key_id, envelope = header.envelope, "file encrypted");
        Ok(header)
    }

    /// Decrypt a file produced by [`encrypt_file`](Self::encrypt_file).
    ///
    /// `output` only appears once every chunk (GCM) or the whole-file tag
    /// (CBC) has been authenticated.
    #[instrument(skip_all, fields(input = %input.as_ref().display(), output = %output.as_ref().display()))]
    pub fn decrypt_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<FileHeader> {
        let file = File::open(input.as_ref())?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let (header, body_start) = read_header(&mut reader)?;

        if !header.algorithm.is_symmetric() {
            return Err(TresorError::UnsupportedAlgorithm(header.algorithm.to_string()));
        }
        if header.chunk_size == 0 || header.chunk_size > MAX_CHUNK_SIZE {
            return Err(TresorError::InvalidFormat("chunk size out of range".into()));
        }

        let key = if header.envelope {
            let wrapped = header
                .encrypted_dek
                .as_deref()
                .ok_or(TresorError::MissingParameter("encrypted_dek"))?;
            let dek_iv = header
                .dek_iv
                .as_deref()
                .ok_or(TresorError::MissingParameter("dek_iv"))?;
            self.unwrap_dek(
                header.algorithm,
                &header.key_id,
                wrapped,
                dek_iv,
                header.dek_tag.as_deref(),
            )?
        } else {
            self.key_manager().get_key(Some(&header.key_id))?.1
        };

        match header.algorithm {
            EncryptionAlgorithm::AesGcm => {
                if header.iv.len() != NONCE_LEN {
                    return Err(TresorError::InvalidFormat("GCM file IV must be 12 bytes".into()));
                }
                write_via_partial(output.as_ref(), |writer| {
                    read_gcm_body(&mut reader, writer, &key, &header)
                })?;
            }
            _ => {
                let tag_len = header.tag_length.unwrap_or(CBC_TAG_LEN);
                if tag_len != CBC_TAG_LEN {
                    return Err(TresorError::InvalidFormat(format!(
                        "unsupported tag length {tag_len}"
                    )));
                }
                let body_len = file_len
                    .checked_sub(body_start + tag_len as u64)
                    .filter(|len| *len > 0 && len % BLOCK_LEN as u64 == 0)
                    .ok_or_else(|| TresorError::InvalidFormat("CBC body truncated or misaligned".into()))?;

                let cbc_key = CbcHmacKey::split(&key)?;
                verify_cbc_body(&mut reader, &cbc_key, &header.iv, body_len, tag_len)?;
                reader.seek(SeekFrom::Start(body_start))?;
                write_via_partial(output.as_ref(), |writer| {
                    decrypt_cbc_body(&mut reader, writer, &cbc_key, &header.iv, body_len)
                })?;
            }
        }

        debug!(key_id = %header.key_id, "file decrypted");
        Ok(header)
    }
}

/// Run `body` against `<output>.partial`, then rename it over `output`.
fn write_via_partial<T>(
    output: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> Result<T>,
) -> Result<T> {
    let partial = sibling_with_suffix(output, "partial");
    let result = (|| -> Result<T> {
        let mut writer = BufWriter::new(create_file(&partial, false)?);
        let value = body(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&partial, output)?;
        Ok(value)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_header(writer: &mut impl Write, header: &FileHeader) -> Result<()> {
    let json = serde_json::to_vec(header)?;
    let len = u32::try_from(json.len())
        .map_err(|_| TresorError::InvalidParameter("file header too large".into()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&json)?;
    Ok(())
}

/// Parse the header; returns it with the offset where the body starts.
fn read_header(reader: &mut impl Read) -> Result<(FileHeader, u64)> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|_| TresorError::InvalidFormat("missing file header".into()))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_HEADER_LEN {
        return Err(TresorError::InvalidFormat(format!("header length {len} out of range")));
    }
    let mut json = vec![0u8; len];
    reader
        .read_exact(&mut json)
        .map_err(|_| TresorError::InvalidFormat("truncated file header".into()))?;
    let header = serde_json::from_slice(&json)
        .map_err(|e| TresorError::InvalidFormat(format!("file header: {e}")))?;
    Ok((header, 4 + len as u64))
}

/// Read up to `size` bytes, short only at end of input.
fn read_chunk(reader: &mut impl Read, size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size);
    reader.by_ref().take(size as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn chunk_nonce(iv: &[u8], index: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&iv[..8]);
    nonce[8..].copy_from_slice(&index.to_be_bytes());
    nonce
}

fn next_index(index: u32) -> Result<u32> {
    index
        .checked_add(1)
        .ok_or_else(|| TresorError::InvalidParameter("file exceeds the chunk counter".into()))
}

fn write_gcm_body(
    reader: &mut impl Read,
    writer: &mut impl Write,
    key: &[u8],
    iv: &[u8],
    chunk_size: usize,
) -> Result<()> {
    let gcm = GcmKey::new(key)?;
    let mut index = 0u32;
    let mut current = read_chunk(reader, chunk_size)?;
    loop {
        // Read ahead one chunk to learn whether `current` is the last.
        let next = if current.len() < chunk_size {
            Vec::new()
        } else {
            read_chunk(reader, chunk_size)?
        };
        let is_final = next.is_empty();

        let sealed = gcm.seal(&chunk_nonce(iv, index), &[u8::from(is_final)], &current)?;
        let len = u32::try_from(sealed.len())
            .map_err(|_| TresorError::InvalidParameter("chunk too large".into()))?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&index.to_be_bytes())?;
        writer.write_all(&sealed)?;

        if is_final {
            return Ok(());
        }
        current = next;
        index = next_index(index)?;
    }
}

/// Fill `buf` completely. `Ok(false)` on a clean end of input.
fn read_frame_prefix(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        _ => Err(TresorError::InvalidFormat("truncated chunk frame".into())),
    }
}

fn read_gcm_body(
    reader: &mut BufReader<File>,
    writer: &mut impl Write,
    key: &[u8],
    header: &FileHeader,
) -> Result<()> {
    use std::io::BufRead;

    let gcm = GcmKey::new(key)?;
    let max_sealed = header.chunk_size + GCM_TAG_LEN;
    let mut index = 0u32;
    loop {
        let mut prefix = [0u8; 8];
        if !read_frame_prefix(reader, &mut prefix)? {
            return Err(TresorError::AuthenticationFailure(
                "encrypted file ends without a final chunk".into(),
            ));
        }
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let counter = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        if counter != index {
            return Err(TresorError::AuthenticationFailure(format!(
                "chunk {counter} found where chunk {index} was expected"
            )));
        }
        if !(GCM_TAG_LEN..=max_sealed).contains(&len) {
            return Err(TresorError::InvalidFormat(format!("chunk length {len} out of range")));
        }

        let mut sealed = vec![0u8; len];
        reader
            .read_exact(&mut sealed)
            .map_err(|_| TresorError::InvalidFormat("truncated chunk".into()))?;
        let is_final = reader.fill_buf()?.is_empty();

        let plain = gcm.open(&chunk_nonce(&header.iv, index), &[u8::from(is_final)], &sealed)?;
        writer.write_all(&plain)?;

        if is_final {
            return Ok(());
        }
        index = next_index(index)?;
    }
}

fn write_cbc_body(
    reader: &mut impl Read,
    writer: &mut impl Write,
    key: &[u8],
    iv: &[u8],
    chunk_size: usize,
) -> Result<()> {
    let key = CbcHmacKey::split(key)?;
    let mut stream = CbcStreamEncryptor::new(&key, iv)?;
    loop {
        let chunk = read_chunk(reader, chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        writer.write_all(&stream.update(&chunk))?;
    }
    let (last, tag) = stream.finish();
    writer.write_all(&last)?;
    writer.write_all(&tag)?;
    Ok(())
}

/// First pass: MAC the body and compare against the trailing tag.
fn verify_cbc_body(
    reader: &mut impl Read,
    key: &CbcHmacKey,
    iv: &[u8],
    body_len: u64,
    tag_len: usize,
) -> Result<()> {
    let mut mac = key.mac_context(iv);
    let mut remaining = body_len;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        reader
            .read_exact(&mut buf[..want])
            .map_err(|_| TresorError::InvalidFormat("truncated CBC body".into()))?;
        mac.update(&buf[..want]);
        remaining -= want as u64;
    }
    let mut tag = vec![0u8; tag_len];
    reader
        .read_exact(&mut tag)
        .map_err(|_| TresorError::InvalidFormat("missing CBC tag".into()))?;
    cbc_hmac::verify_tag(mac, &tag)
}

/// Second pass: decrypt the already-authenticated body.
fn decrypt_cbc_body(
    reader: &mut impl Read,
    writer: &mut impl Write,
    key: &CbcHmacKey,
    iv: &[u8],
    body_len: u64,
) -> Result<()> {
    let mut stream = CbcStreamDecryptor::new(key, iv)?;
    let mut remaining = body_len;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want])?;
        writer.write_all(&stream.update(&buf[..want]))?;
        remaining -= want as u64;
    }
    writer.write_all(&stream.finish()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::service;

    const CS: usize = 64;

    fn options(algorithm: EncryptionAlgorithm, envelope: bool) -> FileEncryptionOptions {
        FileEncryptionOptions {
            algorithm: Some(algorithm),
            envelope,
            chunk_size: Some(CS),
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn header_len(path: &Path) -> usize {
        let raw = fs::read(path).unwrap();
        4 + u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
    }

    #[test]
    fn roundtrip_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        for algorithm in [EncryptionAlgorithm::AesGcm, EncryptionAlgorithm::AesCbc] {
            for envelope in [true, false] {
                for len in [0, 1, CS - 1, CS, CS + 1, 3 * CS + 17] {
                    let plain = dir.path().join("plain.bin");
                    let sealed = dir.path().join("sealed.bin");
                    let back = dir.path().join("back.bin");
                    let data = sample(len);
                    fs::write(&plain, &data).unwrap();

                    let header = svc
                        .encrypt_file(&plain, &sealed, &options(algorithm, envelope))
                        .unwrap();
                    assert_eq!(header.envelope, envelope);
                    assert!(!header.key_id.is_empty());

                    svc.decrypt_file(&sealed, &back).unwrap();
                    assert_eq!(fs::read(&back).unwrap(), data, "{algorithm} env={envelope} len={len}");
                }
            }
        }
    }

    #[test]
    fn header_records_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        let sealed = dir.path().join("s");
        fs::write(&plain, b"abc").unwrap();

        let header = svc
            .encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesCbc, true))
            .unwrap();
        assert_eq!(header.tag_length, Some(CBC_TAG_LEN));
        assert!(header.dek_tag.is_some());
        assert_eq!(header.iv.len(), BLOCK_LEN);

        let raw = fs::read(&sealed).unwrap();
        let (parsed, _) = read_header(&mut raw.as_slice()).unwrap();
        assert_eq!(parsed, header);

        let header = svc
            .encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesGcm, false))
            .unwrap();
        assert!(header.encrypted_dek.is_none());
        assert_eq!(Some(header.key_id), svc.key_manager().active_key_id().unwrap());
    }

    #[test]
    fn empty_input_has_one_final_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("empty");
        let sealed = dir.path().join("sealed");
        fs::write(&plain, b"").unwrap();
        svc.encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesGcm, false))
            .unwrap();
        let body = fs::read(&sealed).unwrap().len() - header_len(&sealed);
        assert_eq!(body, 8 + GCM_TAG_LEN);
    }

    #[test]
    fn gcm_truncation_detected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        let sealed = dir.path().join("s");
        let back = dir.path().join("b");
        fs::write(&plain, sample(3 * CS)).unwrap();
        svc.encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesGcm, true))
            .unwrap();

        // Drop the final frame; the new last frame was sealed as non-final.
        let raw = fs::read(&sealed).unwrap();
        let frame = 8 + CS + GCM_TAG_LEN;
        fs::write(&sealed, &raw[..raw.len() - frame]).unwrap();

        let err = svc.decrypt_file(&sealed, &back).unwrap_err();
        assert!(err.is_authentication_failure(), "{err}");
        assert!(!back.exists());
        assert!(!sibling_with_suffix(&back, "partial").exists());
    }

    #[test]
    fn gcm_reordering_detected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        let sealed = dir.path().join("s");
        let back = dir.path().join("b");
        fs::write(&plain, sample(3 * CS)).unwrap();
        svc.encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesGcm, true))
            .unwrap();

        let mut raw = fs::read(&sealed).unwrap();
        let start = header_len(&sealed);
        let frame = 8 + CS + GCM_TAG_LEN;
        let first: Vec<u8> = raw[start..start + frame].to_vec();
        let second: Vec<u8> = raw[start + frame..start + 2 * frame].to_vec();
        raw[start..start + frame].copy_from_slice(&second);
        raw[start + frame..start + 2 * frame].copy_from_slice(&first);
        fs::write(&sealed, &raw).unwrap();

        assert!(svc.decrypt_file(&sealed, &back).is_err());
        assert!(!back.exists());
    }

    #[test]
    fn body_bit_flip_detected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        for algorithm in [EncryptionAlgorithm::AesGcm, EncryptionAlgorithm::AesCbc] {
            let plain = dir.path().join("p");
            let sealed = dir.path().join("s");
            let back = dir.path().join("b");
            fs::write(&plain, sample(2 * CS + 5)).unwrap();
            svc.encrypt_file(&plain, &sealed, &options(algorithm, false))
                .unwrap();

            let mut raw = fs::read(&sealed).unwrap();
            let target = header_len(&sealed) + 20;
            raw[target] ^= 0x04;
            fs::write(&sealed, &raw).unwrap();

            let err = svc.decrypt_file(&sealed, &back).unwrap_err();
            assert!(err.is_authentication_failure(), "{algorithm}: {err}");
            assert!(!back.exists());
        }
    }

    #[test]
    fn cbc_tag_flip_detected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        let sealed = dir.path().join("s");
        let back = dir.path().join("b");
        fs::write(&plain, sample(100)).unwrap();
        svc.encrypt_file(&plain, &sealed, &options(EncryptionAlgorithm::AesCbc, true))
            .unwrap();

        let mut raw = fs::read(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x80;
        fs::write(&sealed, &raw).unwrap();
        assert!(svc.decrypt_file(&sealed, &back).unwrap_err().is_authentication_failure());
    }

    #[test]
    fn garbage_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let sealed = dir.path().join("s");
        let back = dir.path().join("b");

        fs::write(&sealed, b"\x00\x00\x00\x05{nope").unwrap();
        assert!(matches!(svc.decrypt_file(&sealed, &back), Err(TresorError::InvalidFormat(_))));

        fs::write(&sealed, b"\xff\xff\xff\xff").unwrap();
        assert!(matches!(svc.decrypt_file(&sealed, &back), Err(TresorError::InvalidFormat(_))));
    }

    #[test]
    fn rsa_rejected_for_files() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        fs::write(&plain, b"x").unwrap();
        let err = svc
            .encrypt_file(&plain, dir.path().join("s"), &options(EncryptionAlgorithm::Rsa, false))
            .unwrap_err();
        assert!(matches!(err, TresorError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn decrypt_after_kek_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("keys"));
        let plain = dir.path().join("p");
        let sealed = dir.path().join("s");
        let back = dir.path().join("b");
        fs::write(&plain, sample(500)).unwrap();
        svc.encrypt_file(&plain, &sealed, &FileEncryptionOptions::default())
            .unwrap();
        svc.key_manager().rotate_key().unwrap();
        svc.decrypt_file(&sealed, &back).unwrap();
        assert_eq!(fs::read(&back).unwrap(), sample(500));
    }
}
