//! Symmetric stream transport: AES-256-CBC with a raw IV prefix.
//!
//! Wire layout: 16 raw IV bytes, then ciphertext in cipher blocks with
//! PKCS#7 padding on the final block. Encryption and decryption proceed in
//! fixed-size chunks with bounded memory, and re-encryption pipes a
//! decryptor into an encryptor in a single pass so plaintext is never
//! materialized.
//!
//! None of the stream functions close the output writer: callers keep
//! writing to the same transport afterwards (further container entries, a
//! live connection).

use std::io::{Read, Write};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{Block, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;
use crate::keys::FileKey;

/// Length of the initialization vector written ahead of the ciphertext.
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;
const CHUNK_LEN: usize = 8192;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Incremental CBC encryptor holding at most one partial block.
struct StreamEncryptor {
    enc: Option<Aes256CbcEnc>,
    carry: Vec<u8>,
}

impl StreamEncryptor {
    fn new(key: &FileKey) -> (Self, [u8; IV_LEN]) {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).expect("getrandom failed");
        let enc = Aes256CbcEnc::new(key.as_bytes().into(), (&iv).into());
        (
            Self {
                enc: Some(enc),
                carry: Vec::with_capacity(BLOCK_LEN),
            },
            iv,
        )
    }

    /// Absorb plaintext, returning the ciphertext for all completed blocks.
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(data);
        let full = self.carry.len() - self.carry.len() % BLOCK_LEN;
        let mut out: Vec<u8> = self.carry.drain(..full).collect();
        let enc = self.enc.as_mut().expect("encryptor already finished");
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            enc.encrypt_block_mut(Block::<Aes256CbcEnc>::from_mut_slice(chunk));
        }
        out
    }

    /// Pad and encrypt the final block.
    fn finish(mut self) -> Result<Vec<u8>, CryptoError> {
        let enc = self.enc.take().expect("encryptor already finished");
        let msg_len = self.carry.len();
        let mut buf = [0u8; BLOCK_LEN];
        buf[..msg_len].copy_from_slice(&self.carry);
        let ct = enc
            .encrypt_padded_mut::<Pkcs7>(&mut buf, msg_len)
            .map_err(|_| CryptoError::Cipher("padding failed".into()))?;
        Ok(ct.to_vec())
    }
}

/// Incremental CBC decryptor holding back the final block for unpadding.
struct StreamDecryptor {
    dec: Option<Aes256CbcDec>,
    carry: Vec<u8>,
}

impl StreamDecryptor {
    fn new(key: &FileKey, iv: &[u8; IV_LEN]) -> Self {
        Self {
            dec: Some(Aes256CbcDec::new(key.as_bytes().into(), iv.into())),
            carry: Vec::with_capacity(CHUNK_LEN + BLOCK_LEN),
        }
    }

    /// Absorb ciphertext, returning plaintext for all blocks that cannot be
    /// the final (padded) one.
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(data);
        if self.carry.len() <= BLOCK_LEN {
            return Vec::new();
        }
        // Hold back one full block plus any trailing partial bytes.
        let keep = BLOCK_LEN + self.carry.len() % BLOCK_LEN;
        let take = self.carry.len() - keep;
        let mut out: Vec<u8> = self.carry.drain(..take).collect();
        let dec = self.dec.as_mut().expect("decryptor already finished");
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            dec.decrypt_block_mut(Block::<Aes256CbcDec>::from_mut_slice(chunk));
        }
        out
    }

    /// Decrypt the held-back final block and strip padding.
    fn finish(mut self) -> Result<Vec<u8>, CryptoError> {
        let dec = self.dec.take().expect("decryptor already finished");
        if self.carry.len() != BLOCK_LEN {
            return Err(CryptoError::Cipher(format!(
                "ciphertext length invalid: {} trailing bytes",
                self.carry.len()
            )));
        }
        let mut buf = [0u8; BLOCK_LEN];
        buf.copy_from_slice(&self.carry);
        let pt = dec
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| CryptoError::Cipher("bad padding (wrong key or corrupt data)".into()))?;
        Ok(pt.to_vec())
    }
}

/// Encrypt `reader` into `writer` under `key`.
///
/// Writes a fresh random IV first, then the ciphertext. The writer is
/// flushed but never closed.
pub fn encrypt_stream(
    key: &FileKey,
    reader: &mut impl Read,
    writer: &mut impl Write,
) -> Result<(), CryptoError> {
    let (mut enc, iv) = StreamEncryptor::new(key);
    writer.write_all(&iv)?;

    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&enc.update(&buf[..n]))?;
    }
    writer.write_all(&enc.finish()?)?;
    writer.flush()?;
    Ok(())
}

/// Decrypt `reader` into `writer` under `key`.
///
/// Reads the 16-byte IV, then decrypts until the input exhausts.
pub fn decrypt_stream(
    key: &FileKey,
    reader: &mut impl Read,
    writer: &mut impl Write,
) -> Result<(), CryptoError> {
    let mut iv = [0u8; IV_LEN];
    reader.read_exact(&mut iv)?;
    let mut dec = StreamDecryptor::new(key, &iv);

    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&dec.update(&buf[..n]))?;
    }
    writer.write_all(&dec.finish()?)?;
    writer.flush()?;
    Ok(())
}

/// Decrypt under `key1` and re-encrypt under `key2` in one streaming pass.
///
/// Writes `key2`'s fresh IV before the re-encrypted body. Used by a trusted
/// intermediary to re-target a payload encrypted to itself without ever
/// persisting the plaintext; memory use is bounded by the chunk size.
pub fn reencrypt_stream(
    key1: &FileKey,
    key2: &FileKey,
    reader: &mut impl Read,
    writer: &mut impl Write,
) -> Result<(), CryptoError> {
    let mut iv1 = [0u8; IV_LEN];
    reader.read_exact(&mut iv1)?;
    let mut dec = StreamDecryptor::new(key1, &iv1);
    let (mut enc, iv2) = StreamEncryptor::new(key2);
    writer.write_all(&iv2)?;

    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let plaintext = dec.update(&buf[..n]);
        writer.write_all(&enc.update(&plaintext))?;
    }
    let tail = dec.finish()?;
    writer.write_all(&enc.update(&tail))?;
    writer.write_all(&enc.finish()?)?;
    writer.flush()?;
    Ok(())
}

/// Encrypt an in-memory payload, returning `IV || ciphertext`.
pub fn encrypt_bytes(key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(IV_LEN + plaintext.len() + BLOCK_LEN);
    encrypt_stream(key, &mut std::io::Cursor::new(plaintext), &mut out)?;
    Ok(out)
}

/// Decrypt an in-memory `IV || ciphertext` payload.
pub fn decrypt_bytes(key: &FileKey, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(payload.len());
    decrypt_stream(key, &mut std::io::Cursor::new(payload), &mut out)?;
    Ok(out)
}
