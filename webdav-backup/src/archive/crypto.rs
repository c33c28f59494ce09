//! Streaming passphrase encryption.
//!
//! Output layout:
//!
//! | field        | size | notes                         |
//! |--------------|------|-------------------------------|
//! | magic        | 8    | `WDBKENC1`                    |
//! | log_n        | 1    | scrypt cost                   |
//! | r            | 4    | scrypt block size, big endian |
//! | p            | 4    | scrypt parallelism, big endian|
//! | salt         | 16   | random                        |
//! | nonce prefix | 7    | random                        |
//! | chunks       | ...  | AES-256-GCM STREAM (BE32)     |
//!
//! Every chunk except the last carries exactly [`CHUNK_SIZE`] bytes of
//! plaintext plus a 16-byte tag. The last chunk is sealed with the
//! end-of-stream flag, so truncated ciphertext fails to decrypt.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::stream::EncryptorBE32;
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use zeroize::Zeroizing;

use crate::utils::errors::{BackupError, Result};

pub const MAGIC: &[u8; 8] = b"WDBKENC1";
pub const CHUNK_SIZE: usize = 64 * 1024;
pub const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 16;
pub const NONCE_PREFIX_SIZE: usize = 7;
pub const HEADER_SIZE: usize = MAGIC.len() + 1 + 4 + 4 + SALT_SIZE + NONCE_PREFIX_SIZE;

/// scrypt cost parameters stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

/// Highest accepted cost. scrypt needs `128 * r * 2^log_n` bytes, 4 GiB here.
pub const MAX_LOG_N: u8 = 22;

impl KdfParams {
    pub fn with_log_n(log_n: u8) -> Self {
        Self { log_n, r: 8, p: 1 }
    }

    /// Reject parameters scrypt refuses or that would exhaust memory.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.log_n == 0 || self.log_n > MAX_LOG_N {
            return Err(format!("kdf_log_n must be between 1 and {}, got {}", MAX_LOG_N, self.log_n));
        }
        scrypt::Params::new(self.log_n, self.r, self.p, 32)
            .map(|_| ())
            .map_err(|e| format!("invalid scrypt parameters: {}", e))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::with_log_n(17)
    }
}

/// Derive the 256-bit key from the passphrase.
pub fn derive_key(passphrase: &str, salt: &[u8], params: KdfParams) -> io::Result<Zeroizing<[u8; 32]>> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, 32)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("scrypt params: {}", e)))?;
    let mut key = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &scrypt_params, &mut key[..])
        .map_err(|e| io::Error::other(format!("scrypt: {}", e)))?;
    Ok(key)
}

/// Read the passphrase: first line of the file, trailing newline stripped.
pub fn load_passphrase(path: &Path) -> Result<Zeroizing<String>> {
    let missing = |reason: String| BackupError::CredentialMissing {
        path: path.to_path_buf(),
        reason,
    };
    let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| missing(e.to_string()))?);
    let first = content.lines().next().unwrap_or_default();
    if first.is_empty() {
        return Err(missing("passphrase is empty".to_string()));
    }
    Ok(Zeroizing::new(first.to_string()))
}

/// First error seen by the encryption stage. Shared with the caller so a
/// failure surfacing through the archive layers can be attributed correctly.
#[derive(Debug, Clone, Default)]
pub struct StageFault(Arc<OnceLock<String>>);

impl StageFault {
    pub fn record(&self, message: impl Into<String>) {
        let _ = self.0.set(message.into());
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// `Write` adapter that encrypts everything written to it.
///
/// Call [`finish`](Self::finish) to seal the final chunk; dropping the writer
/// without it leaves a truncated, undecryptable stream.
pub struct EncryptWriter<W: Write> {
    inner: W,
    encryptor: Option<EncryptorBE32<Aes256Gcm>>,
    buffer: Zeroizing<Vec<u8>>,
    fault: StageFault,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(mut inner: W, passphrase: &str, params: KdfParams, fault: StageFault) -> io::Result<Self> {
        let salt: [u8; SALT_SIZE] = rand::random();
        let nonce_prefix: [u8; NONCE_PREFIX_SIZE] = rand::random();

        let key = derive_key(passphrase, &salt, params).inspect_err(|e| fault.record(e.to_string()))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        let encryptor = EncryptorBE32::from_aead(cipher, GenericArray::from_slice(&nonce_prefix));

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(MAGIC);
        header.push(params.log_n);
        header.extend_from_slice(&params.r.to_be_bytes());
        header.extend_from_slice(&params.p.to_be_bytes());
        header.extend_from_slice(&salt);
        header.extend_from_slice(&nonce_prefix);
        inner.write_all(&header).inspect_err(|e| fault.record(e.to_string()))?;

        Ok(Self {
            inner,
            encryptor: Some(encryptor),
            buffer: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
            fault,
        })
    }

    fn fail(&self, err: io::Error) -> io::Error {
        self.fault.record(err.to_string());
        err
    }

    fn seal_full_chunk(&mut self) -> io::Result<()> {
        let Some(encryptor) = self.encryptor.as_mut() else {
            return Err(self.fail(io::Error::other("encrypt writer already finished")));
        };
        let sealed = match encryptor.encrypt_next(self.buffer.as_slice()) {
            Ok(sealed) => sealed,
            Err(_) => return Err(self.fail(io::Error::other("chunk encryption failed"))),
        };
        if let Err(e) = self.inner.write_all(&sealed) {
            return Err(self.fail(e));
        }
        self.buffer.clear();
        Ok(())
    }

    /// Seal the last chunk and hand back the underlying writer, flushed.
    pub fn finish(mut self) -> io::Result<W> {
        let Some(encryptor) = self.encryptor.take() else {
            return Err(self.fail(io::Error::other("encrypt writer already finished")));
        };
        let sealed = match encryptor.encrypt_last(self.buffer.as_slice()) {
            Ok(sealed) => sealed,
            Err(_) => return Err(self.fail(io::Error::other("final chunk encryption failed"))),
        };
        if let Err(e) = self.inner.write_all(&sealed).and_then(|()| self.inner.flush()) {
            return Err(self.fail(e));
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut consumed = 0;
        while consumed < data.len() {
            // Only seal a full chunk once more data arrives: the final
            // chunk must go through encrypt_last.
            if self.buffer.len() == CHUNK_SIZE {
                self.seal_full_chunk()?;
            }
            let take = (CHUNK_SIZE - self.buffer.len()).min(data.len() - consumed);
            self.buffer.extend_from_slice(&data[consumed..consumed + take]);
            consumed += take;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }
}
