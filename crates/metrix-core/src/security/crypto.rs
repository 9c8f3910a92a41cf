//! RSA-OAEP encryption of whole payloads.
//!
//! The plaintext is cut into blocks of `key_size - 42` bytes (the OAEP SHA-1
//! overhead) and each block is encrypted separately. Ciphertext is the
//! concatenation of `key_size`-byte blocks.

use std::fs;
use std::path::Path;

use openssl::pkey::{Private, Public};
use openssl::rsa::{Padding, Rsa};

const OAEP_OVERHEAD: usize = 42;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("cannot read key {path}: {reason}")]
    KeyFile { path: String, reason: String },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("codec: {0}")]
    Codec(String),
}

impl CryptoError {
    pub(crate) fn codec(e: std::io::Error) -> Self {
        CryptoError::Codec(e.to_string())
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, CryptoError> {
    fs::read(path).map_err(|e| CryptoError::KeyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Agent side: holds the server's public key.
pub struct Encryptor {
    key: Rsa<Public>,
}

impl Encryptor {
    /// Accepts `BEGIN PUBLIC KEY` and `BEGIN RSA PUBLIC KEY` PEM.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let key = Rsa::public_key_from_pem(pem)
            .or_else(|_| Rsa::public_key_from_pem_pkcs1(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_pem(&read_key_file(path.as_ref())?)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size() as usize;
        let chunk = block
            .checked_sub(OAEP_OVERHEAD)
            .filter(|c| *c > 0)
            .ok_or_else(|| CryptoError::InvalidKey(format!("{block}-byte key too small")))?;

        let blocks = plaintext.len().div_ceil(chunk).max(1);
        let mut out = Vec::with_capacity(blocks * block);
        let mut buf = vec![0u8; block];
        // An empty payload still produces one block.
        let chunks: Vec<&[u8]> = if plaintext.is_empty() {
            vec![plaintext]
        } else {
            plaintext.chunks(chunk).collect()
        };
        for part in chunks {
            let n = self
                .key
                .public_encrypt(part, &mut buf, Padding::PKCS1_OAEP)
                .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

/// Server side: holds the private key.
pub struct Decryptor {
    key: Rsa<Private>,
}

impl Decryptor {
    /// Accepts PKCS#1 and PKCS#8 PEM.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let key =
            Rsa::private_key_from_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_pem(&read_key_file(path.as_ref())?)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size() as usize;
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(CryptoError::Decrypt(format!(
                "ciphertext length {} is not a multiple of {block}",
                ciphertext.len()
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        let mut buf = vec![0u8; block];
        for part in ciphertext.chunks(block) {
            let n = self
                .key
                .private_decrypt(part, &mut buf, Padding::PKCS1_OAEP)
                .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair() -> (Encryptor, Decryptor) {
        let rsa = Rsa::generate(2048).unwrap();
        let public = rsa.public_key_to_pem().unwrap();
        let private = rsa.private_key_to_pem().unwrap();
        (
            Encryptor::from_pem(&public).unwrap(),
            Decryptor::from_pem(&private).unwrap(),
        )
    }

    #[test]
    fn test_multi_block_payload() {
        let (enc, dec) = key_pair();
        // 2048-bit key: 214-byte chunks, so this needs 5 blocks.
        let payload = vec![7u8; 1000];
        let sealed = enc.encrypt(&payload).unwrap();
        assert_eq!(sealed.len(), 5 * 256);
        assert_eq!(dec.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let (enc, dec) = key_pair();
        let sealed = enc.encrypt(b"hello").unwrap();
        assert!(matches!(
            dec.decrypt(&sealed[..100]),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_wrong_private_key_rejected() {
        let (enc, _) = key_pair();
        let (_, other) = key_pair();
        let sealed = enc.encrypt(b"hello").unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_pkcs1_public_key_accepted() {
        let rsa = Rsa::generate(2048).unwrap();
        let pem = rsa.public_key_to_pem_pkcs1().unwrap();
        assert!(Encryptor::from_pem(&pem).is_ok());
        assert!(matches!(
            Encryptor::from_pem(b"garbage"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_missing_key_file() {
        assert!(matches!(
            Decryptor::from_file("/no/such/key.pem"),
            Err(CryptoError::KeyFile { .. })
        ));
    }
}
