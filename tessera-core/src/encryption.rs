//! Block encryption for segment data and paths
//!
//! Provides:
//! - AES-256-GCM and SecretBox (XChaCha20-Poly1305) authenticated ciphers
//! - Block-indexed nonces: block `i` of a stream is sealed with nonce `i`
//! - Segment helpers that emit whole encrypted blocks of `block_size` bytes
//! - Deterministic per-component path encryption

use crate::error::{Result, TesseraError};
use crate::redundancy::RedundancyScheme;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key size for both ciphers (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Authentication tag size for both ciphers (16 bytes)
pub const TAG_SIZE: usize = 16;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// XChaCha20-Poly1305 nonce size (24 bytes)
pub const SECRETBOX_NONCE_SIZE: usize = 24;

/// Cipher used for segment content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Cipher {
    AesGcm = 1,
    SecretBox = 2,
}

impl Cipher {
    fn nonce_size(self) -> usize {
        match self {
            Cipher::AesGcm => AES_GCM_NONCE_SIZE,
            Cipher::SecretBox => SECRETBOX_NONCE_SIZE,
        }
    }
}

impl TryFrom<u8> for Cipher {
    type Error = TesseraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Cipher::AesGcm),
            2 => Ok(Cipher::SecretBox),
            other => Err(TesseraError::InvalidConfiguration(format!(
                "unknown data cipher {} (1=AES-GCM, 2=SecretBox)",
                other
            ))),
        }
    }
}

impl From<Cipher> for u8 {
    fn from(cipher: Cipher) -> Self {
        cipher as u8
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cipher::AesGcm => write!(f, "aes-gcm"),
            Cipher::SecretBox => write!(f, "secretbox"),
        }
    }
}

/// Cipher used for object paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PathCipher {
    Unencrypted = 0,
    AesGcm = 1,
    SecretBox = 2,
}

impl PathCipher {
    fn data_cipher(self) -> Option<Cipher> {
        match self {
            PathCipher::Unencrypted => None,
            PathCipher::AesGcm => Some(Cipher::AesGcm),
            PathCipher::SecretBox => Some(Cipher::SecretBox),
        }
    }
}

impl TryFrom<u8> for PathCipher {
    type Error = TesseraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PathCipher::Unencrypted),
            1 => Ok(PathCipher::AesGcm),
            2 => Ok(PathCipher::SecretBox),
            other => Err(TesseraError::InvalidConfiguration(format!(
                "unknown path cipher {} (0=Unencrypted, 1=AES-GCM, 2=SecretBox)",
                other
            ))),
        }
    }
}

impl From<PathCipher> for u8 {
    fn from(cipher: PathCipher) -> Self {
        cipher as u8
    }
}

/// 256-bit symmetric key
#[derive(Clone)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Generate a new random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(TesseraError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Root key from the configured key string.
    ///
    /// The string's bytes are copied in; shorter keys are zero padded and
    /// longer keys truncated.
    pub fn from_config(value: &str) -> Self {
        let mut key = [0u8; KEY_SIZE];
        let bytes = value.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        key[..len].copy_from_slice(&bytes[..len]);
        Self(key)
    }

    /// Derive a sub-key bound to `label` and `context`
    pub fn derive(&self, label: &str, context: &[u8]) -> Key {
        let mut hasher = blake3::Hasher::new_keyed(&self.0);
        hasher.update(label.as_bytes());
        hasher.update(&(context.len() as u64).to_le_bytes());
        hasher.update(context);
        Key(*hasher.finalize().as_bytes())
    }

    /// Content key of one stream: bound to its path and stream ID, so a
    /// re-upload to the same path never reuses a (key, nonce) pair.
    pub fn derive_content_key(&self, path: &str, stream_id: &[u8]) -> Key {
        let mut context = Vec::with_capacity(8 + path.len() + stream_id.len());
        context.extend_from_slice(&(path.len() as u64).to_le_bytes());
        context.extend_from_slice(path.as_bytes());
        context.extend_from_slice(stream_id);
        self.derive("content", &context)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([REDACTED])")
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        // Zeroize key on drop
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

fn block_nonce(block_index: u64) -> [u8; SECRETBOX_NONCE_SIZE] {
    let mut nonce = [0u8; SECRETBOX_NONCE_SIZE];
    nonce[..8].copy_from_slice(&block_index.to_le_bytes());
    nonce
}

fn seal(cipher: Cipher, key: &Key, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    match cipher {
        Cipher::AesGcm => Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| TesseraError::Encryption(e.to_string()))?
            .encrypt(Nonce::from_slice(&nonce[..AES_GCM_NONCE_SIZE]), plaintext)
            .map_err(|e| TesseraError::Encryption(e.to_string())),
        Cipher::SecretBox => XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| TesseraError::Encryption(e.to_string()))?
            .encrypt(XNonce::from_slice(&nonce[..SECRETBOX_NONCE_SIZE]), plaintext)
            .map_err(|e| TesseraError::Encryption(e.to_string())),
    }
}

fn open(cipher: Cipher, key: &Key, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    match cipher {
        Cipher::AesGcm => Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| TesseraError::Encryption(e.to_string()))?
            .decrypt(Nonce::from_slice(&nonce[..AES_GCM_NONCE_SIZE]), ciphertext)
            .map_err(|_| TesseraError::AuthenticationFailed),
        Cipher::SecretBox => XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| TesseraError::Encryption(e.to_string()))?
            .decrypt(XNonce::from_slice(&nonce[..SECRETBOX_NONCE_SIZE]), ciphertext)
            .map_err(|_| TesseraError::AuthenticationFailed),
    }
}

/// Cipher and block size used for segment content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionScheme {
    cipher: Cipher,
    block_size: usize,
}

impl EncryptionScheme {
    /// Create a scheme for data that will be erasure coded with `redundancy`.
    ///
    /// Encrypted blocks must tile the data rebuilt from the required shares:
    /// `share_size * required_shares` has to be a multiple of `block_size`.
    pub fn new(cipher: Cipher, block_size: usize, redundancy: &RedundancyScheme) -> Result<Self> {
        let scheme = Self::from_parts(cipher, block_size)?;
        let stripe = redundancy.stripe_size();
        if stripe % block_size != 0 {
            return Err(TesseraError::InvalidConfiguration(format!(
                "encryption block size {} must evenly divide erasure share size * required shares ({})",
                block_size, stripe
            )));
        }
        Ok(scheme)
    }

    /// Rebuild a scheme from stored metadata (no redundancy check)
    pub fn from_parts(cipher: Cipher, block_size: usize) -> Result<Self> {
        if block_size <= TAG_SIZE {
            return Err(TesseraError::InvalidConfiguration(format!(
                "encryption block size {} must exceed the {} byte authentication tag",
                block_size, TAG_SIZE
            )));
        }
        Ok(Self { cipher, block_size })
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Size of one encrypted block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Plaintext bytes carried by one encrypted block
    pub fn plaintext_block_size(&self) -> usize {
        self.block_size - TAG_SIZE
    }

    /// Number of blocks needed for `plaintext_len` bytes
    pub fn block_count(&self, plaintext_len: usize) -> u64 {
        plaintext_len.div_ceil(self.plaintext_block_size()) as u64
    }

    /// Encrypted size of `plaintext_len` bytes
    pub fn encrypted_size(&self, plaintext_len: usize) -> usize {
        self.block_count(plaintext_len) as usize * self.block_size
    }

    /// Encrypt one block
    pub fn encrypt_block(&self, key: &Key, block_index: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > self.plaintext_block_size() {
            return Err(TesseraError::Encryption(format!(
                "block of {} bytes exceeds plaintext block size {}",
                plaintext.len(),
                self.plaintext_block_size()
            )));
        }
        seal(self.cipher, key, &block_nonce(block_index), plaintext)
    }

    /// Decrypt one block; fails with `AuthenticationFailed` on a wrong key,
    /// wrong block index or tampered ciphertext
    pub fn decrypt_block(&self, key: &Key, block_index: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        open(self.cipher, key, &block_nonce(block_index), ciphertext)
    }

    /// Encrypt a whole segment starting at `first_block`.
    ///
    /// The final block is zero padded so the output is a whole number of
    /// `block_size` blocks.
    pub fn encrypt_segment(&self, key: &Key, first_block: u64, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encrypted_size(data.len()));
        let mut padded = vec![0u8; self.plaintext_block_size()];

        for (i, chunk) in data.chunks(self.plaintext_block_size()).enumerate() {
            let block = if chunk.len() == self.plaintext_block_size() {
                chunk
            } else {
                padded[..chunk.len()].copy_from_slice(chunk);
                padded[chunk.len()..].fill(0);
                &padded[..]
            };
            out.extend_from_slice(&self.encrypt_block(key, first_block + i as u64, block)?);
        }
        Ok(out)
    }

    /// Decrypt a segment produced by [`encrypt_segment`](Self::encrypt_segment)
    pub fn decrypt_segment(
        &self,
        key: &Key,
        first_block: u64,
        data: &[u8],
        plaintext_len: usize,
    ) -> Result<Vec<u8>> {
        if data.len() != self.encrypted_size(plaintext_len) {
            return Err(TesseraError::AuthenticationFailed);
        }

        let mut out = Vec::with_capacity(data.len());
        for (i, block) in data.chunks(self.block_size).enumerate() {
            out.extend_from_slice(&self.decrypt_block(key, first_block + i as u64, block)?);
        }
        out.truncate(plaintext_len);
        Ok(out)
    }
}

/// Encrypt a `/`-separated path component by component.
///
/// Each component's key depends on the plaintext parent path and its nonce on
/// the component itself, so equal paths always encrypt to equal strings.
pub fn encrypt_path(path: &str, cipher: PathCipher, root: &Key) -> Result<String> {
    let Some(cipher) = cipher.data_cipher() else {
        return Ok(path.to_string());
    };

    let mut parent = String::new();
    let mut encrypted = Vec::new();
    for component in path.split('/') {
        if component.is_empty() {
            encrypted.push(String::new());
        } else {
            let key = root.derive("path", parent.as_bytes());
            let nonce_seed = blake3::keyed_hash(key.as_bytes(), component.as_bytes());
            let nonce = &nonce_seed.as_bytes()[..cipher.nonce_size()];
            let mut sealed = nonce.to_vec();
            sealed.extend_from_slice(&seal(cipher, &key, &padded_nonce(nonce), component.as_bytes())?);
            encrypted.push(bs58::encode(sealed).into_string());
        }
        parent.push_str(component);
        parent.push('/');
    }
    Ok(encrypted.join("/"))
}

/// Reverse of [`encrypt_path`]
pub fn decrypt_path(path: &str, cipher: PathCipher, root: &Key) -> Result<String> {
    let Some(cipher) = cipher.data_cipher() else {
        return Ok(path.to_string());
    };

    let mut parent = String::new();
    let mut decrypted = Vec::new();
    for component in path.split('/') {
        let plain = if component.is_empty() {
            String::new()
        } else {
            let sealed = bs58::decode(component)
                .into_vec()
                .map_err(|_| TesseraError::AuthenticationFailed)?;
            if sealed.len() < cipher.nonce_size() + TAG_SIZE {
                return Err(TesseraError::AuthenticationFailed);
            }
            let (nonce, ciphertext) = sealed.split_at(cipher.nonce_size());
            let key = root.derive("path", parent.as_bytes());
            let plain = open(cipher, &key, &padded_nonce(nonce), ciphertext)?;
            String::from_utf8(plain).map_err(|_| TesseraError::AuthenticationFailed)?
        };
        parent.push_str(&plain);
        parent.push('/');
        decrypted.push(plain);
    }
    Ok(decrypted.join("/"))
}

fn padded_nonce(nonce: &[u8]) -> [u8; SECRETBOX_NONCE_SIZE] {
    let mut out = [0u8; SECRETBOX_NONCE_SIZE];
    out[..nonce.len()].copy_from_slice(nonce);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scheme(cipher: Cipher) -> EncryptionScheme {
        let redundancy = RedundancyScheme::new(4, 4, 6, 6, 256).unwrap();
        EncryptionScheme::new(cipher, 64, &redundancy).unwrap()
    }

    #[test]
    fn test_block_roundtrip_both_ciphers() {
        for cipher in [Cipher::AesGcm, Cipher::SecretBox] {
            let scheme = scheme(cipher);
            let key = Key::generate();
            let plaintext = b"secret message";

            let sealed = scheme.encrypt_block(&key, 7, plaintext).unwrap();
            assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);
            let opened = scheme.decrypt_block(&key, 7, &sealed).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let scheme = scheme(Cipher::AesGcm);
        let sealed = scheme.encrypt_block(&Key::generate(), 0, b"secret").unwrap();
        let result = scheme.decrypt_block(&Key::generate(), 0, &sealed);
        assert!(matches!(result, Err(TesseraError::AuthenticationFailed)));
    }

    #[test]
    fn test_wrong_block_index_fails() {
        let scheme = scheme(Cipher::SecretBox);
        let key = Key::generate();
        let sealed = scheme.encrypt_block(&key, 3, b"secret").unwrap();
        let result = scheme.decrypt_block(&key, 4, &sealed);
        assert!(matches!(result, Err(TesseraError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let scheme = scheme(Cipher::AesGcm);
        let key = Key::generate();
        let mut sealed = scheme.encrypt_block(&key, 0, b"secret").unwrap();
        sealed[0] ^= 0xFF;
        assert!(matches!(
            scheme.decrypt_block(&key, 0, &sealed),
            Err(TesseraError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let scheme = scheme(Cipher::AesGcm);
        let too_big = vec![0u8; scheme.plaintext_block_size() + 1];
        assert!(scheme.encrypt_block(&Key::generate(), 0, &too_big).is_err());
    }

    #[test]
    fn test_tiling_invariant() {
        // 1000 * 29 = 29000, not a multiple of 1024
        let redundancy = RedundancyScheme::new(29, 35, 80, 95, 1000).unwrap();
        assert!(matches!(
            EncryptionScheme::new(Cipher::AesGcm, 1024, &redundancy),
            Err(TesseraError::InvalidConfiguration(_))
        ));

        // 1024 * 29 = 29696 = 29 blocks of 1024
        let redundancy = RedundancyScheme::new(29, 35, 80, 95, 1024).unwrap();
        assert!(EncryptionScheme::new(Cipher::AesGcm, 1024, &redundancy).is_ok());

        // 1024 * 29 is not a multiple of 2048
        assert!(EncryptionScheme::new(Cipher::SecretBox, 2048, &redundancy).is_err());
    }

    #[test]
    fn test_block_must_exceed_tag() {
        assert!(matches!(
            EncryptionScheme::from_parts(Cipher::AesGcm, TAG_SIZE),
            Err(TesseraError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_segment_roundtrip_with_padding() {
        let scheme = scheme(Cipher::AesGcm);
        let key = Key::generate();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();

        let sealed = scheme.encrypt_segment(&key, 100, &data).unwrap();
        assert_eq!(sealed.len() % scheme.block_size(), 0);
        assert_eq!(sealed.len(), scheme.encrypted_size(data.len()));

        let opened = scheme.decrypt_segment(&key, 100, &sealed, data.len()).unwrap();
        assert_eq!(opened, data);

        // Same bytes at another offset of the stream must not decrypt
        assert!(scheme.decrypt_segment(&key, 101, &sealed, data.len()).is_err());
    }

    #[test]
    fn test_empty_segment() {
        let scheme = scheme(Cipher::SecretBox);
        let key = Key::generate();
        let sealed = scheme.encrypt_segment(&key, 0, &[]).unwrap();
        assert!(sealed.is_empty());
        assert!(scheme.decrypt_segment(&key, 0, &sealed, 0).unwrap().is_empty());
    }

    #[test]
    fn test_cipher_codes() {
        assert_eq!(Cipher::try_from(1).unwrap(), Cipher::AesGcm);
        assert_eq!(Cipher::try_from(2).unwrap(), Cipher::SecretBox);
        assert!(Cipher::try_from(0).is_err());
        assert_eq!(PathCipher::try_from(0).unwrap(), PathCipher::Unencrypted);
        assert!(PathCipher::try_from(3).is_err());
    }

    #[test]
    fn test_config_key_padding() {
        let short = Key::from_config("abc");
        assert_eq!(&short.as_bytes()[..3], b"abc");
        assert!(short.as_bytes()[3..].iter().all(|b| *b == 0));

        let long = Key::from_config(&"x".repeat(64));
        assert!(long.as_bytes().iter().all(|b| *b == b'x'));
    }

    #[test]
    fn test_content_keys_differ_per_stream() {
        let root = Key::from_config("root");
        let a = root.derive_content_key("bucket/object", b"stream-a");
        let b = root.derive_content_key("bucket/object", b"stream-b");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_path_roundtrip() {
        let root = Key::from_config("path root");
        for cipher in [PathCipher::AesGcm, PathCipher::SecretBox] {
            let path = "photos/2018/holiday.jpg";
            let encrypted = encrypt_path(path, cipher, &root).unwrap();
            assert_ne!(encrypted, path);
            assert_eq!(encrypted.split('/').count(), 3);
            assert_eq!(encrypted, encrypt_path(path, cipher, &root).unwrap());
            assert_eq!(decrypt_path(&encrypted, cipher, &root).unwrap(), path);
        }
    }

    #[test]
    fn test_path_shares_prefix() {
        let root = Key::from_config("path root");
        let a = encrypt_path("docs/a.txt", PathCipher::AesGcm, &root).unwrap();
        let b = encrypt_path("docs/b.txt", PathCipher::AesGcm, &root).unwrap();
        assert_eq!(a.split('/').next(), b.split('/').next());
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_wrong_key_fails() {
        let encrypted =
            encrypt_path("a/b", PathCipher::SecretBox, &Key::from_config("one")).unwrap();
        assert!(decrypt_path(&encrypted, PathCipher::SecretBox, &Key::from_config("two")).is_err());
    }

    #[test]
    fn test_unencrypted_path_passthrough() {
        let root = Key::generate();
        assert_eq!(
            encrypt_path("plain/path", PathCipher::Unencrypted, &root).unwrap(),
            "plain/path"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_segment_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            first_block in 0u64..1_000_000,
            secretbox in any::<bool>(),
        ) {
            let cipher = if secretbox { Cipher::SecretBox } else { Cipher::AesGcm };
            let scheme = scheme(cipher);
            let key = Key::generate();
            let sealed = scheme.encrypt_segment(&key, first_block, &data).unwrap();
            let opened = scheme.decrypt_segment(&key, first_block, &sealed, data.len()).unwrap();
            prop_assert_eq!(opened, data);
        }
    }
}
