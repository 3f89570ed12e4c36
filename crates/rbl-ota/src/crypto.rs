//! AES-256-CBC package decryption and key provisioning
//!
//! Key material is requested once per upgrade through [`KeyProvider`] and
//! zeroized when dropped. The decryptor keeps a running IV so a package can
//! be decrypted chunk by chunk.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{OtaError, OtaResult};

/// AES block size in bytes
pub const AES_BLOCK_LEN: usize = 16;

/// AES-256 key length in bytes
pub const AES_KEY_LEN: usize = 32;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// 256-bit key and 128-bit IV for one upgrade
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; AES_KEY_LEN],
    iv: [u8; AES_BLOCK_LEN],
}

impl KeyMaterial {
    /// Wrap raw key and IV bytes
    pub const fn new(key: [u8; AES_KEY_LEN], iv: [u8; AES_BLOCK_LEN]) -> Self {
        Self { key, iv }
    }

    /// Decode a hex key (64 digits) and IV (32 digits)
    pub fn from_hex(key: &str, iv: &str) -> OtaResult<Self> {
        let mut material = Self::new([0; AES_KEY_LEN], [0; AES_BLOCK_LEN]);
        hex::decode_to_slice(key.trim(), &mut material.key)
            .map_err(|e| OtaError::KeyProvisioning(format!("invalid AES key: {}", e)))?;
        hex::decode_to_slice(iv.trim(), &mut material.iv)
            .map_err(|e| OtaError::KeyProvisioning(format!("invalid AES IV: {}", e)))?;
        Ok(material)
    }

    /// Key bytes
    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    /// Initial IV
    pub fn iv(&self) -> &[u8; AES_BLOCK_LEN] {
        &self.iv
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Source of the package decryption key
pub trait KeyProvider {
    /// Produce the key and IV for the upgrade about to run
    fn provide(&mut self) -> OtaResult<KeyMaterial>;
}

impl<T: KeyProvider + ?Sized> KeyProvider for &mut T {
    fn provide(&mut self) -> OtaResult<KeyMaterial> {
        (**self).provide()
    }
}

impl<T: KeyProvider + ?Sized> KeyProvider for Box<T> {
    fn provide(&mut self) -> OtaResult<KeyMaterial> {
        (**self).provide()
    }
}

/// Key provider returning a fixed key, e.g. one loaded from a layout file
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    material: KeyMaterial,
}

impl StaticKeyProvider {
    /// Provide `material` on every request
    pub fn new(material: KeyMaterial) -> Self {
        Self { material }
    }

    /// Provide a key decoded from hex
    pub fn from_hex(key: &str, iv: &str) -> OtaResult<Self> {
        Ok(Self::new(KeyMaterial::from_hex(key, iv)?))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn provide(&mut self) -> OtaResult<KeyMaterial> {
        Ok(self.material.clone())
    }
}

/// Key provider for platforms without encrypted packages
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

impl KeyProvider for NoKeys {
    fn provide(&mut self) -> OtaResult<KeyMaterial> {
        Err(OtaError::KeyProvisioning(
            "no decryption key is configured".to_string(),
        ))
    }
}

/// In-place CBC decryption with a running IV
pub trait CbcDecrypt {
    /// Decrypt `buf` in place; `buf.len()` must be a multiple of 16
    fn decrypt_in_place(&mut self, buf: &mut [u8]) -> OtaResult<()>;
}

/// AES-256-CBC decryptor
pub struct Aes256CbcDecryptor {
    cipher: Aes256CbcDec,
}

impl Aes256CbcDecryptor {
    /// Create a decryptor starting at the key material IV
    pub fn new(material: &KeyMaterial) -> OtaResult<Self> {
        let cipher = Aes256CbcDec::new_from_slices(&material.key, &material.iv)
            .map_err(|e| OtaError::KeyProvisioning(e.to_string()))?;
        Ok(Self { cipher })
    }
}

impl std::fmt::Debug for Aes256CbcDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256CbcDecryptor").finish_non_exhaustive()
    }
}

impl CbcDecrypt for Aes256CbcDecryptor {
    fn decrypt_in_place(&mut self, buf: &mut [u8]) -> OtaResult<()> {
        if buf.len() % AES_BLOCK_LEN != 0 {
            return Err(OtaError::InvalidCiphertextLength(buf.len()));
        }
        for block in buf.chunks_exact_mut(AES_BLOCK_LEN) {
            self.cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}

/// AES-256-CBC encryptor used when building packages
pub struct Aes256CbcEncryptor {
    cipher: Aes256CbcEnc,
}

impl Aes256CbcEncryptor {
    /// Create an encryptor starting at the key material IV
    pub fn new(material: &KeyMaterial) -> OtaResult<Self> {
        let cipher = Aes256CbcEnc::new_from_slices(&material.key, &material.iv)
            .map_err(|e| OtaError::KeyProvisioning(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `data`, zero padding it up to the next block boundary
    pub fn encrypt_padded(mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        out.resize(padded_len(data.len()), 0);
        for block in out.chunks_exact_mut(AES_BLOCK_LEN) {
            self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }
}

impl std::fmt::Debug for Aes256CbcEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256CbcEncryptor").finish_non_exhaustive()
    }
}

/// `len` rounded up to a whole number of AES blocks
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(AES_BLOCK_LEN) * AES_BLOCK_LEN
}
