//! Offset-keyed encryption seam.
//!
//! All encryption is keyed by the absolute byte offset of the buffer within
//! its file: the same plaintext at two offsets encrypts differently, so no
//! IV is ever persisted. Concrete ciphers are supplied by the embedding
//! application; [`XorKeystreamCipher`] exists to exercise the contract.

use tessera_core::Result;

/// A block cipher keyed by byte offset.
pub trait Cipher: Send + Sync {
    /// Cipher granularity in bytes; buffers are processed in place.
    fn block_size(&self) -> usize;

    /// Encrypt `buf` in place; `offset` is the absolute file position of
    /// `buf[0]`.
    fn encrypt(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Inverse of [`Cipher::encrypt`] for the same `offset`.
    fn decrypt(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// Symmetric keystream cipher for tests and examples.
///
/// Each byte is XORed with a keystream derived from the key and the byte's
/// absolute offset. Not cryptographically meaningful.
pub struct XorKeystreamCipher {
    key: [u8; 32],
}

impl XorKeystreamCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Deterministic key for test fixtures.
    pub fn test_cipher() -> Self {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        Self::new(key)
    }

    #[inline]
    fn keystream(&self, offset: u64) -> u8 {
        let k = self.key[(offset % 32) as usize];
        k ^ (offset >> 5) as u8 ^ (offset >> 13) as u8
    }

    fn apply(&self, offset: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= self.keystream(offset + i as u64);
        }
    }
}

impl Cipher for XorKeystreamCipher {
    fn block_size(&self) -> usize {
        1
    }

    fn encrypt(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.apply(offset, buf);
        Ok(())
    }

    fn decrypt(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.apply(offset, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cipher = XorKeystreamCipher::test_cipher();
        let plain = b"the quick brown fox".to_vec();
        let mut buf = plain.clone();
        cipher.encrypt(100, &mut buf).unwrap();
        assert_ne!(buf, plain);
        cipher.decrypt(100, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_offset_keyed() {
        let cipher = XorKeystreamCipher::test_cipher();
        let mut at_zero = b"same plaintext bytes".to_vec();
        let mut at_4k = at_zero.clone();
        cipher.encrypt(0, &mut at_zero).unwrap();
        cipher.encrypt(4096, &mut at_4k).unwrap();
        assert_ne!(at_zero, at_4k);
    }

    #[test]
    fn test_split_buffers_compose() {
        let cipher = XorKeystreamCipher::test_cipher();
        let plain: Vec<u8> = (0..64).collect();

        let mut whole = plain.clone();
        cipher.encrypt(777, &mut whole).unwrap();

        let mut halves = plain.clone();
        let (a, b) = halves.split_at_mut(30);
        cipher.encrypt(777, a).unwrap();
        cipher.encrypt(777 + 30, b).unwrap();
        assert_eq!(halves, whole);
    }
}
