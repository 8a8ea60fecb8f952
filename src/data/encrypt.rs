//! Authenticated encryption of column blocks.
//!
//! Each `(column, minibatch)` block is sealed separately with AES-256-GCM, so
//! a trainer can open exactly the block it is about to read. The nonce is
//! derived from the block coordinates: column index as `u32` LE followed by
//! minibatch index as `u64` LE.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};

use crate::error::{Error, Result};

/// Fixed demonstration key: the bytes `0, 1, ..., 31`.
pub const DEFAULT_KEY: [u8; 32] = {
    let mut key = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        key[i] = i as u8;
        i += 1;
    }
    key
};

pub struct BlockCipher {
    cipher: Aes256Gcm,
}

impl Default for BlockCipher {
    fn default() -> Self {
        Self::new(&DEFAULT_KEY)
    }
}

impl BlockCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        BlockCipher {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    fn nonce(column: usize, block: usize) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&(column as u32).to_le_bytes());
        nonce[4..].copy_from_slice(&(block as u64).to_le_bytes());
        nonce
    }

    /// Encrypt one block. The result carries a 16-byte tag.
    pub fn seal(&self, column: usize, block: usize, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce(column, block);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::Crypto(format!("sealing column {column} block {block}: {e}")))
    }

    /// Decrypt and authenticate one block.
    pub fn open(&self, column: usize, block: usize, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce(column, block);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| Error::Crypto(format!("opening column {column} block {block}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Byte images of column data
// ---------------------------------------------------------------------------

pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn u32_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn words_of(bytes: &[u8]) -> Result<impl Iterator<Item = [u8; 4]> + '_> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Crypto(format!(
            "decrypted block of {} bytes is not a whole number of 4-byte words",
            bytes.len()
        )));
    }
    Ok(bytes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]))
}

pub fn bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    Ok(words_of(bytes)?.map(f32::from_le_bytes).collect())
}

pub fn bytes_to_u32(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(words_of(bytes)?.map(u32::from_le_bytes).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_block_opens_to_the_same_values() {
        let cipher = BlockCipher::default();
        let values = [0.5f32, -1.25, 3.0];
        let sealed = cipher.seal(2, 7, &f32_to_bytes(&values)).unwrap();
        assert_eq!(sealed.len(), values.len() * 4 + 16);

        let opened = cipher.open(2, 7, &sealed).unwrap();
        assert_eq!(bytes_to_f32(&opened).unwrap(), values.to_vec());
    }

    #[test]
    fn tampered_or_misplaced_block_is_rejected() {
        let cipher = BlockCipher::default();
        let mut sealed = cipher.seal(0, 0, &u32_to_bytes(&[1, 2, 3])).unwrap();
        assert!(cipher.open(0, 1, &sealed).is_err());
        assert!(cipher.open(1, 0, &sealed).is_err());

        sealed[0] ^= 0x01;
        assert!(matches!(cipher.open(0, 0, &sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn different_key_cannot_open() {
        let mut key = DEFAULT_KEY;
        key[31] = 0xFF;
        let sealed = BlockCipher::default().seal(0, 0, b"abcd").unwrap();
        assert!(BlockCipher::new(&key).open(0, 0, &sealed).is_err());
    }

    #[test]
    fn default_key_counts_up() {
        assert_eq!(DEFAULT_KEY[0], 0);
        assert_eq!(DEFAULT_KEY[31], 31);
        assert!(bytes_to_u32(&[0, 0, 0]).is_err());
    }
}
