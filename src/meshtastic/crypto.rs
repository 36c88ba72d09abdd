//! Channel key handling and AES-CTR packet decryption.
//!
//! Keys come from config as base64. A one-byte key is a "simple" PSK index
//! into the well-known default key (index 0 disables encryption), 16 bytes
//! selects AES-128 and 32 bytes AES-256.

use aes::{Aes128, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};

/// Firmware default channel key (`1PG7OiApB1nwvP+rz05pAQ==`).
pub const DEFAULT_PSK: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69, 0x01,
];

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("channel key must be 1, 16 or 32 bytes, got {0}")]
    BadLength(usize),
}

#[derive(Clone)]
pub enum ChannelKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log key material
        match self {
            ChannelKey::Aes128(_) => f.write_str("ChannelKey::Aes128(..)"),
            ChannelKey::Aes256(_) => f.write_str("ChannelKey::Aes256(..)"),
        }
    }
}

impl ChannelKey {
    /// Build a key from raw config bytes. `Ok(None)` means "no encryption".
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>, KeyError> {
        match bytes.len() {
            0 => Ok(None),
            1 => Ok(expand_simple_psk(bytes[0]).map(ChannelKey::Aes128)),
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(bytes);
                Ok(Some(ChannelKey::Aes128(key)))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                Ok(Some(ChannelKey::Aes256(key)))
            }
            n => Err(KeyError::BadLength(n)),
        }
    }

    /// AES-CTR is symmetric, so this both encrypts and decrypts.
    pub fn apply(&self, packet_id: u32, from: u32, data: &[u8]) -> Vec<u8> {
        let iv = packet_nonce(packet_id, from);
        let mut buf = data.to_vec();
        match self {
            ChannelKey::Aes128(key) => {
                let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
                cipher.apply_keystream(&mut buf);
            }
            ChannelKey::Aes256(key) => {
                let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
                cipher.apply_keystream(&mut buf);
            }
        }
        buf
    }
}

fn expand_simple_psk(index: u8) -> Option<[u8; 16]> {
    if index == 0 {
        return None;
    }
    let mut key = DEFAULT_PSK;
    key[15] = DEFAULT_PSK[15].wrapping_add(index - 1);
    Some(key)
}

/// 128-bit counter block: packet id then sender, both little-endian u64.
pub fn packet_nonce(packet_id: u32, from: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..].copy_from_slice(&u64::from(from).to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_psk_index_one_is_default_key() {
        match ChannelKey::from_bytes(&[1]).unwrap() {
            Some(ChannelKey::Aes128(k)) => assert_eq!(k, DEFAULT_PSK),
            other => panic!("unexpected {other:?}"),
        }
        match ChannelKey::from_bytes(&[3]).unwrap() {
            Some(ChannelKey::Aes128(k)) => assert_eq!(k[15], 0x03),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ChannelKey::from_bytes(&[0]).unwrap().is_none());
        assert_eq!(ChannelKey::from_bytes(&[0; 5]).unwrap_err(), KeyError::BadLength(5));
    }

    #[test]
    fn nonce_layout() {
        let n = packet_nonce(0x0102_0304, 0xda63_9058);
        assert_eq!(&n[..8], &[0x04, 0x03, 0x02, 0x01, 0, 0, 0, 0]);
        assert_eq!(&n[8..], &[0x58, 0x90, 0x63, 0xda, 0, 0, 0, 0]);
    }

    #[test]
    fn ctr_is_its_own_inverse() {
        let key = ChannelKey::from_bytes(&[0x42; 32]).unwrap().unwrap();
        let plain = b"hello mesh".to_vec();
        let enc = key.apply(7, 9, &plain);
        assert_ne!(enc, plain);
        assert_eq!(key.apply(7, 9, &enc), plain);
        // a different packet id yields a different keystream
        assert_ne!(key.apply(8, 9, &plain), enc);
    }
}
