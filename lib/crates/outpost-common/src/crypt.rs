//! Per-agent session cipher (AES-256 in CTR mode).

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;

/// Symmetric key material an agent generates and sends at registration.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    pub key: [u8; AES_KEY_LEN],
    pub iv: [u8; AES_IV_LEN],
}

impl SessionKeys {
    pub fn new(key: [u8; AES_KEY_LEN], iv: [u8; AES_IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// True when the agent sent no usable key.
    pub fn is_zero(&self) -> bool {
        self.key.iter().all(|b| *b == 0)
    }

    /// Encrypt or decrypt in place. CTR mode is symmetric.
    pub fn apply(&self, data: &mut [u8]) {
        let mut cipher = Aes256Ctr::new(&self.key.into(), &self.iv.into());
        cipher.apply_keystream(data);
    }

    pub fn xcrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}
