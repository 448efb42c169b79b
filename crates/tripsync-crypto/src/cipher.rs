use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::keys::TripKey;

const NONCE_LEN: usize = 12;

/// Seals and opens message text for one trip.
#[derive(Clone)]
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    pub fn new(key: &TripKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64.decode(sealed)?;
        if bytes.len() <= NONCE_LEN {
            return Err(anyhow!("Sealed message too short: {} bytes", bytes.len()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let cipher = MessageCipher::new(&TripKey::generate());
        let sealed = cipher.seal("meet at gate 12").unwrap();
        assert_ne!(sealed, "meet at gate 12");
        assert_eq!(cipher.open(&sealed).unwrap(), "meet at gate 12");
    }

    #[test]
    fn nonce_differs_per_seal() {
        let cipher = MessageCipher::new(&TripKey::generate());
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = MessageCipher::new(&TripKey::generate()).seal("secret").unwrap();
        let result = MessageCipher::new(&TripKey::generate()).open(&sealed);
        assert!(result.is_err());
    }

    #[test]
    fn garbage_fails() {
        let cipher = MessageCipher::new(&TripKey::generate());
        assert!(cipher.open("not base64 at all!").is_err());
        assert!(cipher.open(&BASE64.encode([1u8; 8])).is_err());
    }
}
