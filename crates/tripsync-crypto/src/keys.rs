use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// A 256-bit symmetric key shared by all members of one trip.
#[derive(Clone, PartialEq, Eq)]
pub struct TripKey([u8; 32]);

impl TripKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode for out-of-band distribution.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64.decode(encoded)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("Invalid key length: {} (expected 32)", b.len()))?;
        Ok(Self(key))
    }
}

impl std::fmt::Debug for TripKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TripKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = TripKey::generate();
        let decoded = TripKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn rejects_short_key() {
        assert!(TripKey::from_base64(&BASE64.encode([7u8; 16])).is_err());
    }
}
