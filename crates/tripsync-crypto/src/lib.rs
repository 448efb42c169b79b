/// Per-trip message encryption.
///
/// Every member of a trip shares one AES-256-GCM key, distributed out-of-band.
/// Sealed text is `base64(nonce || ciphertext)` so it fits the store's text
/// column and the JSON broadcast payload unchanged.
pub mod cipher;
pub mod keys;

pub use cipher::MessageCipher;
pub use keys::TripKey;
