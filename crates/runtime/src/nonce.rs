//! Replay-resistant run nonces
//!
//! Every scheduled run can carry a token proving when it was started: the
//! current time (8 bytes, big-endian milliseconds) wrapped under a pre-shared
//! key. Scripts hand the token to downstream services, which unwrap it with
//! the same key and reject stale or replayed runs.
//!
//! ## Token format
//!
//! ```text
//! base64url-nopad( nonce(12) || ciphertext(8) || tag(16) )
//! ```
//!
//! The default cipher is AES-256-GCM with a fresh random nonce per wrap, so
//! two tokens for the same millisecond never compare equal.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use subtle::ConstantTimeEq;

const AES_KEY_SIZE: usize = 32;
const AES_NONCE_SIZE: usize = 12;
const AES_GCM_TAG_SIZE: usize = 16;

/// Error while wrapping or unwrapping a nonce
#[derive(Debug)]
pub enum NonceError {
    /// Key has the wrong length
    InvalidKey(usize),
    /// Key text is not hex
    KeyEncoding(hex::FromHexError),
    /// Token is not valid base64
    TokenEncoding(base64::DecodeError),
    /// Token too short, tampered with, or wrapped under another key
    Rejected,
    /// Authenticated payload is not an 8-byte timestamp
    Payload(usize),
}

impl std::fmt::Display for NonceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonceError::InvalidKey(len) => write!(
                f,
                "key must be {} bytes, got {}",
                AES_KEY_SIZE, len
            ),
            NonceError::KeyEncoding(e) => write!(f, "key is not valid hex: {}", e),
            NonceError::TokenEncoding(e) => write!(f, "token is not valid base64: {}", e),
            NonceError::Rejected => write!(f, "token rejected"),
            NonceError::Payload(len) => {
                write!(f, "token payload must be 8 bytes, got {}", len)
            }
        }
    }
}

impl std::error::Error for NonceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NonceError::KeyEncoding(e) => Some(e),
            NonceError::TokenEncoding(e) => Some(e),
            _ => None,
        }
    }
}

/// Pre-shared 256-bit key
#[derive(Clone, PartialEq, Eq)]
pub struct Psk([u8; AES_KEY_SIZE]);

impl Psk {
    pub fn new(bytes: &[u8]) -> Result<Self, NonceError> {
        let key: [u8; AES_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| NonceError::InvalidKey(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn from_hex(text: &str) -> Result<Self, NonceError> {
        let bytes = hex::decode(text.trim()).map_err(NonceError::KeyEncoding)?;
        Self::new(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Never print key material
impl std::fmt::Debug for Psk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Psk(..)")
    }
}

/// Authenticated wrapping of short payloads under a key
pub trait NonceCipher: Send + Sync {
    fn wrap(&self, key: &Psk, payload: &[u8]) -> Result<Vec<u8>, NonceError>;

    fn unwrap(&self, key: &Psk, blob: &[u8]) -> Result<Vec<u8>, NonceError>;
}

/// AES-256-GCM: random 96-bit nonce, nonce || ciphertext || tag
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl NonceCipher for AesGcmCipher {
    fn wrap(&self, key: &Psk, payload: &[u8]) -> Result<Vec<u8>, NonceError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| NonceError::InvalidKey(key.as_bytes().len()))?;

        let mut nonce_bytes = [0u8; AES_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, payload)
            .map_err(|_| NonceError::Rejected)?;

        let mut combined = Vec::with_capacity(AES_NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn unwrap(&self, key: &Psk, blob: &[u8]) -> Result<Vec<u8>, NonceError> {
        if blob.len() < AES_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(NonceError::Rejected);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(AES_NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| NonceError::InvalidKey(key.as_bytes().len()))?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| NonceError::Rejected)
    }
}

/// Wrap `time_ms` into a text token
pub fn issue(cipher: &dyn NonceCipher, key: &Psk, time_ms: i64) -> Result<String, NonceError> {
    let blob = cipher.wrap(key, &time_ms.to_be_bytes())?;
    Ok(URL_SAFE_NO_PAD.encode(blob))
}

/// Unwrap a token, returning the time it carries
pub fn open(cipher: &dyn NonceCipher, key: &Psk, token: &str) -> Result<i64, NonceError> {
    let blob = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(NonceError::TokenEncoding)?;
    let payload = cipher.unwrap(key, &blob)?;
    let bytes: [u8; 8] = payload
        .as_slice()
        .try_into()
        .map_err(|_| NonceError::Payload(payload.len()))?;
    Ok(i64::from_be_bytes(bytes))
}

/// Check that `token` carries exactly `expected_ms`
///
/// The timestamp comparison runs in constant time.
pub fn verify(cipher: &dyn NonceCipher, key: &Psk, token: &str, expected_ms: i64) -> bool {
    match open(cipher, key, token) {
        Ok(t) => bool::from(t.to_be_bytes()[..].ct_eq(&expected_ms.to_be_bytes()[..])),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> Psk {
        Psk::new(&[fill; AES_KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_issue_and_open() {
        let token = issue(&AesGcmCipher, &key(7), 1_700_000_000_123).unwrap();
        assert!(!token.contains('='));
        assert!(!token.contains('+') && !token.contains('/'));
        assert_eq!(open(&AesGcmCipher, &key(7), &token).unwrap(), 1_700_000_000_123);
        assert!(verify(&AesGcmCipher, &key(7), &token, 1_700_000_000_123));
        assert!(!verify(&AesGcmCipher, &key(7), &token, 1_700_000_000_124));
    }

    #[test]
    fn test_tokens_differ_for_same_time() {
        let a = issue(&AesGcmCipher, &key(1), 42).unwrap();
        let b = issue(&AesGcmCipher, &key(1), 42).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_or_tampering_is_rejected() {
        let token = issue(&AesGcmCipher, &key(1), 42).unwrap();
        assert!(matches!(
            open(&AesGcmCipher, &key(2), &token),
            Err(NonceError::Rejected)
        ));

        let mut blob = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(blob);
        assert!(open(&AesGcmCipher, &key(1), &tampered).is_err());

        assert!(matches!(
            open(&AesGcmCipher, &key(1), "AAAA"),
            Err(NonceError::Rejected)
        ));
        assert!(matches!(
            open(&AesGcmCipher, &key(1), "not base64!"),
            Err(NonceError::TokenEncoding(_))
        ));
    }

    #[test]
    fn test_psk_parsing() {
        let hex_key = "00".repeat(AES_KEY_SIZE);
        assert!(Psk::from_hex(&hex_key).is_ok());
        assert!(matches!(
            Psk::from_hex("0011"),
            Err(NonceError::InvalidKey(2))
        ));
        assert!(matches!(
            Psk::from_hex("zz"),
            Err(NonceError::KeyEncoding(_))
        ));
        assert_eq!(format!("{:?}", key(9)), "Psk(..)");
    }
}
