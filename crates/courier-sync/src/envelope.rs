//! # API Token Envelopes
//!
//! When a study is configured with a pre-shared key, the API token handed
//! out by the credential exchange is not the token itself but a sealed
//! envelope:
//!
//! ```text
//! envelope = HS256-signed JWT (key = pre-shared key)
//!   {
//!     "nonce":      base64(12 bytes),
//!     "cipherText": base64(ciphertext ‖ 16-byte tag),
//!     "cipher":     "AES256-GCM"
//!   }
//!
//! open: verify signature → check cipher id → AES-256-GCM decrypt → UTF-8
//! ```
//!
//! Every way this can go wrong is a [`ClientError::MalformedResponse`]:
//! the exchange service broke its contract, the user data is untouched.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use courier_core::{ClientError, ClientResult};

use crate::error::{SyncError, SyncResult};

/// Cipher identifier an envelope must carry.
pub const ENVELOPE_CIPHER: &str = "AES256-GCM";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

// =============================================================================
// Key
// =============================================================================

/// 256-bit pre-shared envelope key.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey([u8; KEY_LEN]);

impl EnvelopeKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes a base64 key. It must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> SyncResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| SyncError::InvalidConfig(format!("envelope_key is not base64: {e}")))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            SyncError::InvalidConfig(format!(
                "envelope_key must be {KEY_LEN} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey([REDACTED])")
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeClaims {
    nonce: String,
    #[serde(rename = "cipherText")]
    cipher_text: String,
    cipher: String,
}

fn malformed(detail: impl fmt::Display) -> ClientError {
    ClientError::MalformedResponse(format!("api token envelope: {detail}"))
}

/// Verifies and decrypts an envelope, returning the plaintext API token.
pub fn open_envelope(envelope: &str, key: &EnvelopeKey) -> ClientResult<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    let claims = decode::<EnvelopeClaims>(
        envelope,
        &DecodingKey::from_secret(key.as_bytes()),
        &validation,
    )
    .map_err(malformed)?
    .claims;

    if claims.cipher != ENVELOPE_CIPHER {
        return Err(malformed(format!("unsupported cipher '{}'", claims.cipher)));
    }

    let nonce = BASE64.decode(&claims.nonce).map_err(malformed)?;
    if nonce.len() != NONCE_LEN {
        return Err(malformed(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    let cipher_text = BASE64.decode(&claims.cipher_text).map_err(malformed)?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(malformed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), cipher_text.as_ref())
        .map_err(|_| malformed("decryption failed"))?;

    String::from_utf8(plaintext).map_err(|_| malformed("plaintext is not UTF-8"))
}

/// Seals `plaintext` the way the credential exchange does. Test helper.
#[cfg(test)]
pub(crate) fn seal_envelope(
    plaintext: &str,
    key: &EnvelopeKey,
    nonce: [u8; NONCE_LEN],
    cipher_id: &str,
) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
    let cipher_text = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .unwrap();

    let claims = EnvelopeClaims {
        nonce: BASE64.encode(nonce),
        cipher_text: BASE64.encode(cipher_text),
        cipher: cipher_id.to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EnvelopeKey {
        EnvelopeKey::from_bytes([42u8; KEY_LEN])
    }

    #[test]
    fn test_open_envelope() {
        let sealed = seal_envelope("real-api-token", &key(), [1u8; NONCE_LEN], ENVELOPE_CIPHER);
        assert_eq!(open_envelope(&sealed, &key()).unwrap(), "real-api-token");
    }

    #[test]
    fn test_wrong_cipher_id_is_malformed() {
        let sealed = seal_envelope("tok", &key(), [1u8; NONCE_LEN], "AES128-CBC");
        assert!(matches!(
            open_envelope(&sealed, &key()),
            Err(ClientError::MalformedResponse(msg)) if msg.contains("unsupported cipher")
        ));
    }

    #[test]
    fn test_wrong_key_is_malformed() {
        let sealed = seal_envelope("tok", &key(), [1u8; NONCE_LEN], ENVELOPE_CIPHER);
        let other = EnvelopeKey::from_bytes([7u8; KEY_LEN]);
        assert!(matches!(
            open_envelope(&sealed, &other),
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            open_envelope("not.a.jwt", &key()),
            Err(ClientError::MalformedResponse(_))
        ));
        assert!(matches!(
            open_envelope("", &key()),
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_malformed() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = EnvelopeClaims {
            nonce: BASE64.encode([1u8; NONCE_LEN]),
            cipher_text: BASE64.encode(b"definitely not aes-gcm output"),
            cipher: ENVELOPE_CIPHER.to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(key().as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            open_envelope(&token, &key()),
            Err(ClientError::MalformedResponse(msg)) if msg.contains("decryption failed")
        ));
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = BASE64.encode([9u8; KEY_LEN]);
        assert_eq!(EnvelopeKey::from_base64(&encoded).unwrap(), EnvelopeKey::from_bytes([9u8; KEY_LEN]));
        assert!(EnvelopeKey::from_base64("%%%").is_err());
        assert!(EnvelopeKey::from_base64(&BASE64.encode([1u8; 31])).is_err());
        assert_eq!(format!("{:?}", key()), "EnvelopeKey([REDACTED])");
    }
}
