//! Keyed signing of small payloads.
//!
//! Envelopes are self-contained: `v1.<payload>.<timestamp>.<mac>` with each
//! part base64url-encoded (no padding) and the MAC computed over the three
//! preceding parts. The embedded timestamp makes age checks possible without
//! any server-side state.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::clock::unix_now;

/// Envelope format version, bump on algorithm rotation.
const VERSION: &str = "v1";

type HmacSha256 = Hmac<Sha256>;

type Result<T> = std::result::Result<T, SignerError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The envelope is malformed or its MAC does not match.
    #[error("signature does not match envelope")]
    BadSignature,

    /// The envelope is older than the allowed age.
    #[error("envelope age exceeds maximum age")]
    Expired,

    #[error("signing secret is empty")]
    EmptySecret,
}

/// Signs and verifies tamper-evident envelopes with HMAC-SHA256.
#[derive(Clone)]
pub struct Signer {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    /// Create a new [`Signer`] from a server-held secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        if secret.as_ref().is_empty() {
            return Err(SignerError::EmptySecret);
        }

        Ok(Self {
            key: Zeroizing::new(secret.as_ref().to_vec()),
        })
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length, and the secret is non-empty.
        HmacSha256::new_from_slice(&self.key).unwrap_or_else(|_| unreachable!())
    }

    /// Sign `payload` with the current time as issuance timestamp.
    pub fn sign(&self, payload: &[u8]) -> String {
        self.sign_at(payload, unix_now())
    }

    /// Sign `payload` with an explicit issuance timestamp (Unix seconds).
    pub fn sign_at(&self, payload: &[u8], issued_at: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = URL_SAFE_NO_PAD.encode(issued_at.to_string());

        let signed_part = format!("{VERSION}.{payload}.{timestamp}");
        let mut mac = self.mac();
        mac.update(signed_part.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{signed_part}.{signature}")
    }

    /// Verify an envelope against the current time.
    ///
    /// `max_age` is in seconds; `None` disables the age check.
    pub fn unsign(&self, envelope: &str, max_age: Option<u64>) -> Result<(Vec<u8>, i64)> {
        self.unsign_at(envelope, max_age, unix_now())
    }

    /// Verify an envelope and return `(payload, issued_at)`.
    ///
    /// The MAC is checked before anything in the envelope is trusted,
    /// including the timestamp.
    pub fn unsign_at(
        &self,
        envelope: &str,
        max_age: Option<u64>,
        now: i64,
    ) -> Result<(Vec<u8>, i64)> {
        let (signed_part, signature) = envelope
            .rsplit_once('.')
            .ok_or(SignerError::BadSignature)?;

        let mut parts = signed_part.split('.');
        let (Some(version), Some(payload), Some(timestamp), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignerError::BadSignature);
        };
        if version != VERSION {
            return Err(SignerError::BadSignature);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignerError::BadSignature)?;
        let mut mac = self.mac();
        mac.update(signed_part.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignerError::BadSignature)?;

        let issued_at = URL_SAFE_NO_PAD
            .decode(timestamp)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(SignerError::BadSignature)?;

        if let Some(max_age) = max_age {
            // Valid while `now - issued_at <= max_age`.
            if now.saturating_sub(issued_at) > max_age as i64 {
                return Err(SignerError::Expired);
            }
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SignerError::BadSignature)?;

        Ok((payload, issued_at))
    }
}
