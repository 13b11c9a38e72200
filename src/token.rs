//! Self-contained authentication tokens.
//!
//! A token is a signed envelope around three claims: the subject, a purpose
//! tag and an identifying claim. The issuance timestamp lives in the
//! envelope itself, so a token's age can be checked without any lookup.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::database::StoreError;
use crate::ledger::{LedgerError, LedgerStore, OutstandingToken};
use crate::signer::{Signer, SignerError};

/// Identifying-claim field name, unless configured otherwise.
pub const DEFAULT_JTI_CLAIM: &str = "jti";

/// Refresh tokens live 15 days, unless configured otherwise.
pub const DEFAULT_REFRESH_MAX_AGE: u64 = 60 * 60 * 24 * 15;

const JTI_BYTES: usize = 16;

/// Why a token was rejected.
///
/// Callers answering unauthenticated requests must collapse every variant
/// except [`TokenError::Store`] into one generic rejection; the precise kind
/// is for logs only.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signature does not match")]
    BadSignature,

    #[error("token is too old")]
    Expired,

    #[error("token purpose does not match")]
    PurposeMismatch,

    #[error("no user behind token")]
    UserNotFound,

    #[error("user account is deactivated")]
    UserInactive,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SignerError> for TokenError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Expired => TokenError::Expired,
            SignerError::BadSignature | SignerError::EmptySecret => {
                TokenError::BadSignature
            },
        }
    }
}

/// What a token is allowed to be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Proves identity on API requests.
    Authentication,
    /// Exchanges for a fresh token pair.
    Refresh,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Purpose::Authentication => write!(f, "authentication"),
            Purpose::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims asserted by a token.
#[derive(Clone, Debug, PartialEq)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    pub purpose: Purpose,
    /// Identifying claim, unique per token.
    pub jti: String,
}

/// A freshly encoded token.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
}

/// A decoded and signature-checked token.
#[derive(Clone, Debug)]
pub struct DecodedToken {
    pub claims: Claims,
    pub issued_at: DateTime<Utc>,
}

/// Encode and decode tokens through the [`Signer`].
#[derive(Clone)]
pub struct TokenCodec {
    signer: Signer,
    jti_claim: String,
}

impl TokenCodec {
    /// Create a new [`TokenCodec`] instance.
    pub fn new(signer: Signer) -> Self {
        Self {
            signer,
            jti_claim: DEFAULT_JTI_CLAIM.to_owned(),
        }
    }

    /// Set the identifying-claim field name.
    pub fn jti_claim(mut self, name: &str) -> Self {
        self.jti_claim = name.to_owned();
        self
    }

    /// Encode a token for `user_id` issued at `issued_at`.
    pub fn encode(
        &self,
        user_id: &str,
        purpose: Purpose,
        issued_at: DateTime<Utc>,
    ) -> IssuedToken {
        let mut bytes = [0u8; JTI_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let jti = hex::encode(bytes);

        let mut payload = serde_json::Map::new();
        payload.insert("sub".to_owned(), Value::String(user_id.to_owned()));
        payload.insert("purpose".to_owned(), serde_json::json!(purpose));
        payload.insert(self.jti_claim.clone(), Value::String(jti.clone()));
        let payload = Value::Object(payload).to_string();

        let token = self
            .signer
            .sign_at(payload.as_bytes(), issued_at.timestamp());

        IssuedToken {
            token,
            jti,
            issued_at,
        }
    }

    /// Decode a raw token, expecting `purpose`.
    ///
    /// `max_age` is in seconds; `None` disables the age check.
    pub fn decode(
        &self,
        raw: &str,
        expected: Purpose,
        max_age: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<DecodedToken, TokenError> {
        let (payload, issued_at) =
            self.signer.unsign_at(raw, max_age, now.timestamp())?;

        // A verified payload that does not parse back into claims was not
        // produced by this codec.
        let value: Value = serde_json::from_slice(&payload)
            .map_err(|_| TokenError::BadSignature)?;
        let sub = value
            .get("sub")
            .and_then(Value::as_str)
            .ok_or(TokenError::BadSignature)?;
        let purpose: Purpose = value
            .get("purpose")
            .cloned()
            .and_then(|p| serde_json::from_value(p).ok())
            .ok_or(TokenError::BadSignature)?;
        let jti = value
            .get(&self.jti_claim)
            .and_then(Value::as_str)
            .ok_or(TokenError::BadSignature)?;

        if purpose != expected {
            return Err(TokenError::PurposeMismatch);
        }

        let issued_at = DateTime::from_timestamp(issued_at, 0)
            .ok_or(TokenError::BadSignature)?;

        Ok(DecodedToken {
            claims: Claims {
                sub: sub.to_owned(),
                purpose,
                jti: jti.to_owned(),
            },
            issued_at,
        })
    }
}

/// An authentication/refresh token pair.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
    /// Lifetime of `token` in seconds, when one is configured.
    pub expires_in: Option<u64>,
}

/// Mint token pairs and record refresh tokens as outstanding.
#[derive(Clone)]
pub struct TokenIssuer {
    codec: TokenCodec,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    auth_max_age: Option<u64>,
    refresh_max_age: u64,
}

impl TokenIssuer {
    /// Create a new [`TokenIssuer`] instance.
    pub fn new(
        codec: TokenCodec,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        auth_max_age: Option<u64>,
        refresh_max_age: u64,
    ) -> Self {
        Self {
            codec,
            ledger,
            clock,
            auth_max_age,
            refresh_max_age,
        }
    }

    /// Issue a fresh pair for `user_id`.
    ///
    /// The refresh token is recorded in the ledger before either token is
    /// handed out, so it is revocable from the moment it exists.
    pub async fn issue_pair(&self, user_id: &str) -> Result<TokenPair, LedgerError> {
        let now = self.clock.now();
        let access = self.codec.encode(user_id, Purpose::Authentication, now);
        let refresh = self.codec.encode(user_id, Purpose::Refresh, now);

        self.ledger
            .record_outstanding(&OutstandingToken {
                jti: refresh.jti.clone(),
                user_id: user_id.to_owned(),
                token: refresh.token.clone(),
                created_at: now,
                expires_at: now + Duration::seconds(self.refresh_max_age as i64),
            })
            .await?;

        Ok(TokenPair {
            token: access.token,
            refresh_token: refresh.token,
            expires_in: self.auth_max_age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(Signer::new(b"an-amazing-secret").unwrap())
    }

    fn at(timestamp: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(timestamp, 0).unwrap()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let codec = codec();
        let issued = codec.encode("alice", Purpose::Authentication, at(1_700_000_000));

        let decoded = codec
            .decode(&issued.token, Purpose::Authentication, Some(3600), at(1_700_000_010))
            .unwrap();

        assert_eq!(decoded.claims.sub, "alice");
        assert_eq!(decoded.claims.purpose, Purpose::Authentication);
        assert_eq!(decoded.claims.jti, issued.jti);
        assert_eq!(decoded.issued_at, at(1_700_000_000));
    }

    #[test]
    fn test_jti_is_unique_per_token() {
        let codec = codec();
        let now = at(1_700_000_000);

        let first = codec.encode("alice", Purpose::Refresh, now);
        let second = codec.encode("alice", Purpose::Refresh, now);
        assert_ne!(first.jti, second.jti);
    }

    #[test]
    fn test_purpose_cannot_be_replayed() {
        let codec = codec();
        let now = at(1_700_000_000);

        let refresh = codec.encode("alice", Purpose::Refresh, now);
        let result = codec.decode(&refresh.token, Purpose::Authentication, None, now);
        assert!(matches!(result, Err(TokenError::PurposeMismatch)));

        let access = codec.encode("alice", Purpose::Authentication, now);
        let result = codec.decode(&access.token, Purpose::Refresh, None, now);
        assert!(matches!(result, Err(TokenError::PurposeMismatch)));
    }

    #[test]
    fn test_decode_respects_max_age() {
        let codec = codec();
        let issued = codec.encode("alice", Purpose::Authentication, at(1_700_000_000));

        let result = codec.decode(
            &issued.token,
            Purpose::Authentication,
            Some(3600),
            at(1_700_003_601),
        );
        assert!(matches!(result, Err(TokenError::Expired)));
    }

    #[test]
    fn test_configured_jti_claim_name() {
        let signer = Signer::new(b"an-amazing-secret").unwrap();
        let renamed = TokenCodec::new(signer.clone()).jti_claim("token_id");
        let now = at(1_700_000_000);

        let issued = renamed.encode("alice", Purpose::Refresh, now);
        let decoded = renamed
            .decode(&issued.token, Purpose::Refresh, None, now)
            .unwrap();
        assert_eq!(decoded.claims.jti, issued.jti);

        // The default codec looks for "jti" and must not find it.
        let result = TokenCodec::new(signer).decode(&issued.token, Purpose::Refresh, None, now);
        assert!(matches!(result, Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_garbage_does_not_decode() {
        let codec = codec();
        let result = codec.decode("not-a-token", Purpose::Authentication, None, at(0));
        assert!(matches!(result, Err(TokenError::BadSignature)));
    }
}
