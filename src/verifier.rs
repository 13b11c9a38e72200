//! Token verification protocol.
//!
//! Verification is stateless for authentication tokens: signature and age
//! checks come from the token itself, then the subject is resolved against
//! the user store. Refresh tokens additionally consult the revocation
//! ledger, which is what makes them revocable at all.

use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::ledger::LedgerStore;
use crate::token::{Claims, Purpose, TokenCodec, TokenError};
use crate::user::{User, UserStore};

/// Do not rewrite `last_login` more than once a minute.
const LAST_LOGIN_THROTTLE_SECS: i64 = 60;

/// A verified token and the user behind it.
#[derive(Clone, Debug)]
pub struct Verification {
    pub user: User,
    /// The raw credential, as presented.
    pub token: String,
    pub claims: Claims,
}

/// Check raw tokens and resolve them to live users.
#[derive(Clone)]
pub struct TokenVerifier {
    codec: TokenCodec,
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    auth_max_age: Option<u64>,
    refresh_max_age: u64,
}

impl TokenVerifier {
    /// Create a new [`TokenVerifier`] instance.
    pub fn new(
        codec: TokenCodec,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        auth_max_age: Option<u64>,
        refresh_max_age: u64,
    ) -> Self {
        Self {
            codec,
            users,
            ledger,
            clock,
            auth_max_age,
            refresh_max_age,
        }
    }

    /// Verify `raw` as a token of `expected` purpose.
    pub async fn verify(
        &self,
        raw: &str,
        expected: Purpose,
    ) -> Result<Verification, TokenError> {
        let now = self.clock.now();
        let max_age = match expected {
            Purpose::Authentication => self.auth_max_age,
            Purpose::Refresh => Some(self.refresh_max_age),
        };

        let decoded = self.codec.decode(raw, expected, max_age, now)?;

        let mut user = self
            .users
            .find(&decoded.claims.sub)
            .await?
            .ok_or(TokenError::UserNotFound)?;
        if !user.is_active() {
            return Err(TokenError::UserInactive);
        }

        if expected == Purpose::Refresh
            && self.ledger.is_blacklisted(&decoded.claims.jti).await?
        {
            return Err(TokenError::TokenRevoked);
        }

        if expected == Purpose::Authentication {
            self.refresh_last_login(&mut user).await;
        }

        Ok(Verification {
            user,
            token: raw.to_owned(),
            claims: decoded.claims,
        })
    }

    /// Throttled `last_login` write.
    ///
    /// A user with no recorded login is written immediately; otherwise the
    /// timestamp is only refreshed once it is more than a minute stale.
    /// Concurrent requests inside the window may race; last write wins and
    /// the write never fails the authentication itself.
    async fn refresh_last_login(&self, user: &mut User) {
        let now = self.clock.now();
        let stale = match user.last_login {
            None => true,
            Some(at) => at < now - Duration::seconds(LAST_LOGIN_THROTTLE_SECS),
        };
        if !stale {
            return;
        }

        match self.users.mark_last_login(&user.id, now).await {
            Ok(()) => user.last_login = Some(now),
            Err(err) => {
                tracing::warn!(
                    user_id = %user.id,
                    error = %err,
                    "last_login update failed"
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{MemoryLedger, OutstandingToken};
    use crate::signer::Signer;
    use crate::token::DEFAULT_REFRESH_MAX_AGE;
    use crate::user::MemoryUserStore;

    struct Fixture {
        verifier: TokenVerifier,
        codec: TokenCodec,
        users: Arc<MemoryUserStore>,
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let codec = TokenCodec::new(Signer::new(b"an-amazing-secret").unwrap());
        let users = Arc::new(MemoryUserStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));

        let verifier = TokenVerifier::new(
            codec.clone(),
            Arc::clone(&users) as Arc<dyn UserStore>,
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Some(3600),
            DEFAULT_REFRESH_MAX_AGE,
        );

        Fixture {
            verifier,
            codec,
            users,
            ledger,
            clock,
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_owned(),
            username: id.to_owned(),
            locale: "en".to_owned(),
            last_login: None,
            created_at: Utc::now().date_naive(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_verify_authentication_token() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        f.clock.advance(Duration::seconds(10));

        let verification = f
            .verifier
            .verify(&issued.token, Purpose::Authentication)
            .await
            .unwrap();
        assert_eq!(verification.user.id, "alice");
        assert_eq!(verification.token, issued.token);
        assert_eq!(verification.claims.jti, issued.jti);
    }

    #[tokio::test]
    async fn test_verify_rejects_old_token() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        f.clock.advance(Duration::seconds(3601));

        let result = f.verifier.verify(&issued.token, Purpose::Authentication).await;
        assert!(matches!(result, Err(TokenError::Expired)));
    }

    #[tokio::test]
    async fn test_no_max_age_means_no_expiry() {
        let f = fixture();
        f.users.insert(user("alice")).await;
        let verifier = TokenVerifier::new(
            f.codec.clone(),
            Arc::clone(&f.users) as Arc<dyn UserStore>,
            Arc::clone(&f.ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&f.clock) as Arc<dyn Clock>,
            None,
            DEFAULT_REFRESH_MAX_AGE,
        );

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        f.clock.advance(Duration::days(400));

        assert!(
            verifier
                .verify(&issued.token, Purpose::Authentication)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_verify_unknown_user() {
        let f = fixture();

        let issued = f.codec.encode("ghost", Purpose::Authentication, f.clock.now());
        let result = f.verifier.verify(&issued.token, Purpose::Authentication).await;
        assert!(matches!(result, Err(TokenError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_verify_deactivated_user() {
        let f = fixture();
        let mut alice = user("alice");
        alice.deleted_at = Some(Utc::now().date_naive());
        f.users.insert(alice).await;

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        let result = f.verifier.verify(&issued.token, Purpose::Authentication).await;
        assert!(matches!(result, Err(TokenError::UserInactive)));
    }

    #[tokio::test]
    async fn test_purpose_mismatch_is_final() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let refresh = f.codec.encode("alice", Purpose::Refresh, f.clock.now());
        let result = f.verifier.verify(&refresh.token, Purpose::Authentication).await;
        assert!(matches!(result, Err(TokenError::PurposeMismatch)));
    }

    #[tokio::test]
    async fn test_blacklisted_refresh_token_is_revoked() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let now = f.clock.now();
        let issued = f.codec.encode("alice", Purpose::Refresh, now);
        f.ledger
            .record_outstanding(&OutstandingToken {
                jti: issued.jti.clone(),
                user_id: "alice".to_owned(),
                token: issued.token.clone(),
                created_at: now,
                expires_at: now + Duration::days(15),
            })
            .await
            .unwrap();

        // Valid while outstanding, rejected once blacklisted.
        assert!(f.verifier.verify(&issued.token, Purpose::Refresh).await.is_ok());

        f.ledger.blacklist(&issued.jti, now).await.unwrap();
        let result = f.verifier.verify(&issued.token, Purpose::Refresh).await;
        assert!(matches!(result, Err(TokenError::TokenRevoked)));
    }

    #[tokio::test]
    async fn test_first_login_writes_immediately() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        f.verifier
            .verify(&issued.token, Purpose::Authentication)
            .await
            .unwrap();

        let alice = f.users.get("alice").await.unwrap();
        assert_eq!(alice.last_login, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_last_login_throttled_inside_window() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let issued = f.codec.encode("alice", Purpose::Authentication, f.clock.now());
        f.verifier
            .verify(&issued.token, Purpose::Authentication)
            .await
            .unwrap();
        let first_login = f.users.get("alice").await.unwrap().last_login;

        // A second request five seconds later stays inside the window.
        f.clock.advance(Duration::seconds(5));
        f.verifier
            .verify(&issued.token, Purpose::Authentication)
            .await
            .unwrap();
        assert_eq!(f.users.get("alice").await.unwrap().last_login, first_login);

        // Past the window the timestamp moves.
        f.clock.advance(Duration::seconds(61));
        f.verifier
            .verify(&issued.token, Purpose::Authentication)
            .await
            .unwrap();
        let refreshed = f.users.get("alice").await.unwrap().last_login;
        assert_eq!(refreshed, Some(f.clock.now()));
        assert_ne!(refreshed, first_login);
    }

    #[tokio::test]
    async fn test_refresh_verification_does_not_touch_last_login() {
        let f = fixture();
        f.users.insert(user("alice")).await;

        let now = f.clock.now();
        let issued = f.codec.encode("alice", Purpose::Refresh, now);
        f.ledger
            .record_outstanding(&OutstandingToken {
                jti: issued.jti.clone(),
                user_id: "alice".to_owned(),
                token: issued.token.clone(),
                created_at: now,
                expires_at: now + Duration::days(15),
            })
            .await
            .unwrap();

        f.verifier.verify(&issued.token, Purpose::Refresh).await.unwrap();
        assert_eq!(f.users.get("alice").await.unwrap().last_login, None);
    }
}
