//! Authentication mechanisms for incoming requests.
//!
//! Two mechanisms exist: session (an upstream layer already resolved the
//! user) and bearer token. [`AuthChain`] tries them in order; a mechanism
//! that finds no credentials passes the request along, while credentials
//! that are present but rejected are final.

use std::sync::LazyLock;

use async_trait::async_trait;
use axum::http::header;
use axum::http::request::Parts;
use regex_lite::Regex;

use crate::token::{Purpose, TokenError};
use crate::user::User;
use crate::verifier::TokenVerifier;

/// Challenge sent with every 401 response.
pub const CHALLENGE: &str = "Bearer realm=\"api\"";

/// Scheme keyword is case-sensitive and the token needs at least one
/// character, so `"Bearer "` on its own counts as no credentials.
static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Bearer (.+)$").unwrap());

type Outcome = Option<(User, Option<String>)>;

/// One authentication mechanism.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Try to authenticate the request from its head.
    ///
    /// `Ok(None)` means this mechanism found no credentials to act on.
    async fn authenticate(&self, parts: &Parts) -> Result<Outcome, TokenError>;
}

/// User resolved by an upstream session layer.
#[derive(Clone, Debug)]
pub struct SessionUser(pub User);

/// Session passthrough: picks up a [`SessionUser`] extension when one is
/// present and the account is still active.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionAuth;

#[async_trait]
impl Authenticate for SessionAuth {
    async fn authenticate(&self, parts: &Parts) -> Result<Outcome, TokenError> {
        match parts.extensions.get::<SessionUser>() {
            Some(SessionUser(user)) if user.is_active() => {
                Ok(Some((user.clone(), None)))
            },
            _ => Ok(None),
        }
    }
}

/// Self-contained bearer-token authentication.
pub struct BearerAuth {
    verifier: TokenVerifier,
}

impl BearerAuth {
    /// Create a new [`BearerAuth`] instance.
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl Authenticate for BearerAuth {
    async fn authenticate(&self, parts: &Parts) -> Result<Outcome, TokenError> {
        let Some(value) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
        else {
            return Ok(None);
        };
        let Some(token) = BEARER
            .captures(value)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str())
        else {
            return Ok(None);
        };

        let verification =
            self.verifier.verify(token, Purpose::Authentication).await?;
        Ok(Some((verification.user, Some(verification.token))))
    }
}

/// Ordered list of mechanisms, first match wins.
#[derive(Default)]
pub struct AuthChain {
    mechanisms: Vec<Box<dyn Authenticate>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mechanism to the chain.
    pub fn with(mut self, mechanism: impl Authenticate + 'static) -> Self {
        self.mechanisms.push(Box::new(mechanism));
        self
    }

    /// Run mechanisms in order until one produces a user.
    pub async fn authenticate(&self, parts: &Parts) -> Result<Outcome, TokenError> {
        for mechanism in &self.mechanisms {
            if let Some(found) = mechanism.authenticate(parts).await? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}
