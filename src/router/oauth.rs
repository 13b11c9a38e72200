//! OAuth2-style token rotation and revocation.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::AppState;
use crate::clock::Clock;
use crate::error::Result;
use crate::ledger::LedgerError;
use crate::router::Valid;
use crate::token::{Purpose, TokenError};

pub const TOKEN_TYPE: &str = "Bearer";

fn validate_grant_type(grant_type: &str) -> std::result::Result<(), ValidationError> {
    // As specified on OAuth2.0 spec, reject if grant_type is not valid.
    if grant_type != "refresh_token" {
        return Err(ValidationError::new("invalid_grant_type"));
    }

    Ok(())
}

fn invalid_refresh_token() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "refresh_token",
        ValidationError::new("refresh_token")
            .with_message("Invalid refresh token.".into()),
    );
    errors
}

#[derive(Debug, Validate, Deserialize)]
pub struct RefreshBody {
    #[validate(length(min = 1))]
    refresh_token: String,
    #[validate(custom(
        function = "validate_grant_type",
        message = "\"grant_type\" must be \"refresh_token\"."
    ))]
    grant_type: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub token_type: String,
    pub token: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Get a new token pair with a refresh token.
///
/// The presented token is rotated out: its identifying claim goes on the
/// blacklist before the replacement pair is issued, so a replayed refresh
/// token dies with the rotation.
pub async fn refresh(
    State(state): State<AppState>,
    Valid(body): Valid<RefreshBody>,
) -> Result<Json<Response>> {
    let verification = match state
        .verifier
        .verify(&body.refresh_token, Purpose::Refresh)
        .await
    {
        Ok(verification) => verification,
        Err(TokenError::Store(err)) => return Err(err.into()),
        Err(err) => {
            tracing::debug!(reason = %err, "refresh token rejected");
            return Err(invalid_refresh_token().into());
        },
    };

    match state
        .ledger
        .blacklist(&verification.claims.jti, state.clock.now())
        .await
    {
        Ok(()) => {},
        // Never recorded at issuance, so not rotatable either.
        Err(LedgerError::NotOutstanding { .. }) => {
            return Err(invalid_refresh_token().into());
        },
        Err(err) => return Err(err.into()),
    }

    let pair = state.issuer.issue_pair(&verification.user.id).await?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE.to_owned(),
        token: pair.token,
        refresh_token: pair.refresh_token,
        expires_in: pair.expires_in,
    }))
}

#[derive(Debug, Validate, Deserialize)]
pub struct RevokeBody {
    #[validate(length(min = 1))]
    token: String,
}

/// Revoke a refresh token by blacklisting its identifying claim.
///
/// As specified on rfc7009, revoking an invalid or already-revoked token
/// still answers 200.
pub async fn revoke(
    State(state): State<AppState>,
    Valid(body): Valid<RevokeBody>,
) -> Result<StatusCode> {
    let verification = match state
        .verifier
        .verify(&body.token, Purpose::Refresh)
        .await
    {
        Ok(verification) => verification,
        Err(TokenError::Store(err)) => return Err(err.into()),
        Err(err) => {
            tracing::debug!(reason = %err, "revocation target rejected");
            return Ok(StatusCode::OK);
        },
    };

    match state
        .ledger
        .blacklist(&verification.claims.jti, state.clock.now())
        .await
    {
        Ok(()) | Err(LedgerError::NotOutstanding { .. }) => Ok(StatusCode::OK),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::make_request;
    use crate::router::harness;

    #[tokio::test]
    async fn test_refresh_rotates_the_pair() {
        let harness = harness::state();
        harness.users.insert(harness::user("admin")).await;
        let pair = harness.state.issuer.issue_pair("admin").await.unwrap();

        let response = make_request(
            harness.app.clone(),
            Method::POST,
            "/oauth/token",
            None,
            json!({ "refresh_token": pair.refresh_token, "grant_type": "refresh_token" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.token_type, TOKEN_TYPE);
        assert_eq!(body.expires_in, Some(3600));
        assert_ne!(body.refresh_token, pair.refresh_token);

        // The old refresh token died with the rotation.
        let replay = make_request(
            harness.app,
            Method::POST,
            "/oauth/token",
            None,
            json!({ "refresh_token": pair.refresh_token, "grant_type": "refresh_token" })
                .to_string(),
        )
        .await;
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refresh_rejects_wrong_grant_type() {
        let harness = harness::state();
        harness.users.insert(harness::user("admin")).await;
        let pair = harness.state.issuer.issue_pair("admin").await.unwrap();

        let response = make_request(
            harness.app,
            Method::POST,
            "/oauth/token",
            None,
            json!({ "refresh_token": pair.refresh_token, "grant_type": "password" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refresh_rejects_authentication_token() {
        let harness = harness::state();
        harness.users.insert(harness::user("admin")).await;
        let pair = harness.state.issuer.issue_pair("admin").await.unwrap();

        // The short-lived token cannot stand in for the refresh token.
        let response = make_request(
            harness.app,
            Method::POST,
            "/oauth/token",
            None,
            json!({ "refresh_token": pair.token, "grant_type": "refresh_token" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_revoke_then_refresh_fails() {
        let harness = harness::state();
        harness.users.insert(harness::user("admin")).await;
        let pair = harness.state.issuer.issue_pair("admin").await.unwrap();

        let response = make_request(
            harness.app.clone(),
            Method::POST,
            "/oauth/revoke",
            None,
            json!({ "token": pair.refresh_token }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let refresh = make_request(
            harness.app.clone(),
            Method::POST,
            "/oauth/token",
            None,
            json!({ "refresh_token": pair.refresh_token, "grant_type": "refresh_token" })
                .to_string(),
        )
        .await;
        assert_eq!(refresh.status(), StatusCode::BAD_REQUEST);

        // Revocation stays 200 on replay.
        let again = make_request(
            harness.app,
            Method::POST,
            "/oauth/revoke",
            None,
            json!({ "token": pair.refresh_token }).to_string(),
        )
        .await;
        assert_eq!(again.status(), StatusCode::OK);
    }
}
