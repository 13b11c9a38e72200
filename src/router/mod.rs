//! HTTP routes.

pub mod oauth;
pub mod status;
pub mod users;

use axum::Json;
use axum::extract::{FromRequest, Request, State};
use axum::middleware;
use axum::response::Response;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Custom middleware for authentification.
///
/// Runs the authentication chain over the request head and stores the
/// resolved user as an extension. An exhausted chain and rejected
/// credentials both end up as the same opaque 401.
pub async fn auth(
    State(state): State<AppState>,
    req: Request,
    next: middleware::Next,
) -> Result<Response> {
    let (parts, body) = req.into_parts();

    match state.auth.authenticate(&parts).await {
        Ok(Some((user, _credential))) => {
            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        },
        Ok(None) => Err(ServerError::Unauthorized),
        Err(err) => Err(ServerError::from_token(err)),
    }
}

/// Json extractor that also runs field validation.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}
