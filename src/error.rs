//! Error handler for signet.

use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::auth::CHALLENGE;
use crate::database::StoreError;
use crate::ledger::LedgerError;
use crate::token::TokenError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl From<LedgerError> for ServerError {
    fn from(err: LedgerError) -> Self {
        match err {
            // Transient store failures must not read as client mistakes.
            LedgerError::Store(err) => ServerError::Store(err),
            err => ServerError::Ledger(err),
        }
    }
}

impl ServerError {
    /// Collapse a rejected credential into one opaque 401.
    ///
    /// The precise kind goes to the log; the response must not let an
    /// unauthenticated caller distinguish a bad signature from an unknown
    /// user. Store failures stay transient instead.
    pub fn from_token(err: TokenError) -> Self {
        match err {
            TokenError::Store(err) => ServerError::Store(err),
            err => {
                tracing::debug!(reason = %err, "credentials rejected");
                ServerError::Unauthorized
            },
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .details("The request could not be authenticated.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Store(err) => {
                tracing::error!(error = %err, "backing store unreachable");

                ResponseError::default()
                    .title("Service temporarily unavailable.")
                    .details("Please retry later.")
                    .status(StatusCode::SERVICE_UNAVAILABLE)
            },

            ServerError::Ledger(LedgerError::AlreadyRecorded { .. }) => response
                .title("Token has already been recorded.")
                .status(StatusCode::CONFLICT),

            ServerError::Ledger(_) => response.title("Unknown token."),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        let challenge = matches!(self, ServerError::Unauthorized);
        let mut response = response
            .into_response()
            .unwrap_or_else(|_| internal_server_error());

        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(CHALLENGE),
            );
        }

        response
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
