//! Users-related HTTP API.

use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::User;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub username: String,
    pub locale: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: chrono::NaiveDate,
}

/// Current user, as resolved by the authentication chain.
pub async fn handler(Extension(user): Extension<User>) -> Json<Response> {
    Json(Response {
        id: user.id,
        username: user.username,
        locale: user.locale,
        last_login: user.last_login,
        created_at: user.created_at,
    })
}
