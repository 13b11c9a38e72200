//! Signet is a stateless bearer-token authentication service with a
//! revocable refresh-token ledger.

#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
mod router;

pub mod auth;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod signer;
pub mod telemetry;
pub mod token;
pub mod user;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use auth::{AuthChain, BearerAuth, SessionAuth};
use clock::{Clock, SystemClock};
use config::Configuration;
use ledger::{LedgerStore, PgLedger};
use signer::Signer;
use token::{DEFAULT_REFRESH_MAX_AGE, TokenCodec, TokenIssuer};
use user::{PgUserStore, UserStore};
use verifier::TokenVerifier;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    authorization: Option<String>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(authorization) = authorization {
        builder = builder.header(header::AUTHORIZATION, authorization);
    }

    app.oneshot(builder.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub clock: Arc<dyn Clock>,
    pub verifier: TokenVerifier,
    pub issuer: TokenIssuer,
    pub auth: Arc<AuthChain>,
}

impl AppState {
    /// Wire verification, issuance and the authentication chain from their
    /// collaborators.
    pub fn new(
        config: Arc<Configuration>,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        signer: Signer,
    ) -> Self {
        let mut codec = TokenCodec::new(signer);
        if let Some(name) = &config.token.jti_claim {
            codec = codec.jti_claim(name);
        }
        let auth_max_age = config.token.max_age_auth_token;
        let refresh_max_age = config
            .token
            .max_age_refresh_token
            .unwrap_or(DEFAULT_REFRESH_MAX_AGE);

        let verifier = TokenVerifier::new(
            codec.clone(),
            Arc::clone(&users),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            auth_max_age,
            refresh_max_age,
        );
        let issuer = TokenIssuer::new(
            codec,
            Arc::clone(&ledger),
            Arc::clone(&clock),
            auth_max_age,
            refresh_max_age,
        );
        let auth = Arc::new(
            AuthChain::new()
                .with(SessionAuth)
                .with(BearerAuth::new(verifier.clone())),
        );

        Self {
            config,
            users,
            ledger,
            clock,
            verifier,
            issuer,
            auth,
        }
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    DefaultOnResponse::new().latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let users_router = Router::new()
        // `GET /users/@me` goes to `users`. Authorization required.
        .route("/@me", get(router::users::handler))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::auth,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /oauth/token` rotates a refresh token.
        .route("/oauth/token", post(router::oauth::refresh))
        // `POST /oauth/revoke` blacklists a refresh token.
        .route("/oauth/revoke", post(router::oauth::revoke))
        .nest("/users", users_router)
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            // The ledger and user bookkeeping live in PostgreSQL.
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    // handle token signing.
    let secret = std::env::var("SIGNING_SECRET")
        .expect("missing `SIGNING_SECRET` environnement variable");
    let signer = Signer::new(secret)?;

    let users = Arc::new(PgUserStore::new(db.postgres.clone()));
    let ledger = Arc::new(PgLedger::new(db.postgres.clone()));

    Ok(AppState::new(
        config,
        users,
        ledger,
        Arc::new(SystemClock),
        signer,
    ))
}
