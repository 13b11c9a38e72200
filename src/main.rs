use signet::{app, initialize_state, telemetry};

#[tokio::main]
async fn main() {
    telemetry::setup_logging();

    let state = match initialize_state().await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "state initialization failed");
            return;
        },
    };
    let app = app(state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "1111".to_string())
        .parse::<u16>()
        .unwrap_or(1111);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await
    {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %port, "cannot bind port");
            return;
        },
    };

    tracing::info!(%port, "server started");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped unexpectedly");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("cannot install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("cannot install SIGTERM handler")
        .recv()
        .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
