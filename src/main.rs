use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Router};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use conductor::auth::{AuthState, Authenticator, OidcAuthenticator, TokenAuthenticator};
use conductor::commander::Commander;
use conductor::store::metrics::{MetricSink, PgMetricSink};
use conductor::vault::{Vault, VaultCipher};
use conductor::{api, config, workers};

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::LOG_LEVEL.as_str()));
    if config::LOG_FORMAT.as_str() == "pretty" {
        fmt().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).json().init();
    }

    // Fail fast on required configuration.
    let cipher = VaultCipher::from_hex_key(config::VAULT_KEY.as_str())
        .map_err(|e| format!("vault key: {e}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(config::DATABASE_URL.as_str())
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let metrics_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::METRICS_DATABASE_URL.as_str())
        .await?;
    if config::METRICS_DATABASE_URL.as_str() != config::DATABASE_URL.as_str() {
        sqlx::migrate!("./migrations_metrics").run(&metrics_pool).await?;
    }
    let lock_pool = PgPoolOptions::new()
        .max_connections(3)
        .connect(config::LOCK_DATABASE_URL.as_str())
        .await?;

    let vault = Vault::new(pool.clone(), cipher);
    let commander = Commander::new(pool.clone(), vault.clone());
    let metric_sink: Arc<dyn MetricSink> = Arc::new(PgMetricSink::new(metrics_pool));

    let mut authenticators: Vec<Box<dyn Authenticator>> = Vec::new();
    for name in config::AUTHENTICATORS.iter() {
        match name.as_str() {
            "token" => authenticators.push(Box::new(TokenAuthenticator::new(pool.clone()))),
            "oauth" => {
                let issuer = config::OAUTH_ISSUER
                    .clone()
                    .ok_or("CONDUCTOR_OAUTH_ISSUER must be set for the oauth authenticator")?;
                let client_id = config::OAUTH_CLIENT_ID
                    .clone()
                    .ok_or("CONDUCTOR_OAUTH_CLIENT_ID must be set for the oauth authenticator")?;
                authenticators.push(Box::new(OidcAuthenticator::new(issuer, client_id)));
            }
            other => return Err(format!("unknown authenticator: {other}").into()),
        }
    }
    if authenticators.is_empty() {
        return Err("at least one authenticator must be configured".into());
    }
    let auth = AuthState::new(authenticators);

    workers::spawn_all(pool.clone(), lock_pool, commander.clone());

    let app = api::routes()
        .layer(Extension(pool.clone()))
        .layer(Extension(commander))
        .layer(Extension(vault))
        .layer(Extension(metric_sink))
        .layer(Extension(auth.clone()));

    let health_app: Router = api::health::routes()
        .layer(Extension(pool))
        .layer(Extension(auth));

    let health_addr: SocketAddr = ([0, 0, 0, 0], *config::HEALTH_PORT).into();
    tokio::spawn(async move {
        tracing::info!(%health_addr, "health endpoints listening");
        if let Err(err) = axum::Server::bind(&health_addr)
            .serve(health_app.into_make_service())
            .await
        {
            tracing::error!(?err, "health server failed");
        }
    });

    let addr: SocketAddr = ([0, 0, 0, 0], *config::API_PORT).into();
    tracing::info!(%addr, "control plane listening");
    let drain_started = Arc::new(tokio::sync::Notify::new());
    let drain_trigger = drain_started.clone();
    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { drain_trigger.notified().await });
    let server_task = tokio::spawn(server);

    shutdown_signal().await;
    drain_started.notify_one();

    // Drain for the configured window, then abort what is left; committed
    // transactions stay committed.
    let drain = std::time::Duration::from_secs(*config::SHUTDOWN_TIMEOUT_SECONDS);
    match tokio::time::timeout(drain, server_task).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!("shutdown drain timed out, aborting in-flight requests"),
    }
    Ok(())
}
