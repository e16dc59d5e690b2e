//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::SharedGateway;
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{InMemoryPaymentGateway, StripeGateway};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use store::{CommerceStore, InMemoryStore, PostgresStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn payment_gateway(config: &Config) -> SharedGateway {
    match &config.payment.secret_key {
        Some(key) => {
            tracing::info!(api_base = %config.payment.api_base, "using hosted payment gateway");
            Arc::new(StripeGateway::new(
                key.clone(),
                config.payment.api_base.clone(),
                config.payment.currency.clone(),
            ))
        }
        None => {
            tracing::warn!("PAYMENT_SECRET_KEY not set, using in-memory payment gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

async fn serve<S: CommerceStore + Clone + 'static>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let gateway = payment_gateway(&config);
    if config.payment.webhook_secret.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, payment webhooks will be refused");
    }
    if config.identity_webhook_secret.is_none() {
        tracing::warn!("IDENTITY_WEBHOOK_SECRET not set, no users can be provisioned");
    }

    let state = api::create_state(store, gateway, &config);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;

    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url.expose_secret())
                .await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("connected to PostgreSQL, migrations applied");
            serve(store, config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(InMemoryStore::new(), config, metrics_handle).await
        }
    }
}
