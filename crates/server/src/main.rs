//! Ambassador program backend.
//!
//! Serves the referral-tracking API: registration with OTP email
//! verification, permanent referral code assignment, referral counting, and
//! reconciliation imports from an external source of record.
//!
//! # Architecture
//!
//! - Axum web framework, JSON API only
//! - `PostgreSQL` for accounts and referral events
//! - Lettre over SMTP for verification emails
//! - Optional background poller that reconciles counts from an external grid

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use sentry::integrations::tracing as sentry_tracing;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambassador_server::clock::SystemClock;
use ambassador_server::config::AmbassadorConfig;
use ambassador_server::db::postgres::{self, PgStore};
use ambassador_server::routes;
use ambassador_server::services::email::SmtpMailer;
use ambassador_server::services::reconcile::spawn_poller;
use ambassador_server::state::AppState;

/// How long startup waits for the database before giving up.
const DB_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &AmbassadorConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = AmbassadorConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Initialize tracing with EnvFilter and Sentry integration
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ambassador_server=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool and block (bounded) until the
    // database answers, so the API never comes up over a dead store.
    let pool = postgres::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    postgres::wait_until_ready(&pool, DB_READY_TIMEOUT)
        .await
        .expect("Database did not become ready");
    tracing::info!("Database pool created");

    postgres::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations applied");

    let mailer =
        SmtpMailer::new(&config.email, &config.base_url).expect("Failed to build SMTP mailer");

    // Build application state
    let store = Arc::new(PgStore::new(pool.clone()));
    let state = AppState::new(
        config.clone(),
        store,
        Arc::new(mailer),
        Arc::new(SystemClock),
        Some(pool),
    );

    // Start the reconciliation poller if a source is configured
    if let Some(url) = config.reconcile.source_url.clone() {
        tracing::info!(url = %url, period = ?config.reconcile.period, "reconciliation poller enabled");
        spawn_poller(
            Arc::clone(state.importer()),
            url,
            config.reconcile.period,
        );
    }

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("ambassador server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
