use blog_backend::{
    AppState,
    auth::TokenIssuer,
    config::{AppConfig, Env, SessionBackend},
    create_router,
    notifications::{EmailNotifier, NotifierState},
    repository::{PostgresRepository, RepositoryState},
    session::{InMemorySessionStore, PostgresSessionStore, SessionState},
    storage::{S3StorageClient, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions are swept from the store.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// main
///
/// Loads configuration, sets up logging, connects Postgres (running migrations) and blob
/// storage, wires the session store and notifier, then serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise sensible local defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blog_backend=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Database migrations failed.");

    let repo = Arc::new(PostgresRepository::new(pool.clone())) as RepositoryState;

    // 4. Blob storage
    let s3_client = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
    )
    .await;

    // LOCAL-ONLY: provision the MinIO bucket.
    if config.env == Env::Local {
        s3_client.ensure_bucket_exists().await;
    }
    let storage = Arc::new(s3_client) as StorageState;

    // 5. Sessions
    let sessions: SessionState = match config.session_backend {
        SessionBackend::Memory => Arc::new(InMemorySessionStore::new()),
        SessionBackend::Postgres => Arc::new(PostgresSessionStore::new(pool)),
    };
    tracing::info!("Session store: {:?}", config.session_backend);
    spawn_session_purge(sessions.clone());

    // 6. Notifications
    if config.sendgrid_api_key.is_none() {
        tracing::warn!("SENDGRID_API_KEY not set; notification emails will only be logged");
    }
    let notifier = Arc::new(EmailNotifier::from_config(&config)) as NotifierState;

    // 7. Unified state
    let app_state = AppState {
        repo,
        storage,
        sessions,
        notifier,
        tokens: TokenIssuer::new(&config),
        config: config.clone(),
    };

    // 8. Router and server
    let app = create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("FATAL: Could not bind BIND_ADDR.");

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    // Peer addresses feed the analytics visitor id when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server error");
}

/// Periodically drops expired sessions so the store does not grow without bound.
fn spawn_session_purge(sessions: SessionState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "expired sessions purged"),
                Err(e) => tracing::warn!("session purge failed: {}", e),
            }
        }
    });
}
