use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method, header};
use collab_notes::core::auth::{JwtConfig, JwtService};
use collab_notes::core::collab::{
    AuthSettings, CollabState, Coordinator, MemoryNoteStore, NoteStore, collab_router,
};
use collab_notes::core::config::Config;
use collab_notes::core::db::{DbConfig, connect_note_store};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// How often empty rooms and released lock records are dropped
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Signing secret used by debug builds when `JWT_SECRET` is unset
const DEV_JWT_SECRET: &str = "collab-notes-development-secret-do-not-use";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_notes=debug,tower_http=debug,info".into()),
        )
        .init();

    let config = Config::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, jwt_secret={}, guests={}, lock_timeout={}s",
        config.has_database(),
        config.has_jwt_secret(),
        config.allow_guests,
        config.lock_timeout_secs
    );

    let store = create_store(&config).await?;
    let jwt = create_jwt_service();
    if jwt.is_none() && !config.allow_guests {
        tracing::warn!(
            "Neither JWT_SECRET nor ALLOW_GUESTS is set, every connection will be rejected"
        );
    }

    let coordinator = Arc::new(Coordinator::new(store, config.lock_timeout()));
    spawn_cleanup(coordinator.clone());

    let state = CollabState::new(coordinator, AuthSettings::new(jwt, config.allow_guests));
    let app = collab_router(state)
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("listening on http://{}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn create_store(config: &Config) -> Result<Arc<dyn NoteStore>, Box<dyn std::error::Error>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("No DATABASE_URL configured, notes are kept in memory");
        return Ok(Arc::new(MemoryNoteStore::new()));
    };

    let repository = connect_note_store(&DbConfig::new(database_url)).await?;
    Ok(Arc::new(repository))
}

fn create_jwt_service() -> Option<Arc<JwtService>> {
    match JwtService::from_env() {
        Ok(service) => Some(Arc::new(service)),
        Err(e) if cfg!(debug_assertions) => {
            tracing::warn!("{}, using the development secret", e);
            Some(Arc::new(JwtService::new(JwtConfig::new(DEV_JWT_SECRET))))
        }
        Err(e) => {
            tracing::warn!("{}, token authentication is disabled", e);
            None
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-username"),
        ]);

    match config
        .frontend_url
        .as_deref()
        .and_then(|url| url.parse::<HeaderValue>().ok())
    {
        Some(origin) => cors.allow_origin(origin),
        None => cors.allow_origin(Any),
    }
}

fn spawn_cleanup(coordinator: Arc<Coordinator>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            coordinator.cleanup_idle();
        }
    });
}
