use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parlor::{
    api, auth, config,
    identity::IdentityConfig,
    state::{spawn_idle_sweeper, AppState, Store},
    textgen, ws,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting parlor...");

    let server_config = config::ServerConfig::from_env();
    let timings = config::GameTimings::from_env();
    let sweep_config = config::SweepConfig::from_env();
    let archive_config = config::ArchiveConfig::from_env();
    let auth_config = auth::AuthConfig::from_env();
    let identity_config = IdentityConfig::from_env();

    let textgen_config = textgen::TextGenConfig::from_env();
    let textgen_manager = match textgen_config.build_manager() {
        Ok(manager) => {
            tracing::info!("Text providers initialized");
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(
                "Text providers unavailable: {}. Suggestions fall back to canned lines.",
                e
            );
            None
        }
    };

    let store = Store::open(server_config.state_file.clone()).await;
    let state = AppState::new_with(
        store,
        timings,
        archive_config,
        identity_config,
        textgen_manager,
    );

    // Every room present after a restore needs its runtime back. Armed
    // timers are gone for good; play resumes on the next action.
    if let Err(e) = state.rebuild_after_restore().await {
        tracing::error!("Could not rebuild room runtimes: {}", e);
    }

    spawn_idle_sweeper(state.clone(), sweep_config);

    // Admin routes behind HTTP Basic Auth
    let admin_routes = Router::new()
        .route("/api/export", get(api::export_state))
        .route("/api/import", post(api::import_state))
        .route("/api/rooms", get(api::list_rooms))
        .layer(middleware::from_fn_with_state(
            auth_config.clone(),
            auth::admin_auth_middleware,
        ));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(admin_routes)
        .fallback_service(ServeDir::new(&server_config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
