use axum::{Extension, Router, middleware, response::IntoResponse, routing::get, serve};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use shared::config::server::{Config, DatabaseConfig, LogFormat};

use crate::{
    app_state::AppState,
    db::bootstrap,
    handlers::{conversations, send, streaming, webhook},
    middleware::{
        auth,
        request_context::{self, RequestIdState},
    },
    platform::GraphClient,
    routes,
    services::broadcaster::{SharedBroadcaster, WorkspaceBroadcaster},
    tracer,
};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database configuration.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any());

    if config.server.cors_allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Creates the API router: the public webhook intake plus the session-gated
/// dashboard surface.
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{id}/messages",
            get(conversations::get_message_page).post(send::send_message),
        )
        .route(
            "/conversations/{id}/messages/latest",
            get(conversations::get_latest_messages),
        )
        .route("/stream", get(streaming::stream_events))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_workspace,
        ));

    Router::new()
        .route(
            "/webhook",
            get(webhook::verify_subscription).post(webhook::receive_events),
        )
        .merge(protected)
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    broadcaster: SharedBroadcaster,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api", create_api_router(state.clone()))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(routes::openapi::openapi_routes())
        .layer(Extension(config))
        .layer(Extension(broadcaster))
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the server: tracing, pool, bootstrap, router, graceful shutdown.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let pool = create_database_pool(&config.db).await?;

    bootstrap::ensure_liveness(&pool).await?;
    bootstrap::run(&pool, &config.db).await?;
    bootstrap::ensure_readiness(&pool).await?;

    let platform = Arc::new(GraphClient::new(&config.platform)?);

    let state = Arc::new(AppState::new(
        Some(pool.clone()),
        Arc::new(crate::services::workspace_store::PgWorkspaceStore::new(
            pool.clone(),
        )),
        Arc::new(
            crate::services::conversation_store::PgConversationStore::new(pool.clone()),
        ),
        Arc::new(crate::services::message_store::PgMessageStore::new(pool)),
        platform,
    ));

    // One broadcaster per process, injected everywhere it is consumed.
    let broadcaster: SharedBroadcaster =
        Arc::new(WorkspaceBroadcaster::new(config.sse.channel_capacity));

    let app = create_app_router(state, config.clone(), broadcaster, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown_signal = create_shutdown_signal();

    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
