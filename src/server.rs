use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::events::events_handler;
use crate::handlers::{
    complete_upload, get_config, health_check, init_upload, list_progresses, upload_chunk,
    upload_file, upload_status,
};
use crate::state::AppState;
use crate::utils::{pretty_bytes, shutdown_signal};

// room for multipart boundaries and headers around the payload
const MULTIPART_SLACK: usize = 64 * 1024;

/// build the upload api and event router
pub fn build_router(state: Arc<AppState>) -> Router {
    let config = &state.config;
    tracing::debug!(
        "Building router: chunk body limit {} bytes, file limit {} bytes",
        config.max_chunk_body(),
        config.max_file_size
    );

    let file_limit = usize::try_from(config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);

    let mut api = Router::new()
        .route("/upload/init", post(init_upload))
        .route(
            "/upload/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(config.max_chunk_body())),
        )
        .route("/upload/status", get(upload_status))
        .route("/upload/complete", post(complete_upload))
        .route(
            "/upload",
            post(upload_file)
                .layer::<_, Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(file_limit)),
        )
        .route("/config", get(get_config))
        .route("/progresses", get(list_progresses))
        .route("/health", get(health_check));

    if config.enable_compression {
        api = api.layer(CompressionLayer::new().gzip(true).br(true).zstd(true));
    }

    // websocket upgrades stay outside the compression layer
    Router::new()
        .merge(api)
        .route("/events", get(events_handler))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// serve on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(state.clone());
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .tcp_nodelay(true)
        .await;

    // one last snapshot for observers still attached
    state.broadcaster.flush();
    state.broadcaster.shutdown();
    result
}

/// bind the configured address and run until ctrl-c / sigterm
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) {
    tracing::info!("Starting server...");

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind upload server");
    tracing::debug!("Listener bound to {}", addr);

    tracing::info!("Server running and ready to accept connections");
    if let Err(e) = serve(listener, state, shutdown_signal()).await {
        tracing::error!("Server error: {}", e);
    }
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("chunkferry starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 UPLOAD SERVER: http://{}:{}", config.host, config.port);
    tracing::info!(
        "📁 Writing uploads to: {:?}",
        config.upload_dir.canonicalize().unwrap_or(config.upload_dir.clone())
    );
    tracing::info!(
        "🧩 Chunks of {} with up to {} in flight per file",
        pretty_bytes(config.upload_chunk_size),
        config.max_parallel_chunk_uploads
    );
    if !config.chunked_upload {
        tracing::info!("📎 Chunked upload disabled, clients will use multipart");
    }
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
