use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use chunkferry::config::Config;
use chunkferry::server::{print_startup_banner, start_server};
use chunkferry::state::AppState;

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        // create the upload directory if it doesn't exist
        if !config.upload_dir.exists() {
            std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload directory");
            tracing::info!("Created upload directory at: {:?}", config.upload_dir);
        }

        let addr = SocketAddr::from((
            config.host.parse::<std::net::IpAddr>().expect("Invalid HOST"),
            config.port,
        ));

        print_startup_banner(&config);

        let state = Arc::new(AppState::new(config));
        start_server(state, addr).await;
    });
}
