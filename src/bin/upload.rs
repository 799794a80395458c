use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkferry::client::{CompletionOutcome, HttpTransport, RetryPolicy, UploadClient};
use chunkferry::utils::pretty_bytes;

/// Upload files to a chunkferry server, resuming wherever a previous attempt
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "chunkferry-upload", version, about)]
struct Args {
    /// server base url
    #[arg(long, env = "CHUNKFERRY_SERVER", default_value = "http://127.0.0.1:8082")]
    server: String,

    /// chunk operations in flight per file (capped by the server)
    #[arg(long)]
    parallel: Option<usize>,

    /// attempts per chunk before giving up (default: retry forever)
    #[arg(long)]
    retry_limit: Option<u32>,

    /// files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let transport = Arc::new(HttpTransport::new(args.server.clone()));
    let mut client = UploadClient::new(transport).with_retry(RetryPolicy {
        max_attempts: args.retry_limit,
        ..RetryPolicy::default()
    });
    if let Some(parallel) = args.parallel {
        client = client.with_parallel(parallel);
    }

    tracing::info!("📡 Uploading {} file(s) to {}", args.files.len(), args.server);
    let results = match client.upload_files(args.files).await {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("Could not reach {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };

    let mut failures = 0;
    for (path, result) in results {
        match result {
            Ok(report) => match &report.outcome {
                CompletionOutcome::Complete(done) => tracing::info!(
                    "✅ {} -> {} ({}, {} sent, {} already there, {} retries)",
                    path.display(),
                    done.saved_location,
                    pretty_bytes(done.bytes_received),
                    report.uploaded,
                    report.skipped,
                    report.retries
                ),
                CompletionOutcome::Streamed(msg) => {
                    tracing::info!("✅ {}: {}", path.display(), msg)
                }
                CompletionOutcome::Failed {
                    uploaded_chunks,
                    total_chunks,
                } => {
                    failures += 1;
                    tracing::error!(
                        "❌ {} incomplete: {}/{} chunks, failed {:?}",
                        path.display(),
                        uploaded_chunks.len(),
                        total_chunks,
                        report.failed
                    );
                }
            },
            Err(e) => {
                failures += 1;
                tracing::error!("❌ {}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
