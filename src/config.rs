use std::path::PathBuf;
use std::str::FromStr;

use crate::models::ServerConfigView;

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// directory uploads are written to
    pub upload_dir: PathBuf,
    /// listen address
    pub host: String,
    /// listen port
    pub port: u16,
    /// chunk size handed to clients at init
    pub upload_chunk_size: u64,
    /// chunk operations a client may keep in flight per file
    pub max_parallel_chunk_uploads: usize,
    /// files a client may upload at once
    pub max_parallel_file_uploads: usize,
    /// maximum upload size in bytes
    pub max_file_size: u64,
    /// advertise the chunked protocol (otherwise clients use multipart)
    pub chunked_upload: bool,
    /// compress responses
    pub enable_compression: bool,
    /// minimum spacing between progress broadcasts
    pub broadcast_interval_ms: u64,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// cors allowed origins (comma-separated, `*` for any)
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            host: "127.0.0.1".to_string(),
            port: 8082,
            upload_chunk_size: 2 * 1024 * 1024,
            max_parallel_chunk_uploads: 10,
            max_parallel_file_uploads: 3,
            max_file_size: 10 * 1024 * 1024 * 1024, // 10GB
            chunked_upload: true,
            enable_compression: true,
            broadcast_interval_ms: 250,
            worker_threads: 8,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_positive("PORT").unwrap_or(defaults.port),
            upload_chunk_size: env_positive("UPLOAD_CHUNK_SIZE").unwrap_or(defaults.upload_chunk_size),
            max_parallel_chunk_uploads: env_positive("MAX_PARALLEL_CHUNK_UPLOADS")
                .unwrap_or(defaults.max_parallel_chunk_uploads),
            max_parallel_file_uploads: env_positive("MAX_PARALLEL_FILE_UPLOADS")
                .unwrap_or(defaults.max_parallel_file_uploads),
            max_file_size: env_positive("MAX_FILE_SIZE").unwrap_or(defaults.max_file_size),
            chunked_upload: env_flag("CHUNKED_UPLOAD").unwrap_or(defaults.chunked_upload),
            enable_compression: env_flag("ENABLE_COMPRESSION").unwrap_or(defaults.enable_compression),
            broadcast_interval_ms: env_positive("BROADCAST_INTERVAL_MS")
                .unwrap_or(defaults.broadcast_interval_ms),
            worker_threads: env_positive("WORKER_THREADS").unwrap_or(defaults.worker_threads),
            cors_origins: if cors_origins.is_empty() { vec!["*".to_string()] } else { cors_origins },
        }
    }

    /// body limit for one chunk request, with room for multipart framing
    pub fn max_chunk_body(&self) -> usize {
        (self.upload_chunk_size as usize).saturating_add(64 * 1024)
    }

    pub fn view(&self) -> ServerConfigView {
        ServerConfigView {
            upload_chunk_size: self.upload_chunk_size,
            max_parallel_chunk_uploads: self.max_parallel_chunk_uploads,
            max_parallel_file_uploads: self.max_parallel_file_uploads,
            chunked_upload: self.chunked_upload,
            enable_compression: self.enable_compression,
            max_file_size: self.max_file_size,
            server_port: self.port,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// numeric env var; unparsable or zero values count as unset
fn env_positive<T>(key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}

fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
