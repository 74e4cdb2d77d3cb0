use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use aihub_core::catalog::CacheMode;

/// Default maximum inbound WebSocket message size (50 MiB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Store root holding `workflows/`, `models/` and `loras/`.
    pub aihub_dir: PathBuf,
    /// Catalog cache policy (`AIHUB_COLD=1` selects [`CacheMode::Cold`]).
    pub cache_mode: CacheMode,
    /// Keep session staging directories after disconnect.
    pub persist_tempfiles: bool,
    /// Parent directory of the per-session staging directories.
    pub temp_dir: PathBuf,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Maximum time a job may wait in the queue. `None` disables expiry.
    pub queue_ttl: Option<Duration>,
    /// Upper bound on the wait for a finished job's outbound messages.
    pub finish_drain_timeout: Duration,
    /// ComfyUI REST base URL.
    pub comfyui_api_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                  |
    /// |-----------------------------------|--------------------------|
    /// | `HOST`                            | `0.0.0.0`                |
    /// | `PORT`                            | `8000`                   |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                     |
    /// | `AIHUB_DIR`                       | `./aihub`                |
    /// | `AIHUB_COLD`                      | `0`                      |
    /// | `AIHUB_PERSIST_TEMPFILES`         | `0`                      |
    /// | `AIHUB_TEMP_DIR`                  | OS temp dir              |
    /// | `AIHUB_MAX_MESSAGE_SIZE`          | `52428800`               |
    /// | `AIHUB_QUEUE_TTL_SECS`            | unset (no expiry)        |
    /// | `AIHUB_FINISH_DRAIN_TIMEOUT_SECS` | `30`                     |
    /// | `COMFYUI_API_URL`                 | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_WS_URL`                  | `ws://127.0.0.1:8188`    |
    /// | `LOG_FORMAT`                      | `pretty`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", "u16")?.unwrap_or(8000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", "u64")?.unwrap_or(30);

        let aihub_dir = std::env::var("AIHUB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./aihub"));

        let cache_mode = if flag("AIHUB_COLD") {
            CacheMode::Cold
        } else {
            CacheMode::Hot
        };

        let temp_dir = std::env::var("AIHUB_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let max_message_size: usize =
            parse_var("AIHUB_MAX_MESSAGE_SIZE", "usize")?.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);

        let queue_ttl = parse_var::<u64>("AIHUB_QUEUE_TTL_SECS", "u64")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let finish_drain_timeout = Duration::from_secs(
            parse_var("AIHUB_FINISH_DRAIN_TIMEOUT_SECS", "u64")?.unwrap_or(30),
        );

        let comfyui_api_url =
            std::env::var("COMFYUI_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());
        let comfyui_ws_url =
            std::env::var("COMFYUI_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8188".into());

        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            aihub_dir,
            cache_mode,
            persist_tempfiles: flag("AIHUB_PERSIST_TEMPFILES"),
            temp_dir,
            max_message_size,
            queue_ttl,
            finish_drain_timeout,
            comfyui_api_url,
            comfyui_ws_url,
            log_format,
        })
    }
}

/// `1` enables a flag; anything else (or unset) leaves it off.
fn flag(var: &str) -> bool {
    std::env::var(var).is_ok_and(|v| v.trim() == "1")
}

fn parse_var<T: FromStr>(var: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value,
            }),
        Err(_) => Ok(None),
    }
}
