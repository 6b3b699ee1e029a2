//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration. Every field has a default matching the deployed
/// system; environment variables override individually.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// Path to the `name|description` package allowlist file.
    pub allowlist_path: PathBuf,
    /// Root directory for per-room uploaded files.
    pub upload_dir: PathBuf,
    /// SQLite path for the job status store. `":memory:"` for ephemeral.
    pub store_path: String,
    /// Combined UTF-8 byte cap for a submission's files.
    pub max_payload_bytes: usize,
    /// Per-upload byte cap.
    pub max_upload_bytes: u64,
    /// Permitted upload file extensions, lowercase, without the dot.
    pub allowed_upload_exts: Vec<String>,
    /// Admission controller window length.
    pub rate_limit_window: Duration,
    /// Submissions allowed per window per client address.
    pub rate_limit_max: u32,
    /// Job status record lifetime.
    pub job_ttl: Duration,
    /// How long an unreferenced room's state is kept after its last
    /// connection closes.
    pub room_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            allowlist_path: PathBuf::from("allowlist.txt"),
            upload_dir: PathBuf::from("uploads"),
            store_path: ":memory:".to_string(),
            max_payload_bytes: 50 * 1024,
            max_upload_bytes: 5 * 1024 * 1024,
            allowed_upload_exts: ["csv", "json", "txt", "png", "jpg", "jpeg", "xlsx", "parquet"]
                .into_iter()
                .map(String::from)
                .collect(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 10,
            job_ttl: Duration::from_secs(600),
            room_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            allowlist_path: env_var("ALLOWLIST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.allowlist_path),
            upload_dir: env_var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            store_path: env_var("STORE_PATH").unwrap_or(defaults.store_path),
            max_payload_bytes: env_parse("MAX_PAYLOAD_BYTES", defaults.max_payload_bytes),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            allowed_upload_exts: defaults.allowed_upload_exts,
            rate_limit_window: Duration::from_secs(env_parse(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", defaults.rate_limit_max),
            job_ttl: Duration::from_secs(env_parse("JOB_TTL_SECS", defaults.job_ttl.as_secs())),
            room_ttl: Duration::from_secs(env_parse("ROOM_TTL_SECS", defaults.room_ttl.as_secs())),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
