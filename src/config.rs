use std::env;

/// Server-side configuration, read once at startup.
///
/// `AGENT_BRIDGE_API_KEY` and `TELEGRAM_BOT_TOKEN` are client-side / external-notifier
/// concerns and are intentionally not read here.
pub struct Config {
    pub db_path: String,
    pub files_dir: String,
    pub admin_secret: Option<String>,
    pub max_file_size: usize,
}

const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

impl Config {
    pub fn from_env() -> Self {
        Config {
            db_path: env::var("AGENT_BRIDGE_DB_PATH").unwrap_or_else(|_| "agent_bridge.db".into()),
            files_dir: env::var("AGENT_BRIDGE_FILES_DIR").unwrap_or_else(|_| "./files".into()),
            admin_secret: env::var("BRIDGE_ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_FILE_SIZE),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
