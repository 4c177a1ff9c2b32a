use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chat_api::DEFAULT_ROOM;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::Cli;
use crate::engine::{SyncOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_PAGE_SIZE};
use crate::presence::{DEFAULT_HEARTBEAT, DEFAULT_ONLINE_WINDOW};
use crate::rooms::DEFAULT_ROOMS_STALE;
use crate::typing::DEFAULT_TYPING_IDLE;

const MAX_PAGE_SIZE: usize = 100;

/// Connection settings of the hosted backend.
#[derive(Clone, Default, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub auth_domain: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub storage_bucket: String,
    #[serde(default)]
    pub messaging_sender_id: String,
    #[serde(default)]
    pub app_id: String,
}

impl BackendSettings {
    /// True when every connection setting is present.
    pub fn is_configured(&self) -> bool {
        [
            &self.api_key,
            &self.auth_domain,
            &self.project_id,
            &self.storage_bucket,
            &self.messaging_sender_id,
            &self.app_id,
        ]
        .iter()
        .all(|v| !v.is_empty())
    }

    fn apply_env(&mut self) {
        let fields: [(&str, &mut String); 6] = [
            ("CHATCORE_BACKEND_API_KEY", &mut self.api_key),
            ("CHATCORE_BACKEND_AUTH_DOMAIN", &mut self.auth_domain),
            ("CHATCORE_BACKEND_PROJECT_ID", &mut self.project_id),
            ("CHATCORE_BACKEND_STORAGE_BUCKET", &mut self.storage_bucket),
            ("CHATCORE_BACKEND_MESSAGING_SENDER_ID", &mut self.messaging_sender_id),
            ("CHATCORE_BACKEND_APP_ID", &mut self.app_id),
        ];
        for (key, field) in fields {
            if let Ok(value) = std::env::var(key) {
                *field = value;
            }
        }
    }
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("api_key", &"<redacted>")
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("messaging_sender_id", &self.messaging_sender_id)
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Messages per history page and size of the live window.
    pub page_size: usize,
    /// Upper bound for one history fetch.
    pub fetch_timeout: Duration,
    /// Room opened when none is named.
    pub default_room: String,
    /// Time without keystrokes after which the typing flag is cleared.
    pub typing_idle: Duration,
    /// Users active within this window count as online.
    pub online_window: Duration,
    /// Period of the signed-in user's presence heartbeat.
    pub heartbeat: Duration,
    /// How long a fetched room list is reused.
    pub rooms_stale: Duration,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Base directory for local data such as uploaded blobs.
    pub data_dir: PathBuf,
    pub backend: BackendSettings,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    sync: FileSync,
    #[serde(default)]
    typing: FileTyping,
    #[serde(default)]
    presence: FilePresence,
    #[serde(default)]
    rooms: FileRooms,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    backend: BackendSettings,
    #[serde(default)]
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct FileSync {
    page_size: Option<usize>,
    fetch_timeout_ms: Option<u64>,
    default_room: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileTyping {
    idle_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FilePresence {
    online_window_ms: Option<u64>,
    heartbeat_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FileRooms {
    stale_ms: Option<u64>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_logging() -> bool {
    true
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // built-in defaults
        let mut page_size = DEFAULT_PAGE_SIZE;
        let mut fetch_timeout = DEFAULT_FETCH_TIMEOUT;
        let mut default_room = DEFAULT_ROOM.to_string();
        let mut typing_idle = DEFAULT_TYPING_IDLE;
        let mut online_window = DEFAULT_ONLINE_WINDOW;
        let mut heartbeat = DEFAULT_HEARTBEAT;
        let mut rooms_stale = DEFAULT_ROOMS_STALE;
        let mut logging = default_logging();
        let mut data_dir = None;
        let mut backend = BackendSettings::default();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATCORE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chatcore.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            page_size = file_cfg.sync.page_size.unwrap_or(page_size);
            if let Some(ms) = file_cfg.sync.fetch_timeout_ms {
                fetch_timeout = Duration::from_millis(ms);
            }
            default_room = file_cfg.sync.default_room.unwrap_or(default_room);
            if let Some(ms) = file_cfg.typing.idle_ms {
                typing_idle = Duration::from_millis(ms);
            }
            if let Some(ms) = file_cfg.presence.online_window_ms {
                online_window = Duration::from_millis(ms);
            }
            if let Some(ms) = file_cfg.presence.heartbeat_ms {
                heartbeat = Duration::from_millis(ms);
            }
            if let Some(ms) = file_cfg.rooms.stale_ms {
                rooms_stale = Duration::from_millis(ms);
            }
            logging = file_cfg.logging.enabled;
            data_dir = file_cfg.data_dir;
            backend = file_cfg.backend;
        }

        // environment overrides
        if let Some(p) = env_parse::<usize>("CHATCORE_PAGE_SIZE") {
            page_size = p;
        }
        if let Some(ms) = env_parse::<u64>("CHATCORE_FETCH_TIMEOUT_MS") {
            fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CHATCORE_HEARTBEAT_MS") {
            heartbeat = Duration::from_millis(ms);
        }
        if let Ok(room) = std::env::var("CHATCORE_DEFAULT_ROOM") {
            default_room = room;
        }
        if let Some(l) = env_parse::<bool>("CHATCORE_LOGGING") {
            logging = l;
        }
        if let Ok(dir) = std::env::var("CHATCORE_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }
        backend.apply_env();

        // CLI overrides
        if let Some(p) = cli.page_size {
            page_size = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(dir) = &cli.data_dir {
            data_dir = Some(dir.clone());
        }

        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            anyhow::bail!("invalid_page_size");
        }
        if fetch_timeout.is_zero() {
            anyhow::bail!("invalid_fetch_timeout");
        }
        if heartbeat.is_zero() {
            anyhow::bail!("invalid_heartbeat");
        }
        let default_room = default_room.trim().to_string();
        if default_room.is_empty() {
            anyhow::bail!("invalid_default_room");
        }

        Ok(Self {
            page_size,
            fetch_timeout,
            default_room,
            typing_idle,
            online_window,
            heartbeat,
            rooms_stale,
            logging_enabled: logging,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            backend,
        })
    }

    /// Engine options derived from this configuration.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size,
            fetch_timeout: self.fetch_timeout,
            default_room: self.default_room.clone(),
        }
    }

    /// Directory of the local blob store.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "chatcore", "chatcore")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./chatcore_data"))
}
