//! Configuration management for docpipe.
//!
//! Configuration is an explicit, immutable [`Settings`] value threaded
//! through constructors. A [`Config`] file (TOML or JSON, selected by
//! extension) may override defaults; a handful of environment variables
//! override the file. There is no ambient global state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discovery::ListingConfig;

/// Default database filename for pipeline state.
pub const DEFAULT_DATABASE_FILENAME: &str = "docpipe.db";

/// Default database filename for the local async queue.
pub const DEFAULT_QUEUE_DB_FILENAME: &str = "async-queue.db";

/// Default number of days after which downloaded documents are re-checked
/// against their remote validators.
pub const DEFAULT_RECHECK_AFTER_DAYS: u64 = 14;

const RAW_SUBDIR: &str = "raw";
const EXTRACTED_SUBDIR: &str = "extracted";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Pipeline state database filename (inside `data_dir`).
    pub database_filename: String,
    /// Local queue database filename (inside `data_dir`).
    pub queue_db_filename: String,
    /// Directory for downloaded binaries.
    pub raw_dir: PathBuf,
    /// Directory for extraction output.
    pub extracted_dir: PathBuf,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Timeout for listing-page fetches, in seconds.
    pub listing_timeout_secs: u64,
    /// Timeout for a single download attempt, in seconds.
    pub download_timeout_secs: u64,
    /// Timeout for queue HTTP calls, in seconds.
    pub queue_timeout_secs: u64,
    /// Accept invalid TLS certificates (explicit transport knob, off by default).
    pub insecure_tls: bool,
    /// Download worker pool size.
    pub download_concurrency: usize,
    /// Extract worker pool size.
    pub extract_concurrency: usize,
    /// Attempt ceiling for the download stage.
    pub max_download_attempts: u32,
    /// Attempt ceiling for the extract stage.
    pub max_extract_attempts: u32,
    /// Freshness window for revalidation probes, in days.
    pub recheck_after_days: u64,
    /// Remote queue URL (None = local SQLite queue).
    pub queue_url: Option<String>,
    /// Bearer token for the remote queue.
    pub queue_token: Option<String>,
    /// Lease duration for queue messages and extract jobs, in seconds.
    pub lease_secs: i64,
    /// Sleep between result polls in pipeline mode, in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive empty result polls before pipeline mode gives up.
    /// A liveness cutoff, not a safety property: un-acked work stays leased.
    pub idle_rounds: u32,
    /// Hard cap on pipeline polling rounds.
    pub max_rounds: u32,
    /// Result sink spec (None, or "jsonl:<path>").
    pub sink: Option<String>,
    /// Listing discovery configuration.
    pub listing: Option<ListingConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/docpipe/ for user data.
        // Falls back gracefully: Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docpipe");

        Self {
            raw_dir: data_dir.join(RAW_SUBDIR),
            extracted_dir: data_dir.join(EXTRACTED_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            queue_db_filename: DEFAULT_QUEUE_DB_FILENAME.to_string(),
            user_agent: "docpipe/0.3 (document archival)".to_string(),
            listing_timeout_secs: 30,
            download_timeout_secs: 120,
            queue_timeout_secs: 15,
            insecure_tls: false,
            download_concurrency: 4,
            extract_concurrency: 2,
            max_download_attempts: 3,
            max_extract_attempts: 3,
            recheck_after_days: DEFAULT_RECHECK_AFTER_DAYS,
            queue_url: None,
            queue_token: None,
            lease_secs: 120,
            poll_interval_ms: 1000,
            idle_rounds: 5,
            max_rounds: 120,
            sink: None,
            listing: None,
        }
    }
}

impl Settings {
    /// Create settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            raw_dir: data_dir.join(RAW_SUBDIR),
            extracted_dir: data_dir.join(EXTRACTED_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Full path to the pipeline state database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Full path to the local queue database.
    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.queue_db_filename)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.data_dir, &self.raw_dir, &self.extracted_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to create directory '{}': {}", dir.display(), e),
                )
            })?;
        }
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// User agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Listing fetch timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_timeout_secs: Option<u64>,
    /// Download attempt timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_timeout_secs: Option<u64>,
    /// Queue HTTP call timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_secs: Option<u64>,
    /// Accept invalid TLS certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_tls: Option<bool>,
    /// Download worker pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_concurrency: Option<usize>,
    /// Extract worker pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_concurrency: Option<usize>,
    /// Download attempt ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_download_attempts: Option<u32>,
    /// Extract attempt ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_extract_attempts: Option<u32>,
    /// Revalidation freshness window in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recheck_after_days: Option<u64>,
    /// Remote queue URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
    /// Bearer token for the remote queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_token: Option<String>,
    /// Lease duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_secs: Option<i64>,
    /// Poll interval in pipeline mode, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    /// Consecutive empty polls before pipeline mode gives up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_rounds: Option<u32>,
    /// Hard cap on pipeline polling rounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    /// Result sink spec ("jsonl:<path>").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<String>,
    /// Listing discovery configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports TOML and JSON based on file extension.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| format!("failed to parse JSON config: {}", e))?,
            _ => toml::from_str(&contents)
                .map_err(|e| format!("failed to parse TOML config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve a relative data_dir (config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            let path = Path::new(data_dir);
            settings.data_dir = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            };
            settings.raw_dir = settings.data_dir.join(RAW_SUBDIR);
            settings.extracted_dir = settings.data_dir.join(EXTRACTED_SUBDIR);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(v) = self.listing_timeout_secs {
            settings.listing_timeout_secs = v;
        }
        if let Some(v) = self.download_timeout_secs {
            settings.download_timeout_secs = v;
        }
        if let Some(v) = self.queue_timeout_secs {
            settings.queue_timeout_secs = v;
        }
        if let Some(v) = self.insecure_tls {
            settings.insecure_tls = v;
        }
        if let Some(v) = self.download_concurrency {
            settings.download_concurrency = v.max(1);
        }
        if let Some(v) = self.extract_concurrency {
            settings.extract_concurrency = v.max(1);
        }
        if let Some(v) = self.max_download_attempts {
            settings.max_download_attempts = v.max(1);
        }
        if let Some(v) = self.max_extract_attempts {
            settings.max_extract_attempts = v.max(1);
        }
        if let Some(v) = self.recheck_after_days {
            settings.recheck_after_days = v;
        }
        if let Some(ref url) = self.queue_url {
            settings.queue_url = Some(url.clone());
        }
        if let Some(ref token) = self.queue_token {
            settings.queue_token = Some(token.clone());
        }
        if let Some(v) = self.lease_secs {
            settings.lease_secs = v.max(1);
        }
        if let Some(v) = self.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(v) = self.idle_rounds {
            settings.idle_rounds = v.max(1);
        }
        if let Some(v) = self.max_rounds {
            settings.max_rounds = v.max(1);
        }
        if let Some(ref sink) = self.sink {
            settings.sink = Some(sink.clone());
        }
        if let Some(ref listing) = self.listing {
            settings.listing = Some(listing.clone());
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (--data flag).
    pub data: Option<PathBuf>,
}

/// Look for a config file next to the data directory.
fn find_config_next_to_data(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "json"];
    let basenames = ["docpipe", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let data_dir_override = options.data.as_ref().map(|d| {
        if d.is_absolute() {
            d.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(d)
        }
    });

    // Priority: explicit --config, then config next to the data dir.
    let config = if let Some(ref config_path) = options.config_path {
        Config::load_from_path(config_path).unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        })
    } else if let Some(path) = data_dir_override
        .as_ref()
        .and_then(|d| find_config_next_to_data(d))
    {
        tracing::debug!("found config next to data dir: {}", path.display());
        Config::load_from_path(&path).unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    let mut settings = Settings::default();

    let base_dir = config
        .source_path
        .as_ref()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    config.apply_to_settings(&mut settings, &base_dir);

    // --data override takes precedence for the data directory
    if let Some(data_dir) = data_dir_override {
        settings.raw_dir = data_dir.join(RAW_SUBDIR);
        settings.extracted_dir = data_dir.join(EXTRACTED_SUBDIR);
        settings.data_dir = data_dir;
    }

    // Environment variables take highest precedence
    if let Some(database) = std::env::var("DOCPIPE_DATABASE")
        .ok()
        .filter(|s| !s.is_empty())
    {
        settings.database_filename = database;
    }
    if let Some(url) = std::env::var("DOCPIPE_QUEUE_URL")
        .ok()
        .filter(|s| !s.is_empty())
    {
        tracing::debug!("using DOCPIPE_QUEUE_URL from environment");
        settings.queue_url = Some(url);
    }
    if let Some(token) = std::env::var("DOCPIPE_QUEUE_TOKEN")
        .ok()
        .filter(|s| !s.is_empty())
    {
        settings.queue_token = Some(token);
    }

    (settings, config)
}
