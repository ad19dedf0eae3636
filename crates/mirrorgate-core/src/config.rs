//! Settings tree loaded from TOML.
//!
//! Every field has a default so an empty file is valid. Sizes are written in
//! GiB and durations in seconds; 0 means "no limit" wherever that reads
//! naturally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Category, KIB, UserId, gib_to_bytes};
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Volume checked by the storage-headroom limit.
    pub download_dir: PathBuf,

    /// Period shared by the health monitor and the queue controller.
    pub sweep_interval_secs: u64,

    pub limits: LimitSettings,
    pub queue: QueueSettings,
    pub health: HealthSettings,
    pub pressure: PressureSettings,
    pub backends: BackendSettings,
    pub notify: NotifySettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            sweep_interval_secs: 60,
            limits: LimitSettings::default(),
            queue: QueueSettings::default(),
            health: HealthSettings::default(),
            pressure: PressureSettings::default(),
            backends: BackendSettings::default(),
            notify: NotifySettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject threshold combinations the sweeps cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be > 0".into()));
        }
        if self.health.window == 0 || self.pressure.window == 0 {
            return Err(ConfigError::Invalid("rolling windows need at least one sample".into()));
        }
        for (name, low, high) in [
            ("cpu", self.pressure.cpu_low, self.pressure.cpu_high),
            ("memory", self.pressure.memory_low, self.pressure.memory_high),
        ] {
            if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) {
                return Err(ConfigError::Invalid(format!(
                    "{name} thresholds must be percentages"
                )));
            }
            if low >= high {
                return Err(ConfigError::Invalid(format!(
                    "{name} resume threshold {low} must be below displacement threshold {high}"
                )));
            }
        }
        let retry = &self.backends.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if retry.min_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.min_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Admission quotas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Users that bypass every limit, in addition to callers flagged trusted.
    pub exempt_users: Vec<UserId>,

    /// Minimum seconds between two admitted tasks of one user.
    pub task_interval_secs: u64,

    pub torrent_gib: f64,
    pub direct_gib: f64,
    pub video_site_gib: f64,
    pub cloud_gib: f64,
    pub newsgroup_gib: f64,
    pub clone_gib: f64,

    /// Maximum entries of a video playlist.
    pub playlist_items: usize,

    /// Cap on any single upload-to-chat task.
    pub leech_gib: f64,

    /// Free space that must remain on the download volume after admission.
    pub storage_floor_gib: f64,

    pub daily_tasks: u32,
    pub daily_mirror_gib: f64,
    pub daily_leech_gib: f64,

    /// Concurrently registered tasks per user.
    pub user_max_tasks: usize,

    /// Concurrently registered tasks overall.
    pub max_tasks: usize,
}

impl LimitSettings {
    /// Size cap in bytes for `category`; 0 is unlimited.
    pub fn category_cap(&self, category: Category) -> u64 {
        let gib = match category {
            Category::Torrent => self.torrent_gib,
            Category::DirectLink => self.direct_gib,
            Category::VideoSite => self.video_site_gib,
            Category::CloudDownload => self.cloud_gib,
            Category::Newsgroup => self.newsgroup_gib,
            Category::Clone => self.clone_gib,
        };
        gib_to_bytes(gib)
    }

    pub fn leech_cap(&self) -> u64 {
        gib_to_bytes(self.leech_gib)
    }

    pub fn storage_floor(&self) -> u64 {
        gib_to_bytes(self.storage_floor_gib)
    }

    pub fn daily_mirror_cap(&self) -> u64 {
        gib_to_bytes(self.daily_mirror_gib)
    }

    pub fn daily_leech_cap(&self) -> u64 {
        gib_to_bytes(self.daily_leech_gib)
    }
}

/// Concurrency slots for the running tables (0 = no cap).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub all: usize,
    pub download: usize,
    pub upload: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Speed samples kept per task.
    pub window: usize,
    pub slow_speed_kib: u64,
    pub long_eta_secs: u64,
    pub elapsed_secs: u64,
    pub warn_wait_secs: u64,
    pub completion_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window: 3,
            slow_speed_kib: 50,
            long_eta_secs: 24 * 3600,
            elapsed_secs: 3600,
            warn_wait_secs: 600,
            completion_secs: 4 * 3600,
        }
    }
}

impl HealthSettings {
    pub fn slow_speed(&self) -> u64 {
        self.slow_speed_kib * KIB
    }

    /// `None` when set to 0: only an infinite ETA counts as long.
    pub fn long_eta(&self) -> Option<Duration> {
        threshold(self.long_eta_secs)
    }

    /// `None` when set to 0, which turns the no-progress rule off.
    pub fn elapsed(&self) -> Option<Duration> {
        threshold(self.elapsed_secs)
    }

    pub fn warn_wait(&self) -> Duration {
        Duration::from_secs(self.warn_wait_secs)
    }

    /// `None` when set to 0, which turns the slow-completion rule off.
    pub fn completion(&self) -> Option<Duration> {
        threshold(self.completion_secs)
    }
}

fn threshold(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureSettings {
    /// CPU/memory samples kept.
    pub window: usize,
    pub cpu_high: f32,
    pub cpu_low: f32,
    pub memory_high: f32,
    pub memory_low: f32,
    /// Transfers above this size count as memory-intensive.
    pub large_file_gib: f64,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            window: 3,
            cpu_high: 90.0,
            cpu_low: 40.0,
            memory_high: 75.0,
            memory_low: 60.0,
            large_file_gib: 1.0,
        }
    }
}

impl PressureSettings {
    pub fn large_file(&self) -> u64 {
        gib_to_bytes(self.large_file_gib)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub retry: RetrySettings,
    pub request_timeout_secs: Option<u64>,
    pub aria2: Option<Aria2Settings>,
    pub qbittorrent: Option<QbittorrentSettings>,
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(15))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aria2Settings {
    /// JSON-RPC endpoint, e.g. `http://127.0.0.1:6800/jsonrpc`.
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QbittorrentSettings {
    /// WebUI base, e.g. `http://127.0.0.1:8090`.
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub auto_delete_secs: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            auto_delete_secs: 60,
        }
    }
}

impl NotifySettings {
    pub fn auto_delete(&self) -> Duration {
        Duration::from_secs(self.auto_delete_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
