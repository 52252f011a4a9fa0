//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every engine component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Job monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Go-live configuration
    #[serde(default)]
    pub go_live: GoLiveConfig,

    /// Orphan recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// File-system layout
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Job monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Maximum reduction runners in flight
    #[serde(default = "default_max_reductions")]
    pub max_concurrent_reductions: usize,

    /// Maximum publication runners in flight
    #[serde(default = "default_max_publications")]
    pub max_concurrent_publications: usize,

    /// Delay between store scans in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How often a publication runner re-reads its reduction tasks
    #[serde(default = "default_task_poll_interval")]
    pub task_poll_interval_ms: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reductions: default_max_reductions(),
            max_concurrent_publications: default_max_publications(),
            poll_interval_ms: default_poll_interval(),
            task_poll_interval_ms: default_task_poll_interval(),
        }
    }
}

/// Go-live configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoLiveConfig {
    /// Promote as soon as post-processing confirms a request
    #[serde(default = "default_true")]
    pub auto_approve: bool,

    /// Promotions allowed to run at once across content items
    #[serde(default = "default_max_promotions")]
    pub max_concurrent_promotions: usize,
}

impl Default for GoLiveConfig {
    fn default() -> Self {
        Self {
            auto_approve: true,
            max_concurrent_promotions: default_max_promotions(),
        }
    }
}

/// Orphan recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Run recovery at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only tasks created this recently are re-adopted
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// Watcher poll interval in milliseconds
    #[serde(default = "default_watcher_poll")]
    pub watcher_poll_ms: u64,

    /// Give up on a task after this long
    #[serde(default = "default_watcher_max_wait")]
    pub watcher_max_wait_secs: u64,
}

impl RecoveryConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours as i64)
    }

    pub fn watcher_poll(&self) -> Duration {
        Duration::from_millis(self.watcher_poll_ms)
    }

    pub fn watcher_max_wait(&self) -> Duration {
        Duration::from_secs(self.watcher_max_wait_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_hours: default_lookback_hours(),
            watcher_poll_ms: default_watcher_poll(),
            watcher_max_wait_secs: default_watcher_max_wait(),
        }
    }
}

/// File-system layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the live content tree
    #[serde(default = "default_content_root")]
    pub content_item_root: PathBuf,

    /// Root of per-job working directories
    #[serde(default = "default_exchange_root")]
    pub exchange_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content_item_root: default_content_root(),
            exchange_root: default_exchange_root(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_reductions() -> usize {
    4
}

fn default_max_publications() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    500
}

fn default_task_poll_interval() -> u64 {
    250
}

fn default_max_promotions() -> usize {
    4
}

fn default_lookback_hours() -> u64 {
    24
}

fn default_watcher_poll() -> u64 {
    1000
}

fn default_watcher_max_wait() -> u64 {
    300
}

fn default_content_root() -> PathBuf {
    PathBuf::from("data/content")
}

fn default_exchange_root() -> PathBuf {
    PathBuf::from("data/exchange")
}
