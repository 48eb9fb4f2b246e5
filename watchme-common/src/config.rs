//! Configuration loading for the WatchMe pipeline
//!
//! Bootstrap configuration comes from a TOML file with the following priority:
//! 1. Command-line arguments (applied by the binary on top of the loaded config)
//! 2. Environment variables (`WATCHME_*`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is not an error: defaults are used and a warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::time::parse_utc_offset;
use crate::types::Stage;
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WATCHME_CONFIG";

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub weekly: WeeklyConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// UTC offset used to derive a local date when the store has none
    ///
    /// Default: `+09:00`
    #[serde(default = "default_fallback_utc_offset")]
    pub fallback_utc_offset: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            store: StoreConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            stages: StagesConfig::default(),
            coordinator: CoordinatorConfig::default(),
            push: PushConfig::default(),
            weekly: WeeklyConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            fallback_utc_offset: default_fallback_utc_offset(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Upstream API gateway and endpoint paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    #[serde(default = "default_aggregator_path")]
    pub aggregator_path: String,

    #[serde(default = "default_profiler_path")]
    pub profiler_path: String,

    #[serde(default = "default_daily_summary_path")]
    pub daily_summary_path: String,

    #[serde(default = "default_dashboard_analysis_path")]
    pub dashboard_analysis_path: String,

    #[serde(default = "default_failed_record_path")]
    pub failed_record_path: String,

    #[serde(default = "default_weekly_aggregator_path")]
    pub weekly_aggregator_path: String,

    #[serde(default = "default_weekly_profiler_path")]
    pub weekly_profiler_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            aggregator_path: default_aggregator_path(),
            profiler_path: default_profiler_path(),
            daily_summary_path: default_daily_summary_path(),
            dashboard_analysis_path: default_dashboard_analysis_path(),
            failed_record_path: default_failed_record_path(),
            weekly_aggregator_path: default_weekly_aggregator_path(),
            weekly_profiler_path: default_weekly_profiler_path(),
        }
    }
}

/// Status Store REST endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL; `/rest/v1/<table>` is appended per request
    #[serde(default)]
    pub url: Option<String>,

    /// Service key sent as `apikey` and bearer token
    #[serde(default)]
    pub service_key: Option<String>,
}

/// Per call-class timeout budgets, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Fire-and-forget start calls and best-effort follow-ups
    #[serde(default = "default_start_timeout")]
    pub start_secs: u64,

    /// Synchronous extraction calls
    #[serde(default = "default_analysis_timeout")]
    pub analysis_secs: u64,

    /// Aggregation chain and relay calls
    #[serde(default = "default_chain_timeout")]
    pub chain_secs: u64,

    /// Status Store requests
    #[serde(default = "default_store_timeout")]
    pub store_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_secs: default_start_timeout(),
            analysis_secs: default_analysis_timeout(),
            chain_secs: default_chain_timeout(),
            store_secs: default_store_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }

    pub fn analysis(&self) -> Duration {
        Duration::from_secs(self.analysis_secs)
    }

    pub fn chain(&self) -> Duration {
        Duration::from_secs(self.chain_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }
}

/// Bounded retry for stage invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

/// Queue transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Time a received message stays invisible before redelivery
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deliveries before a message moves to the dead-letter list
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Window in which a repeated dedup id is collapsed
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// Delay before a nacked message becomes visible again
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,

    /// Idle wait between empty receives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_consumers_per_queue")]
    pub consumers_per_queue: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            dedup_window_secs: default_dedup_window(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            consumers_per_queue: default_consumers_per_queue(),
        }
    }
}

/// How a stage endpoint reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionModeKind {
    /// Synchronous batch result parsed per item
    Batch,
    /// 202 acknowledgement; the endpoint writes status itself
    Accepted,
}

/// One stage endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub mode: CompletionModeKind,

    pub path: String,

    /// Optional stage-aggregator call made after a successful batch
    #[serde(default)]
    pub follow_up_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_asr_stage")]
    pub asr: StageConfig,

    #[serde(default = "default_sed_stage")]
    pub sed: StageConfig,

    #[serde(default = "default_ser_stage")]
    pub ser: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            asr: default_asr_stage(),
            sed: default_sed_stage(),
            ser: default_ser_stage(),
        }
    }
}

impl StagesConfig {
    pub fn for_stage(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Asr => &self.asr,
            Stage::Sed => &self.sed,
            Stage::Ser => &self.ser,
        }
    }
}

/// Barrier claim strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimMode {
    /// Read-then-act; concurrent completions may both fire the chain
    #[default]
    Unguarded,
    /// Conditional `pending -> processing` update before firing the chain
    Conditional,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub claim_mode: ClaimMode,
}

/// Push-notification gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushConfig {
    /// Unset: notifications are resolved and logged but not sent
    #[serde(default)]
    pub gateway_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklyConfig {
    #[serde(default)]
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_api_base_url() -> String {
    "https://api.hey-watch.me".to_string()
}

fn default_aggregator_path() -> String {
    "/aggregator/spot".to_string()
}

fn default_profiler_path() -> String {
    "/profiler/spot-profiler".to_string()
}

fn default_daily_summary_path() -> String {
    "/aggregator/daily".to_string()
}

fn default_dashboard_analysis_path() -> String {
    "/vibe-analysis/scorer/analyze-dashboard-summary".to_string()
}

fn default_failed_record_path() -> String {
    "/vibe-analysis/aggregator/create-failed-record".to_string()
}

fn default_weekly_aggregator_path() -> String {
    "/aggregator/weekly".to_string()
}

fn default_weekly_profiler_path() -> String {
    "/profiler/weekly-profiler".to_string()
}

fn default_start_timeout() -> u64 {
    30
}

fn default_analysis_timeout() -> u64 {
    900
}

fn default_chain_timeout() -> u64 {
    180
}

fn default_store_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![429, 503]
}

fn default_visibility_timeout() -> u64 {
    960
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_dedup_window() -> u64 {
    300
}

fn default_redelivery_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_consumers_per_queue() -> usize {
    4
}

fn default_asr_stage() -> StageConfig {
    StageConfig {
        mode: CompletionModeKind::Batch,
        path: "/vibe-analysis/transcriber/fetch-and-transcribe".to_string(),
        follow_up_path: None,
    }
}

fn default_sed_stage() -> StageConfig {
    StageConfig {
        mode: CompletionModeKind::Batch,
        path: "/behavior-analysis/features/fetch-and-process-paths".to_string(),
        follow_up_path: Some("/behavior-aggregator/analysis/sed".to_string()),
    }
}

fn default_ser_stage() -> StageConfig {
    StageConfig {
        mode: CompletionModeKind::Batch,
        path: "/emotion-analysis/feature-extractor/process/emotion-features".to_string(),
        follow_up_path: Some("/emotion-aggregator/analyze/opensmile-aggregator".to_string()),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fallback_utc_offset() -> String {
    "+09:00".to_string()
}

// ============================================================================
// Loading
// ============================================================================

impl TomlConfig {
    /// Load configuration following the documented priority order
    ///
    /// # Arguments
    /// * `cli_path` - config file given on the command line, if any
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Apply `WATCHME_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = env_value("WATCHME_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(url) = env_value("WATCHME_STORE_URL") {
            self.store.url = Some(url);
        }
        if let Some(key) = env_value("WATCHME_STORE_KEY") {
            self.store.service_key = Some(key);
        }
        if let Some(url) = env_value("WATCHME_PUSH_GATEWAY_URL") {
            self.push.gateway_url = Some(url);
        }
        if let Some(offset) = env_value("WATCHME_FALLBACK_UTC_OFFSET") {
            self.fallback_utc_offset = offset;
        }
        if let Some(level) = env_value("WATCHME_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(port) = env_value("WATCHME_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("WATCHME_PORT is not a port number: {}", port)))?;
        }
        if let Some(mode) = env_value("WATCHME_CLAIM_MODE") {
            self.coordinator.claim_mode = match mode.as_str() {
                "unguarded" => ClaimMode::Unguarded,
                "conditional" => ClaimMode::Conditional,
                other => {
                    return Err(Error::Config(format!(
                        "WATCHME_CLAIM_MODE must be 'unguarded' or 'conditional', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(devices) = env_value("WATCHME_WEEKLY_DEVICE_IDS") {
            self.weekly.device_ids = devices
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Reject configurations that cannot drive the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.queue.consumers_per_queue == 0 {
            return Err(Error::Config("queue.consumers_per_queue must be at least 1".to_string()));
        }
        parse_utc_offset(&self.fallback_utc_offset)?;
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Find the config file to load
///
/// Order: CLI path, `WATCHME_CONFIG`, `~/.config/watchme/pipeline.toml`,
/// `/etc/watchme/pipeline.toml`. Explicit paths are returned even when they do
/// not exist so the read error surfaces.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Some(path) = env_value(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("watchme").join("pipeline.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/watchme/pipeline.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
