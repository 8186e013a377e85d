//! Engine configuration.
//!
//! Loaded from a YAML file (path from `SIGNAL_ENGINE_CONFIG`, default
//! `config.yaml`). A missing default file means an all-defaults
//! configuration; every section and field is individually optional. The
//! external sections convert into the service-local config types via the
//! `to_*` methods.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::services::breakeven::BreakevenConfig;
use crate::application::services::orchestrator::OrchestratorConfig;
use crate::application::services::position_monitor::MonitorConfig;
use crate::application::services::sync_broadcaster::SyncConfig;
use crate::application::snapshot::SyncThresholds;
use crate::infrastructure::broker::paper::PaperConfig;
use crate::infrastructure::broker::retry::RetryPolicy;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SIGNAL_ENGINE_CONFIG";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}

/// Broker backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerBackend {
    /// In-process simulated brokerage.
    Paper,
}

/// Broker backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Which backend to run against.
    #[serde(default = "default_backend")]
    pub backend: BrokerBackend,
    /// Paper backend tuning.
    #[serde(default)]
    pub paper: PaperSettings,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            paper: PaperSettings::default(),
        }
    }
}

/// Paper broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSettings {
    /// Absolute fill slippage.
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,
    /// Starting balance.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Units per lot.
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
    /// Account leverage.
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            slippage: default_slippage(),
            starting_balance: default_starting_balance(),
            contract_size: default_contract_size(),
            leverage: default_leverage(),
        }
    }
}

impl PaperSettings {
    /// Convert to the paper broker's config type.
    #[must_use]
    pub const fn to_paper_config(&self) -> PaperConfig {
        PaperConfig {
            slippage: self.slippage,
            starting_balance: self.starting_balance,
            contract_size: self.contract_size,
            leverage: self.leverage,
        }
    }
}

/// Order placement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Delay between consecutive order submissions, in milliseconds.
    #[serde(default = "default_order_pacing_ms")]
    pub order_pacing_ms: u64,
    /// Lot size used when a signal does not specify one.
    #[serde(default = "default_lot_size")]
    pub default_lot_size: Decimal,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            order_pacing_ms: default_order_pacing_ms(),
            default_lot_size: default_lot_size(),
        }
    }
}

impl OrchestratorSettings {
    /// Convert to the orchestrator's config type.
    #[must_use]
    pub const fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            order_pacing: Duration::from_millis(self.order_pacing_ms),
            default_lot_size: self.default_lot_size,
        }
    }
}

/// Position monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Reconciliation tick interval in seconds (1-10).
    #[serde(default = "default_monitor_interval_secs")]
    pub tick_interval_secs: u64,
    /// Units per lot for P&L scaling.
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_monitor_interval_secs(),
            contract_size: default_contract_size(),
        }
    }
}

impl MonitorSettings {
    /// Convert to the monitor's config type.
    #[must_use]
    pub const fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            contract_size: self.contract_size,
        }
    }
}

/// Breakeven transition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakevenSettings {
    /// Offset beyond the entry fill, in the profitable direction.
    #[serde(default = "default_breakeven_offset")]
    pub offset: Decimal,
    /// Minimum distance a new stop keeps from the observed price.
    #[serde(default = "default_min_stop_distance")]
    pub min_stop_distance: Decimal,
}

impl Default for BreakevenSettings {
    fn default() -> Self {
        Self {
            offset: default_breakeven_offset(),
            min_stop_distance: default_min_stop_distance(),
        }
    }
}

impl BreakevenSettings {
    /// Convert to the breakeven engine's config type.
    #[must_use]
    pub const fn to_breakeven_config(&self) -> BreakevenConfig {
        BreakevenConfig {
            offset: self.offset,
            min_stop_distance: self.min_stop_distance,
        }
    }
}

/// Sync broadcaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Capture tick interval in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub tick_interval_secs: u64,
    /// Force a push every this many ticks.
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: u64,
    /// Change threshold for monetary fields.
    #[serde(default = "default_monetary_threshold")]
    pub monetary_threshold: Decimal,
    /// Change threshold for price fields.
    #[serde(default = "default_price_threshold")]
    pub price_threshold: Decimal,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_sync_interval_secs(),
            heartbeat_every: default_heartbeat_every(),
            monetary_threshold: default_monetary_threshold(),
            price_threshold: default_price_threshold(),
        }
    }
}

impl SyncSettings {
    /// Convert to the broadcaster's config type.
    #[must_use]
    pub const fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            heartbeat_every: self.heartbeat_every,
            thresholds: SyncThresholds {
                monetary: self.monetary_threshold,
                price: self.price_threshold,
            },
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Gateway retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retry attempts after the initial call.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds.
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Exponential growth multiplier.
    #[serde(default = "default_retry_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor.
    #[serde(default = "default_retry_jitter")]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
            backoff_multiplier: default_retry_multiplier(),
            jitter_factor: default_retry_jitter(),
        }
    }
}

impl RetrySettings {
    /// Convert to the retry decorator's policy type.
    #[must_use]
    pub const fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Broker backend selection and tuning.
    #[serde(default)]
    pub broker: BrokerSettings,
    /// Order placement.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Position monitoring.
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Breakeven transition.
    #[serde(default)]
    pub breakeven: BreakevenSettings,
    /// Realtime sync broadcasting.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Durable storage.
    #[serde(default)]
    pub persistence: PersistenceSettings,
    /// Gateway retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
}

impl EngineConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.monitor.tick_interval_secs) {
            return Err(ConfigError::ValidationError(format!(
                "monitor.tick_interval_secs must be within 1-10, got {}",
                self.monitor.tick_interval_secs
            )));
        }
        if self.breakeven.offset < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "breakeven.offset must not be negative".to_string(),
            ));
        }
        if self.breakeven.min_stop_distance < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "breakeven.min_stop_distance must not be negative".to_string(),
            ));
        }
        if self.sync.heartbeat_every == 0 {
            return Err(ConfigError::ValidationError(
                "sync.heartbeat_every must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.default_lot_size <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "orchestrator.default_lot_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration.
///
/// An explicit `path` must exist. With no explicit path, the
/// `SIGNAL_ENGINE_CONFIG` variable is consulted, then `config.yaml`; if
/// neither file exists the defaults apply.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    let (resolved, required) = match path {
        Some(p) => (p.to_string(), true),
        None => match std::env::var(CONFIG_PATH_ENV) {
            Ok(p) => (p, true),
            Err(_) => (DEFAULT_CONFIG_PATH.to_string(), false),
        },
    };

    let config = match std::fs::read_to_string(&resolved) {
        Ok(contents) => serde_yaml_bw::from_str(&contents)?,
        Err(source) if required => {
            return Err(ConfigError::ReadError {
                path: resolved,
                source,
            });
        }
        Err(_) => {
            tracing::info!(path = %resolved, "No config file found, using defaults");
            EngineConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}

const fn default_backend() -> BrokerBackend {
    BrokerBackend::Paper
}

fn default_slippage() -> Decimal {
    // One pip-equivalent on 5-digit FX quotes.
    Decimal::new(1, 4)
}

fn default_starting_balance() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_contract_size() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_leverage() -> Decimal {
    Decimal::new(100, 0)
}

const fn default_order_pacing_ms() -> u64 {
    500
}

fn default_lot_size() -> Decimal {
    Decimal::new(10, 2)
}

const fn default_monitor_interval_secs() -> u64 {
    2
}

fn default_breakeven_offset() -> Decimal {
    Decimal::new(1, 4)
}

fn default_min_stop_distance() -> Decimal {
    Decimal::new(5, 4)
}

const fn default_sync_interval_secs() -> u64 {
    5
}

const fn default_heartbeat_every() -> u64 {
    12
}

fn default_monetary_threshold() -> Decimal {
    Decimal::new(1, 2)
}

fn default_price_threshold() -> Decimal {
    Decimal::new(1, 5)
}

fn default_database_path() -> String {
    "signal-engine.db".to_string()
}

const fn default_retry_max_attempts() -> u32 {
    3
}

const fn default_retry_initial_backoff_ms() -> u64 {
    250
}

const fn default_retry_max_backoff_ms() -> u64 {
    5000
}

const fn default_retry_multiplier() -> f64 {
    2.0
}

const fn default_retry_jitter() -> f64 {
    0.2
}
