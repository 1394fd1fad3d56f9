//! TOML configuration for the NetSentinel daemon.
//!
//! Layered configuration with compiled-in defaults: an explicit path wins,
//! then the `NETSENTINEL_CONFIG` environment variable, then the standard
//! system location, then defaults.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub processing: ProcessingConfig,
    pub alerting: AlertingConfig,
    pub baseline: BaselineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. An explicit `--config` path (errors are fatal there).
    /// 2. The path in the `NETSENTINEL_CONFIG` environment variable.
    /// 3. `/etc/netsentinel/netsentinel.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("NETSENTINEL_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETSENTINEL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/netsentinel/netsentinel.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/netsentinel.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the status/ack HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory polled for incoming scan JSON documents.
    pub spool_dir: String,
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            spool_dir: "data/incoming".to_string(),
            poll_interval_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Processing (pipeline)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Historical uptime ratio above which going offline raises an anomaly.
    pub uptime_threshold_for_downtime_alert: f64,
    /// Current latency must exceed baseline mean times this multiplier.
    pub latency_spike_threshold_multiplier: f64,
    /// Consecutive lookup failures before the circuit breaker opens.
    pub breaker_failure_threshold: u32,
    /// Seconds the breaker stays open before permitting one trial call.
    pub breaker_cooldown_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            uptime_threshold_for_downtime_alert: 0.95,
            latency_spike_threshold_multiplier: 2.5,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Global kill switch: when false, `process_anomalies` is a no-op.
    pub enabled: bool,
    /// Upper bound on concurrent channel dispatch tasks.
    pub max_concurrent_dispatches: usize,
    /// Per-send timeout for network channels, in seconds.
    pub send_timeout_secs: u64,
    /// Seconds between escalation sweeps over unresolved incidents.
    pub escalation_sweep_interval_secs: u64,
    pub channels: ChannelsConfig,
    /// Per-anomaly-type rule overrides, keyed by anomaly type name.
    pub rules: HashMap<String, RuleConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_dispatches: 4,
            send_timeout_secs: 10,
            escalation_sweep_interval_secs: 60,
            channels: ChannelsConfig::default(),
            rules: HashMap::new(),
        }
    }
}

/// Channel endpoint configuration. The dashboard channel needs none and is
/// always registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub email: EmailChannelConfig,
    pub telegram: TelegramChannelConfig,
    pub sms: WebhookChannelConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailChannelConfig {
    pub enabled: bool,
    /// HTTP mail gateway endpoint (JSON POST). SMTP transport itself is
    /// delegated to the gateway.
    pub gateway_url: String,
    pub api_key: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramChannelConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

/// Generic webhook channel, used for SMS-gateway style integrations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookChannelConfig {
    pub enabled: bool,
    pub url: String,
}

/// Per-type rule override. Any field left out keeps the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub channels: Option<Vec<String>>,
    pub throttle_minutes: Option<i64>,
    pub severity: Option<String>,
    pub whitelist_ports: Option<Vec<u16>>,
    pub aggregate_minutes: Option<i64>,
    pub require_acknowledgment: Option<bool>,
    pub escalation: Option<Vec<EscalationStepConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStepConfig {
    pub after_minutes: i64,
    #[serde(default)]
    pub add_channel: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

// ---------------------------------------------------------------------------
// Baseline engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Minimum recent samples before any recalibration decision is made.
    pub min_learning_samples: usize,
    /// Significance level for the drift test battery.
    pub drift_significance: f64,
    /// Hourly-pattern correlation below this flags a seasonal change.
    pub seasonal_correlation_threshold: f64,
    /// MAPE (percent) above this triggers recalibration.
    pub mape_threshold_percent: f64,
    /// Smoothing factor for gradual recalibration.
    pub smoothing_alpha: f64,
    /// Smoothing factor when the adaptive policy picks a gradual update.
    pub adaptive_alpha: f64,
    /// Volatility (std/mean) above which the adaptive policy goes gradual.
    pub volatility_threshold: f64,
    /// Consecutive failed validations before a baseline is marked degraded.
    pub max_validation_failures: u32,
    /// Hours of status history fed to each recalibration decision.
    pub sample_window_hours: i64,
    /// Sweep cadence: optional 5-field cron expression, else the interval.
    pub sweep_cron: Option<String>,
    pub sweep_interval_secs: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_learning_samples: 100,
            drift_significance: 0.01,
            seasonal_correlation_threshold: 0.7,
            mape_threshold_percent: 15.0,
            smoothing_alpha: 0.1,
            adaptive_alpha: 0.05,
            volatility_threshold: 0.5,
            max_validation_failures: 3,
            sample_window_hours: 24,
            sweep_cron: None,
            sweep_interval_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.storage.db_path, "data/netsentinel.db");
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.ingest.poll_interval_secs, 5);

        assert_eq!(cfg.processing.uptime_threshold_for_downtime_alert, 0.95);
        assert_eq!(cfg.processing.latency_spike_threshold_multiplier, 2.5);
        assert_eq!(cfg.processing.breaker_failure_threshold, 5);
        assert_eq!(cfg.processing.breaker_cooldown_secs, 60);

        assert!(cfg.alerting.enabled);
        assert!(!cfg.alerting.channels.email.enabled);
        assert!(cfg.alerting.rules.is_empty());

        assert_eq!(cfg.baseline.min_learning_samples, 100);
        assert_eq!(cfg.baseline.drift_significance, 0.01);
        assert_eq!(cfg.baseline.mape_threshold_percent, 15.0);
        assert_eq!(cfg.baseline.max_validation_failures, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[processing]
latency_spike_threshold_multiplier = 3.0

[alerting.channels.telegram]
enabled = true
bot_token = "123:abc"
chat_id = "-100200300"
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.processing.latency_spike_threshold_multiplier, 3.0);
        assert_eq!(cfg.processing.uptime_threshold_for_downtime_alert, 0.95);
        assert!(cfg.alerting.channels.telegram.enabled);
        assert_eq!(cfg.alerting.channels.telegram.chat_id, "-100200300");
        assert!(!cfg.alerting.channels.email.enabled);
    }

    #[test]
    fn test_rule_override_parses() {
        let toml_str = r#"
[alerting.rules.new_device]
channels = ["dashboard"]
throttle_minutes = 120

[[alerting.rules.sudden_downtime.escalation]]
after_minutes = 30
add_channel = "sms"
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();
        let rule = cfg.alerting.rules.get("new_device").unwrap();
        assert_eq!(rule.throttle_minutes, Some(120));
        assert_eq!(rule.channels.as_deref(), Some(&["dashboard".to_string()][..]));

        let downtime = cfg.alerting.rules.get("sudden_downtime").unwrap();
        let ladder = downtime.escalation.as_ref().unwrap();
        assert_eq!(ladder[0].after_minutes, 30);
        assert_eq!(ladder[0].add_channel.as_deref(), Some("sms"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("netsentinel.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9090"
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9090");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/netsentinel.toml")).is_err());
    }
}
