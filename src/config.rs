// =============================================================================
// AppConfig — YAML configuration with validation and defaults
// =============================================================================
//
// Every field carries a serde default so older config files keep loading as
// new fields appear. `load_config` reads the YAML, then `validate` rejects
// out-of-range enums and empty subscription sets before anything starts.
// =============================================================================

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::quote::mock::MockFeederConfig;
use crate::types::{Period, PushMode};

// -----------------------------------------------------------------------------
// Default-value helpers (required by serde `default = "..."`)
// -----------------------------------------------------------------------------

fn default_qmt_mode() -> String {
    "none".into()
}

fn default_redis_host() -> String {
    "127.0.0.1".into()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_topic() -> String {
    "xt:topic:bar".into()
}

fn default_periods() -> Vec<String> {
    vec!["1m".into()]
}

fn default_sub_mode() -> String {
    "close_only".into()
}

fn default_close_delay_ms() -> u64 {
    100
}

fn default_preload_days() -> u32 {
    3
}

fn default_log_level() -> String {
    "INFO".into()
}

fn default_rotate_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_rotate_backup_count() -> u32 {
    5
}

fn default_control_channel() -> String {
    "xt:ctrl:sub".into()
}

fn default_ack_prefix() -> String {
    "xt:ctrl:ack".into()
}

fn default_registry_prefix() -> String {
    "xt:bridge".into()
}

fn default_health_key_prefix() -> String {
    "xt:bridge:health".into()
}

fn default_health_interval() -> u64 {
    5
}

fn default_health_ttl() -> u64 {
    20
}

fn default_mock_base_price() -> f64 {
    10.0
}

fn default_mock_volatility() -> f64 {
    0.002
}

fn default_mock_step_seconds() -> f64 {
    1.0
}

fn default_mock_volume_mean() -> f64 {
    1_000_000.0
}

fn default_mock_volume_std() -> f64 {
    200_000.0
}

fn default_mock_source() -> String {
    "mock".into()
}

// -----------------------------------------------------------------------------
// Sections
// -----------------------------------------------------------------------------

/// Vendor wiring mode. `none` skips the listen handshake; `legacy` is the
/// old listen path. Either way the vendor library itself must be available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QmtSection {
    #[serde(default = "default_qmt_mode")]
    pub mode: String,
    #[serde(default)]
    pub token: String,
}

impl Default for QmtSection {
    fn default() -> Self {
        Self {
            mode: default_qmt_mode(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSection {
    /// Full connection URL; overrides the discrete fields when present.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: u32,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            topic: default_topic(),
        }
    }
}

impl RedisSection {
    /// The URL the bus clients connect with.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            parse_redis_url(url)?;
            return Ok(url.clone());
        }
        let auth = match &self.password {
            Some(p) if !p.is_empty() => format!(":{p}@"),
            _ => String::new(),
        };
        Ok(format!(
            "redis://{auth}{}:{}/{}",
            self.host, self.port, self.db
        ))
    }

    /// Host and port for display, resolving through `url` when set.
    pub fn endpoint(&self) -> (String, u16) {
        if let Some(url) = &self.url {
            if let Ok(parts) = parse_redis_url(url) {
                return (parts.host, parts.port);
            }
        }
        (self.host.clone(), self.port)
    }
}

/// Decomposed `redis://` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisUrlParts {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
}

/// Parse `redis://[user:pass@]host[:port][/db]` (also `rediss://`).
pub fn parse_redis_url(url: &str) -> Result<RedisUrlParts> {
    let rest = url
        .strip_prefix("redis://")
        .or_else(|| url.strip_prefix("rediss://"))
        .ok_or_else(|| BridgeError::Config(format!("invalid redis url scheme: {url}")))?;

    let (userinfo, hostpart) = match rest.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, rest),
    };
    // Userinfo is user:pass; a lone segment is a username, not a password.
    let password = userinfo.and_then(|u| u.split_once(':').map(|(_, p)| p.to_string()));

    let (hostport, path) = match hostpart.split_once('/') {
        Some((hp, p)) => (hp, p),
        None => (hostpart, ""),
    };
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .map_err(|_| BridgeError::Config(format!("invalid redis port in url: {url}")))?,
        ),
        None => (hostport.to_string(), default_redis_port()),
    };
    let host = if host.is_empty() {
        default_redis_host()
    } else {
        host
    };
    let db = if path.is_empty() {
        0
    } else {
        path.parse()
            .map_err(|_| BridgeError::Config(format!("invalid redis db in url: {url}")))?
    };

    Ok(RedisUrlParts {
        host,
        port,
        password,
        db,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSection {
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default = "default_periods")]
    pub periods: Vec<String>,
    #[serde(default = "default_sub_mode")]
    pub mode: String,
    /// Retained for config compatibility; closure is derived from timestamp
    /// advancement and never gated on wall-clock delay.
    #[serde(default = "default_close_delay_ms")]
    pub close_delay_ms: u64,
    #[serde(default = "default_preload_days")]
    pub preload_days: u32,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            codes: Vec::new(),
            periods: default_periods(),
            mode: default_sub_mode(),
            close_delay_ms: default_close_delay_ms(),
            preload_days: default_preload_days(),
        }
    }
}

impl SubscriptionSection {
    pub fn parsed_periods(&self) -> Result<Vec<Period>> {
        self.periods.iter().map(|p| Period::from_str(p)).collect()
    }

    pub fn parsed_mode(&self) -> Result<PushMode> {
        PushMode::from_str(&self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mock_base_price")]
    pub base_price: f64,
    #[serde(default = "default_mock_volatility")]
    pub volatility: f64,
    #[serde(default = "default_mock_step_seconds")]
    pub step_seconds: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_mock_volume_mean")]
    pub volume_mean: f64,
    #[serde(default = "default_mock_volume_std")]
    pub volume_std: f64,
    #[serde(default = "default_mock_source")]
    pub source: String,
}

impl Default for MockSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_price: default_mock_base_price(),
            volatility: default_mock_volatility(),
            step_seconds: default_mock_step_seconds(),
            seed: None,
            volume_mean: default_mock_volume_mean(),
            volume_std: default_mock_volume_std(),
            source: default_mock_source(),
        }
    }
}

impl MockSection {
    pub fn feeder_config(&self) -> MockFeederConfig {
        MockFeederConfig {
            base_price: self.base_price,
            volatility: self.volatility,
            step_seconds: self.step_seconds,
            seed: self.seed,
            volume_mean: self.volume_mean,
            volume_std: self.volume_std,
            source: self.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotateSection {
    #[serde(default)]
    pub enabled: bool,
    /// Accepted for compatibility; file rotation rolls daily.
    #[serde(default = "default_rotate_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_rotate_backup_count")]
    pub backup_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub rotate: Option<RotateSection>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            rotate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_control_channel")]
    pub channel: String,
    #[serde(default = "default_ack_prefix")]
    pub ack_prefix: String,
    #[serde(default = "default_registry_prefix")]
    pub registry_prefix: String,
    #[serde(default)]
    pub accept_strategies: Vec<String>,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: default_control_channel(),
            ack_prefix: default_ack_prefix(),
            registry_prefix: default_registry_prefix(),
            accept_strategies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_health_interval")]
    pub interval_sec: u64,
    #[serde(default = "default_health_ttl")]
    pub ttl_sec: u64,
    #[serde(default)]
    pub instance_tag: Option<String>,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: default_health_key_prefix(),
            interval_sec: default_health_interval(),
            ttl_sec: default_health_ttl(),
            instance_tag: None,
        }
    }
}

/// Top-level configuration aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub qmt: QmtSection,
    #[serde(default)]
    pub redis: RedisSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub mock: MockSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub health: HealthSection,
}

impl AppConfig {
    /// Reject out-of-range enums and empty subscription sets.
    pub fn validate(&self) -> Result<()> {
        match self.qmt.mode.as_str() {
            "none" | "legacy" => {}
            other => {
                return Err(BridgeError::Config(format!(
                    "qmt.mode must be none or legacy, got: {other}"
                )))
            }
        }
        self.redis.connection_url()?;
        if self.subscription.codes.is_empty() {
            return Err(BridgeError::Config(
                "subscription.codes must not be empty".into(),
            ));
        }
        if self.subscription.periods.is_empty() {
            return Err(BridgeError::Config(
                "subscription.periods must not be empty".into(),
            ));
        }
        self.subscription.parsed_periods()?;
        self.subscription.parsed_mode()?;
        Ok(())
    }
}

/// Load and validate a YAML config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config {}: {e}", path.display()))
    })?;
    let config: AppConfig = serde_yaml::from_str(&content).map_err(|e| {
        BridgeError::Config(format!("failed to parse config {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
subscription:
  codes: ["510050.SH"]
"#;

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.qmt.mode, "none");
        assert_eq!(cfg.redis.topic, "xt:topic:bar");
        assert_eq!(cfg.subscription.periods, vec!["1m"]);
        assert_eq!(cfg.subscription.mode, "close_only");
        assert_eq!(cfg.subscription.preload_days, 3);
        assert_eq!(cfg.subscription.close_delay_ms, 100);
        assert!(!cfg.control.enabled);
        assert_eq!(cfg.control.channel, "xt:ctrl:sub");
        assert_eq!(cfg.health.interval_sec, 5);
        assert!(!cfg.mock.enabled);
    }

    #[test]
    fn full_yaml_round_trip() {
        let yaml = r#"
qmt:
  mode: legacy
  token: "t0ken"
redis:
  url: "redis://:pw@10.1.2.3:6380/2"
  topic: "bars"
subscription:
  codes: ["510050.SH", "159915.SZ"]
  periods: ["1m", "1d"]
  mode: forming_and_close
  preload_days: 7
logging:
  level: DEBUG
  json: true
  file: logs/bridge.log
  rotate:
    enabled: true
    max_bytes: 1048576
    backup_count: 3
control:
  enabled: true
  accept_strategies: ["alpha", "beta"]
health:
  enabled: true
  interval_sec: 10
  ttl_sec: 30
  instance_tag: prod
mock:
  enabled: true
  seed: 42
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.qmt.mode, "legacy");
        assert_eq!(cfg.redis.endpoint(), ("10.1.2.3".to_string(), 6380));
        assert_eq!(
            cfg.subscription.parsed_periods().unwrap(),
            vec![Period::M1, Period::D1]
        );
        assert_eq!(
            cfg.subscription.parsed_mode().unwrap(),
            PushMode::FormingAndClose
        );
        assert_eq!(cfg.logging.rotate.as_ref().unwrap().backup_count, 3);
        assert_eq!(cfg.control.accept_strategies.len(), 2);
        assert_eq!(cfg.mock.seed, Some(42));
    }

    #[test]
    fn empty_codes_rejected() {
        let cfg: AppConfig = serde_yaml::from_str("{}").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("codes"));
    }

    #[test]
    fn bad_period_rejected() {
        let yaml = r#"
subscription:
  codes: ["X"]
  periods: ["5m"]
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_mode_rejected() {
        let yaml = r#"
subscription:
  codes: ["X"]
  mode: "sometimes"
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_qmt_mode_rejected() {
        let yaml = r#"
qmt:
  mode: modern
subscription:
  codes: ["X"]
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redis_url_parsing() {
        let parts = parse_redis_url("redis://127.0.0.1:6379/0").unwrap();
        assert_eq!(parts.host, "127.0.0.1");
        assert_eq!(parts.port, 6379);
        assert_eq!(parts.password, None);
        assert_eq!(parts.db, 0);

        let parts = parse_redis_url("redis://:secret@10.0.0.5:7000/3").unwrap();
        assert_eq!(parts.password.as_deref(), Some("secret"));
        assert_eq!(parts.db, 3);

        let parts = parse_redis_url("rediss://example.com").unwrap();
        assert_eq!(parts.port, 6379);
        assert_eq!(parts.db, 0);

        assert!(parse_redis_url("http://example.com").is_err());
        assert!(parse_redis_url("redis://host:notaport/0").is_err());
    }

    #[test]
    fn connection_url_from_fields() {
        let sec = RedisSection {
            password: Some("pw".into()),
            db: 2,
            ..RedisSection::default()
        };
        assert_eq!(sec.connection_url().unwrap(), "redis://:pw@127.0.0.1:6379/2");

        let sec = RedisSection::default();
        assert_eq!(sec.connection_url().unwrap(), "redis://127.0.0.1:6379/0");

        let sec = RedisSection {
            url: Some("redis://10.0.0.1:6400/1".into()),
            ..RedisSection::default()
        };
        assert_eq!(sec.connection_url().unwrap(), "redis://10.0.0.1:6400/1");
    }
}
