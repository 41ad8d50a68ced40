use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Push delivery provider (external-user-id keyed, OneSignal-style API).
#[derive(Debug, Default, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// Chat-bot delivery (Telegram-compatible bot API).
#[derive(Debug, Default, Deserialize)]
pub struct ChatBotConfig {
    #[serde(default)]
    pub enabled: bool,
    pub api_url: Option<String>,
    pub bot_token: Option<String>,
}

/// Endpoints of the external collaborators the core consumes.
#[derive(Debug, Deserialize)]
pub struct CollaboratorsConfig {
    /// Base URL of the fetch service ("fetch current status of resource X").
    pub fetch_url: String,
    /// Base URL of the subscriber directory (tier + contact lookup).
    pub directory_url: String,
    /// How long tier/contact lookups may be served from cache. Tiers change
    /// rarely; a few seconds of staleness is acceptable.
    #[serde(default = "default_directory_cache_secs")]
    pub cache_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PollerConfig {
    /// Target cadence per resource, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Ceiling on concurrent calls to the fetch collaborator. This is the
    /// single backpressure valve protecting the monitored source.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// How often the set of actively-subscribed resources is rescanned.
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout(),
            rescan_interval_secs: default_rescan_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Max jobs claimed per cycle by one worker.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u64,
    #[serde(default = "default_dispatch_poll_interval")]
    pub poll_interval_secs: u64,
    /// Delivery rounds before a job is marked permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// Claims older than this on unsent jobs are treated as abandoned by a
    /// crashed worker and released.
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_limit: default_batch_limit(),
            poll_interval_secs: default_dispatch_poll_interval(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            stale_claim_secs: default_stale_claim(),
        }
    }
}

/// Tier name → notification delay in seconds. Operator-configurable; the
/// delay is the monetization lever, not a technical constant.
#[derive(Clone, Debug, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_tier_delays")]
    pub delays: HashMap<String, u64>,
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            delays: default_tier_delays(),
            default_tier: default_tier_name(),
        }
    }
}

impl TierConfig {
    /// Delay for a tier. Unknown tiers fall back to the default tier so a
    /// directory/config mismatch never loses a notification.
    pub fn delay_for(&self, tier: &str) -> time::Duration {
        let secs = self
            .delays
            .get(tier)
            .or_else(|| self.delays.get(&self.default_tier))
            .copied()
            .unwrap_or(0);
        time::Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Base URL of the source's resource pages, used in notification links.
    pub source_url_base: String,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub chat_bot: ChatBotConfig,
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub tiers: TierConfig,
}

fn default_true() -> bool {
    true
}
fn default_directory_cache_secs() -> u64 {
    5
}
fn default_check_interval() -> u64 {
    5
}
fn default_max_concurrent_fetches() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_rescan_interval() -> u64 {
    30
}
fn default_workers() -> usize {
    2
}
fn default_batch_limit() -> u64 {
    20
}
fn default_dispatch_poll_interval() -> u64 {
    1
}
fn default_max_attempts() -> i32 {
    3
}
fn default_retry_backoff() -> u64 {
    5
}
fn default_stale_claim() -> u64 {
    120
}

fn default_tier_delays() -> HashMap<String, u64> {
    HashMap::from([
        ("free".to_string(), 600),
        ("plus".to_string(), 60),
        ("pro".to_string(), 10),
    ])
}

fn default_tier_name() -> String {
    "free".to_string()
}

fn validate(app: &AppConfig) -> Result<(), ConfigError> {
    if app.smtp.enabled && app.smtp.port == 0 {
        return Err(ConfigError::Validation("smtp.port must be > 0".into()));
    }
    if app.push.enabled && (app.push.endpoint.is_none() || app.push.api_key.is_none()) {
        return Err(ConfigError::Validation(
            "push.endpoint and push.api_key are required when push is enabled".into(),
        ));
    }
    if app.chat_bot.enabled && (app.chat_bot.api_url.is_none() || app.chat_bot.bot_token.is_none())
    {
        return Err(ConfigError::Validation(
            "chat_bot.api_url and chat_bot.bot_token are required when chat_bot is enabled".into(),
        ));
    }
    if app.tiers.delays.is_empty() {
        return Err(ConfigError::Validation(
            "tiers.delays must not be empty".into(),
        ));
    }
    if !app.tiers.delays.contains_key(&app.tiers.default_tier) {
        return Err(ConfigError::Validation(format!(
            "tiers.default_tier '{}' is missing from tiers.delays",
            app.tiers.default_tier
        )));
    }
    if app.poller.check_interval_secs == 0 || app.poller.rescan_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "poller intervals must be > 0".into(),
        ));
    }
    if app.poller.max_concurrent_fetches == 0 {
        return Err(ConfigError::Validation(
            "poller.max_concurrent_fetches must be > 0".into(),
        ));
    }
    if app.dispatch.workers == 0 || app.dispatch.batch_limit == 0 {
        return Err(ConfigError::Validation(
            "dispatch.workers and dispatch.batch_limit must be > 0".into(),
        ));
    }
    if app.dispatch.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "dispatch.max_attempts must be >= 1".into(),
        ));
    }
    Ok(())
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables matching the key path separated by double
/// underscores (e.g. `SMTP__PORT`) override the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    validate(&app)?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
database_url: "sqlite::memory:"
source_url_base: "https://entries.example.com/events"
smtp:
  server: "smtp.example.com"
  port: 587
  username: "user"
  password: "pass"
  from: "EntryWatch <noreply@example.com>"
collaborators:
  fetch_url: "http://localhost:9100"
  directory_url: "http://localhost:9200"
"#;

    #[test]
    fn minimal_config_passes_validation_with_defaults() {
        let app = parse(MINIMAL);
        assert!(validate(&app).is_ok());
        assert_eq!(app.poller.check_interval_secs, 5);
        assert_eq!(app.dispatch.max_attempts, 3);
        assert_eq!(app.tiers.default_tier, "free");
        assert!(!app.push.enabled);
    }

    #[test]
    fn delay_for_known_and_unknown_tiers() {
        let tiers = TierConfig::default();
        assert_eq!(tiers.delay_for("pro"), time::Duration::seconds(10));
        assert_eq!(tiers.delay_for("plus"), time::Duration::seconds(60));
        // Unknown tier falls back to the default tier's delay
        assert_eq!(tiers.delay_for("legacy"), time::Duration::seconds(600));
    }

    #[test]
    fn push_enabled_without_credentials_is_rejected() {
        let mut app = parse(MINIMAL);
        app.push.enabled = true;
        assert!(matches!(
            validate(&app),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn default_tier_must_exist_in_delay_table() {
        let mut app = parse(MINIMAL);
        app.tiers.default_tier = "platinum".into();
        assert!(validate(&app).is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut app = parse(MINIMAL);
        app.poller.check_interval_secs = 0;
        assert!(validate(&app).is_err());

        let mut app = parse(MINIMAL);
        app.dispatch.batch_limit = 0;
        assert!(validate(&app).is_err());
    }
}
