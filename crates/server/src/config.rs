use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SchedulerConfig {
    /// Shared secret expected as `Authorization: Bearer <secret>` on the
    /// `/process-scheduled` trigger.
    pub shared_secret: String,
    /// How often the internal dispatch loop fires.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound for a single dispatch tick before it is abandoned and
    /// retried on the next tick.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UnsubscribeConfig {
    pub token_secret: String,
    #[serde(default = "default_token_max_age_days")]
    pub token_max_age_days: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackingConfig {
    /// Window within which repeat opens for the same send do not increment
    /// the campaign counter. Image-proxying mail providers re-fetch the
    /// pixel well inside this window.
    #[serde(default = "default_open_dedup_window_secs")]
    pub open_dedup_window_secs: u64,
    /// Redirect target when a click hit carries no usable `url` parameter.
    pub fallback_redirect_url: String,
    /// Additional User-Agent substrings classified as automated, appended to
    /// the built-in blocklist.
    #[serde(default)]
    pub extra_bot_user_agents: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DispatchConfig {
    /// Concurrent in-flight transport calls per campaign.
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,
    /// Per-message transport timeout.
    #[serde(default = "default_transport_timeout_secs")]
    pub transport_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub smtp: SmtpConfig,
    /// Public base URL embedded in tracking pixels, rewritten links and
    /// unsubscribe URLs. No trailing slash.
    pub site_url: String,
    pub scheduler: SchedulerConfig,
    pub unsubscribe: UnsubscribeConfig,
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_concurrency: default_send_concurrency(),
            transport_timeout_secs: default_transport_timeout_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_token_max_age_days() -> i64 {
    30
}

fn default_open_dedup_window_secs() -> u64 {
    300
}

fn default_send_concurrency() -> usize {
    8
}

fn default_transport_timeout_secs() -> u64 {
    30
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables matching the key path separated by double
/// underscores (e.g. `SMTP__PORT`, `SCHEDULER__SHARED_SECRET`) override the
/// file values.
///
/// Returns a `ConfigError` instead of panicking so the caller can decide how
/// to fail.
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

fn validate(app: &AppConfig) -> Result<(), ConfigError> {
    if app.unsubscribe.token_secret.len() < 32 {
        return Err(ConfigError::Validation(
            "unsubscribe.token_secret must be at least 32 characters".into(),
        ));
    }
    if app.scheduler.shared_secret.len() < 32 {
        return Err(ConfigError::Validation(
            "scheduler.shared_secret must be at least 32 characters".into(),
        ));
    }
    if app.smtp.port == 0 {
        return Err(ConfigError::Validation("smtp.port must be > 0".into()));
    }
    if app.tracking.open_dedup_window_secs == 0 {
        return Err(ConfigError::Validation(
            "tracking.open_dedup_window_secs must be > 0".into(),
        ));
    }
    if app.dispatch.send_concurrency == 0 {
        return Err(ConfigError::Validation(
            "dispatch.send_concurrency must be > 0".into(),
        ));
    }
    if app.site_url.ends_with('/') {
        return Err(ConfigError::Validation(
            "site_url must not have a trailing slash".into(),
        ));
    }
    Ok(())
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
