//! Configuration
//!
//! All settings have defaults, so an empty TOML document is a valid config.
//! Durations are expressed in milliseconds (`*_ms`).
//!
//! ```toml
//! [remote]
//! base_url = "https://decks.example.com/api"
//!
//! [sync]
//! short_interval_ms = 2500
//! long_interval_ms = 20000
//!
//! [sync.run_timeouts]
//! illustration_ms = 45000
//! ```

use crate::error::ConfigError;
use deckflow_model::StageKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DECKFLOW_CONFIG";
/// Environment override for [`RemoteConfig::base_url`]
pub const BASE_URL_ENV: &str = "DECKFLOW_BASE_URL";
/// Environment override for [`RemoteConfig::api_token`]
pub const API_TOKEN_ENV: &str = "DECKFLOW_API_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckflowConfig {
    /// Remote service settings
    pub remote: RemoteConfig,
    /// Polling and timeout policy
    pub sync: SyncConfig,
}

impl DeckflowConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// Returns error on TOML syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Apply `DECKFLOW_*` overrides from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.remote.base_url = url;
        }
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.remote.api_token = Some(token);
        }
        self
    }

    /// Validate all sections
    ///
    /// # Errors
    /// Returns the first invalid value found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote.validate()?;
        self.sync.validate()
    }
}

/// Remote service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the presentation API
    pub base_url: String,
    /// Static bearer token, passed through untouched
    pub api_token: Option<String>,
    /// Transport-level timeout for any single HTTP request
    pub request_timeout_ms: u64,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            request_timeout_ms: 60_000,
            user_agent: format!("deckflow/{}", crate::VERSION),
        }
    }
}

impl RemoteConfig {
    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// With base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "remote.base_url",
                format!("expected an http(s) URL, got '{}'", self.base_url),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("remote.request_timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

/// Polling cadence and bounded waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Poll interval while any step is processing
    pub short_interval_ms: u64,
    /// Poll interval while everything is settled
    pub long_interval_ms: u64,
    /// Park the poller once every enabled stage is terminal
    pub stop_when_settled: bool,
    /// Bounded wait for one snapshot fetch
    pub fetch_timeout_ms: u64,
    /// Bounded wait for a suggestion save
    pub save_timeout_ms: u64,
    /// Bounded wait for the interpretation call
    pub interpret_timeout_ms: u64,
    /// Per-stage bounded wait for run acknowledgements
    pub run_timeouts: RunTimeouts,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            short_interval_ms: 2_500,
            long_interval_ms: 20_000,
            stop_when_settled: true,
            fetch_timeout_ms: 10_000,
            save_timeout_ms: 15_000,
            interpret_timeout_ms: 30_000,
            run_timeouts: RunTimeouts::default(),
        }
    }
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With short (active) interval
    #[inline]
    #[must_use]
    pub fn with_short_interval(mut self, interval: Duration) -> Self {
        self.short_interval_ms = millis(interval);
        self
    }

    /// With long (settled) interval
    #[inline]
    #[must_use]
    pub fn with_long_interval(mut self, interval: Duration) -> Self {
        self.long_interval_ms = millis(interval);
        self
    }

    /// With settled behaviour
    #[inline]
    #[must_use]
    pub fn with_stop_when_settled(mut self, stop: bool) -> Self {
        self.stop_when_settled = stop;
        self
    }

    /// With save timeout
    #[inline]
    #[must_use]
    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout_ms = millis(timeout);
        self
    }

    /// With run timeout for one stage
    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, stage: StageKind, timeout: Duration) -> Self {
        self.run_timeouts.set(stage, timeout);
        self
    }

    /// Active poll interval
    #[inline]
    #[must_use]
    pub fn short_interval(&self) -> Duration {
        Duration::from_millis(self.short_interval_ms)
    }

    /// Settled poll interval
    #[inline]
    #[must_use]
    pub fn long_interval(&self) -> Duration {
        Duration::from_millis(self.long_interval_ms)
    }

    /// Fetch timeout
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Save timeout
    #[inline]
    #[must_use]
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    /// Interpret timeout
    #[inline]
    #[must_use]
    pub fn interpret_timeout(&self) -> Duration {
        Duration::from_millis(self.interpret_timeout_ms)
    }

    /// Run acknowledgement timeout for `stage`
    #[inline]
    #[must_use]
    pub fn run_timeout(&self, stage: StageKind) -> Duration {
        self.run_timeouts.for_stage(stage)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.short_interval_ms == 0 {
            return Err(ConfigError::invalid("sync.short_interval_ms", "must be > 0"));
        }
        if self.long_interval_ms <= self.short_interval_ms {
            return Err(ConfigError::invalid(
                "sync.long_interval_ms",
                format!(
                    "must exceed short_interval_ms ({} <= {})",
                    self.long_interval_ms, self.short_interval_ms
                ),
            ));
        }
        for (field, value) in [
            ("sync.fetch_timeout_ms", self.fetch_timeout_ms),
            ("sync.save_timeout_ms", self.save_timeout_ms),
            ("sync.interpret_timeout_ms", self.interpret_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be > 0"));
            }
        }
        self.run_timeouts.validate()
    }
}

/// Run acknowledgement budgets per stage
///
/// Illustration and export are heavier than research and slide generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTimeouts {
    pub research_ms: u64,
    pub manual_research_ms: u64,
    pub slides_ms: u64,
    pub illustration_ms: u64,
    pub pptx_ms: u64,
}

impl Default for RunTimeouts {
    fn default() -> Self {
        Self {
            research_ms: 10_000,
            manual_research_ms: 10_000,
            slides_ms: 15_000,
            illustration_ms: 30_000,
            pptx_ms: 30_000,
        }
    }
}

impl RunTimeouts {
    /// Budget for `stage`
    #[must_use]
    pub fn for_stage(&self, stage: StageKind) -> Duration {
        let ms = match stage {
            StageKind::Research => self.research_ms,
            StageKind::ManualResearch => self.manual_research_ms,
            StageKind::Slides => self.slides_ms,
            // compiled is never run; give it the illustration budget
            StageKind::Illustration | StageKind::Compiled => self.illustration_ms,
            StageKind::Pptx => self.pptx_ms,
        };
        Duration::from_millis(ms)
    }

    fn set(&mut self, stage: StageKind, timeout: Duration) {
        let ms = millis(timeout);
        match stage {
            StageKind::Research => self.research_ms = ms,
            StageKind::ManualResearch => self.manual_research_ms = ms,
            StageKind::Slides => self.slides_ms = ms,
            StageKind::Illustration | StageKind::Compiled => self.illustration_ms = ms,
            StageKind::Pptx => self.pptx_ms = ms,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for stage in StageKind::ALL {
            if self.for_stage(stage).is_zero() {
                return Err(ConfigError::invalid(
                    "sync.run_timeouts",
                    format!("{stage} budget must be > 0"),
                ));
            }
        }
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = DeckflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, DeckflowConfig::default());
        assert_eq!(config.sync.short_interval(), Duration::from_millis(2_500));
        assert_eq!(
            config.sync.run_timeout(StageKind::Pptx),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.sync.run_timeout(StageKind::Research),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = DeckflowConfig::from_toml_str(
            r#"
            [remote]
            base_url = "https://decks.example.com/api"

            [sync]
            short_interval_ms = 1000
            stop_when_settled = false

            [sync.run_timeouts]
            illustration_ms = 45000
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.base_url, "https://decks.example.com/api");
        assert_eq!(config.sync.short_interval_ms, 1000);
        assert_eq!(config.sync.long_interval_ms, 20_000);
        assert!(!config.sync.stop_when_settled);
        assert_eq!(
            config.sync.run_timeout(StageKind::Illustration),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn rejects_inverted_intervals() {
        let err = DeckflowConfig::from_toml_str(
            "[sync]\nshort_interval_ms = 30000\nlong_interval_ms = 20000\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "sync.long_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = DeckflowConfig::from_toml_str("[remote]\nbase_url = \"ftp://x\"\n").unwrap_err();
        assert!(err.to_string().contains("remote.base_url"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = DeckflowConfig::from_toml_str("[sync\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nlong_interval_ms = 60000").unwrap();

        let config = DeckflowConfig::load(file.path()).unwrap();
        assert_eq!(config.sync.long_interval(), Duration::from_secs(60));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = DeckflowConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let config = DeckflowConfig::new().with_overrides_from(|key| match key {
            BASE_URL_ENV => Some("https://override.example".to_string()),
            API_TOKEN_ENV => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.remote.base_url, "https://override.example");
        assert_eq!(config.remote.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn builder_sets_durations() {
        let sync = SyncConfig::new()
            .with_short_interval(Duration::from_millis(100))
            .with_run_timeout(StageKind::Pptx, Duration::from_secs(5));
        assert_eq!(sync.short_interval_ms, 100);
        assert_eq!(sync.run_timeout(StageKind::Pptx), Duration::from_secs(5));
    }
}
