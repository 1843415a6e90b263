use humantime_serde::re::humantime;
use natp_transport::RetryConfig;
use natp_types::NatpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_DIRECTORY_URL: &str = "NATP_DIRECTORY_URL";
pub const ENV_ORCHESTRATOR_URL: &str = "NATP_ORCHESTRATOR_URL";
pub const ENV_API_KEY: &str = "NATP_API_KEY";
pub const ENV_MAX_RETRIES: &str = "NATP_MAX_RETRIES";
pub const ENV_BASE_DELAY: &str = "NATP_BASE_DELAY";
pub const ENV_MAX_DELAY: &str = "NATP_MAX_DELAY";

/// Client configuration.
///
/// Durations are humantime strings when deserialized (`"500ms"`, `"30s"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub directory_url: String,
    pub orchestrator_url: String,
    /// Sent as `X-API-Key` when set.
    pub api_key: Option<String>,
    /// Ignored: the agent id is always derived from the key. A mismatching
    /// value is logged.
    pub agent_id: Option<String>,
    /// Timeout of a single HTTP attempt.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: "http://localhost:8080".to_string(),
            orchestrator_url: "http://localhost:8081".to_string(),
            api_key: None,
            agent_id: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with the `NATP_*` environment variables.
    pub fn from_env() -> Result<Self, NatpError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values returned by `lookup` for the `NATP_*` variable names.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, NatpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DIRECTORY_URL) {
            self.directory_url = url;
        }
        if let Some(url) = lookup(ENV_ORCHESTRATOR_URL) {
            self.orchestrator_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries = raw
                .trim()
                .parse()
                .map_err(|e| NatpError::Config(format!("{ENV_MAX_RETRIES}={raw:?}: {e}")))?;
        }
        if let Some(raw) = lookup(ENV_BASE_DELAY) {
            self.retry.base_delay = parse_duration(ENV_BASE_DELAY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_DELAY) {
            self.retry.max_delay = parse_duration(ENV_MAX_DELAY, &raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), NatpError> {
        check_url("directory_url", &self.directory_url)?;
        check_url("orchestrator_url", &self.orchestrator_url)?;
        if self.request_timeout.is_zero() {
            return Err(NatpError::Config("request_timeout must be non-zero".into()));
        }
        self.retry.validate()
    }

    pub fn directory_base(&self) -> &str {
        self.directory_url.trim_end_matches('/')
    }

    pub fn transact_url(&self) -> String {
        format!("{}/v1/a2a/transact", self.orchestrator_url.trim_end_matches('/'))
    }
}

fn check_url(field: &str, url: &str) -> Result<(), NatpError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(NatpError::Config(format!("invalid {field}: {url:?}")))
    }
}

fn parse_duration(name: &str, raw: &str) -> Result<Duration, NatpError> {
    humantime::parse_duration(raw.trim()).map_err(|e| NatpError::Config(format!("{name}={raw:?}: {e}")))
}
