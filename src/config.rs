use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime settings, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub timeout: Duration,
    pub metrics_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            metrics_port: None,
            username: None,
            password: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let timeout_secs: u64 = get("INNKEEP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            api_url: get("INNKEEP_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            timeout: Duration::from_secs(timeout_secs),
            metrics_port: get("INNKEEP_METRICS_PORT").and_then(|s| s.parse().ok()),
            username: get("INNKEEP_USERNAME"),
            password: get("INNKEEP_PASSWORD"),
        }
    }
}
