use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid relay url {url}: {reason}")]
    RelayUrl { url: String, reason: String },
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Signaling client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the relay (`ws://host:port/`)
    pub relay_url: Url,
    /// Delay before re-opening a control channel that closed
    pub reconnect_delay: Duration,
    /// Interval between liveness pings while the channel is open
    pub heartbeat_interval: Duration,
    /// Consecutive failed reconnects tolerated before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Negotiate without local tracks when the media binding cannot supply any
    pub receive_only_fallback: bool,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = env_value("DUET_RELAY_URL") {
            // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
            let raw = if raw.starts_with("localhost:") {
                raw.replacen("localhost", "127.0.0.1", 1)
            } else {
                raw.replacen("//localhost:", "//127.0.0.1:", 1)
            };
            config.relay_url = parse_relay_url(&raw)?;
        }
        if let Some(ms) = env_u64("DUET_RECONNECT_DELAY_MS")? {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("DUET_HEARTBEAT_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "DUET_HEARTBEAT_INTERVAL_MS",
                    value: ms.to_string(),
                });
            }
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_u64("DUET_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = Some(attempts.min(u32::MAX as u64) as u32);
        }
        if let Some(value) = env_value("DUET_RECEIVE_ONLY") {
            config.receive_only_fallback = value != "0" && !value.eq_ignore_ascii_case("false");
        }
        Ok(config)
    }

    pub fn with_relay_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.relay_url = parse_relay_url(url)?;
        Ok(self)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_receive_only_fallback(mut self, enabled: bool) -> Self {
        self.receive_only_fallback = enabled;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: Url::parse(DEFAULT_RELAY_URL).expect("default relay url is valid"),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            max_reconnect_attempts: None,
            receive_only_fallback: false,
        }
    }
}

/// Accepts `ws://` / `wss://` urls, and bare `host:port` which is taken as `ws://host:port/`.
pub fn parse_relay_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}/")
    };
    let url = Url::parse(&candidate).map_err(|err| ConfigError::RelayUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::RelayUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env_value(var) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 5] = [
        "DUET_RELAY_URL",
        "DUET_RECONNECT_DELAY_MS",
        "DUET_HEARTBEAT_INTERVAL_MS",
        "DUET_MAX_RECONNECT_ATTEMPTS",
        "DUET_RECEIVE_ONLY",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults_match_relay_protocol() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_url.as_str(), "ws://127.0.0.1:8080/");
        assert_eq!(config.reconnect_delay, Duration::from_millis(5_000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(30_000));
        assert_eq!(config.max_reconnect_attempts, None);
        assert!(!config.receive_only_fallback);
    }

    #[test]
    fn from_env_without_overrides_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.relay_url.as_str(), DEFAULT_RELAY_URL);
        assert_eq!(config.reconnect_delay, Duration::from_millis(5_000));
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("DUET_RELAY_URL", "localhost:9000");
            env::set_var("DUET_RECONNECT_DELAY_MS", "250");
            env::set_var("DUET_HEARTBEAT_INTERVAL_MS", "1000");
            env::set_var("DUET_MAX_RECONNECT_ATTEMPTS", "3");
            env::set_var("DUET_RECEIVE_ONLY", "1");
        }
        let config = ClientConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.relay_url.as_str(), "ws://127.0.0.1:9000/");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_attempts, Some(3));
        assert!(config.receive_only_fallback);
    }

    #[test]
    fn from_env_rejects_garbage_numbers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("DUET_RECONNECT_DELAY_MS", "soon");
        }
        let err = ClientConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "DUET_RECONNECT_DELAY_MS",
                ..
            }
        ));
    }

    #[test]
    fn relay_url_requires_websocket_scheme() {
        assert!(parse_relay_url("wss://relay.example.com/").is_ok());
        assert!(parse_relay_url("http://relay.example.com/").is_err());
    }
}
