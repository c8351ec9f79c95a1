use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RelayError;

/// How the driver acquires provider messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Poll the provider read endpoints on a fixed interval
    Pull,
    /// Listen for provider-pushed webhook deliveries
    Push,
}

impl FromStr for RelayMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(RelayMode::Pull),
            "push" => Ok(RelayMode::Push),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub instance: String,
    pub token: String,
    /// Optional reply sent to the originator after a confirmed dispatch
    pub ack_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub base_url: String,
    /// owner/repo receiving the repository_dispatch
    pub repository: String,
    pub token: String,
    pub event_type: String,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub horizon_hours: i64,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub mode: RelayMode,
    pub poll_interval: Duration,
    pub listen_port: u16,
}

/// Environment-sourced configuration, validated before any loop starts.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub trigger: TriggerConfig,
    pub keyword: String,
    pub ledger: LedgerConfig,
    pub dispatch: DispatchConfig,
    pub driver: DriverConfig,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let required = |name: &'static str| -> Result<String, RelayError> {
            match get(name) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(RelayError::ConfigMissing(name)),
            }
        };

        let provider = ProviderConfig {
            base_url: get("PROVIDER_BASE_URL")
                .unwrap_or_else(|| "https://api.z-api.io".to_string()),
            instance: required("ZAPI_INSTANCE")?,
            token: required("ZAPI_TOKEN")?,
            ack_text: get("ACK_TEXT").filter(|t| !t.trim().is_empty()),
        };

        let trigger = TriggerConfig {
            base_url: get("TRIGGER_BASE_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
            repository: required("GITHUB_REPOSITORY")?,
            token: required("GH_TOKEN")?,
            event_type: get("TRIGGER_EVENT_TYPE")
                .unwrap_or_else(|| "mensagem_recebida".to_string()),
        };

        let ledger = LedgerConfig {
            path: PathBuf::from(get("LEDGER_PATH").unwrap_or_else(|| "relay.db".to_string())),
            horizon_hours: parse(&get, "DEDUP_HORIZON_HOURS", 24)?,
        };

        let dispatch = DispatchConfig {
            max_attempts: parse(&get, "DISPATCH_MAX_ATTEMPTS", 4)?,
            base_delay: Duration::from_millis(parse(&get, "DISPATCH_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(parse(&get, "DISPATCH_MAX_DELAY_MS", 8_000)?),
        };

        let mode = match get("RELAY_MODE") {
            None => RelayMode::Pull,
            Some(raw) => raw.parse().map_err(|_| RelayError::ConfigInvalid {
                name: "RELAY_MODE",
                value: raw,
            })?,
        };

        let driver = DriverConfig {
            mode,
            poll_interval: Duration::from_secs(parse(&get, "POLL_INTERVAL_SECS", 10)?),
            listen_port: parse(&get, "LISTEN_PORT", 8080)?,
        };

        Ok(Config {
            provider,
            trigger,
            keyword: get("TRIGGER_KEYWORD").unwrap_or_else(|| "zumo".to_string()),
            ledger,
            dispatch,
            driver,
            http_timeout: Duration::from_secs(parse(&get, "HTTP_TIMEOUT_SECS", 15)?),
        })
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, RelayError> {
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::ConfigInvalid { name, value: raw }),
    }
}
