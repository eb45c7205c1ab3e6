//! Relay configuration.
//!
//! Configuration is loaded from environment variables. The TURN credential
//! is held as a `SecretString` and redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::secret::SecretString;
use signaling_protocol::model::DEFAULT_STUN_URLS;
use signaling_protocol::{IceServer, TransportConfig};
use thiserror::Error;

use crate::registry::RegistryLimits;
use crate::relay::HostDisconnectPolicy;

/// Default bind address for the signaling socket and meeting API.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default period of the liveness sweep.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;

/// Default heartbeat age after which a participant is probed.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 60;

/// Default server-wide meeting limit.
pub const DEFAULT_MAX_MEETINGS: usize = 1000;

/// Default per-meeting participant limit.
pub const DEFAULT_MAX_PARTICIPANTS_PER_MEETING: usize = 100;

/// Default relay instance ID prefix.
pub const DEFAULT_RELAY_ID_PREFIX: &str = "relay";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling WebSocket and meeting API bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this relay instance.
    pub relay_id: String,

    /// Period of the liveness sweep (default: 30s).
    pub health_check_interval: Duration,

    /// Heartbeat age that triggers a probe (default: 60s).
    pub heartbeat_timeout: Duration,

    pub limits: RegistryLimits,

    /// What happens when the host's transport drops.
    pub host_disconnect_policy: HostDisconnectPolicy,

    /// STUN/TURN servers handed to every client.
    pub transport: TransportConfig,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(vars, key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(Duration::from_secs(secs))
}

fn url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn transport_from_vars(vars: &HashMap<String, String>) -> Result<TransportConfig, ConfigError> {
    let stun_urls = vars.get("RELAY_STUN_URLS").map_or_else(
        || DEFAULT_STUN_URLS.iter().map(|s| (*s).to_string()).collect(),
        |raw| url_list(raw),
    );

    let mut ice_servers: Vec<IceServer> = stun_urls.into_iter().map(IceServer::stun).collect();

    if let Some(raw) = vars.get("RELAY_TURN_URLS") {
        let urls = url_list(raw);
        if !urls.is_empty() {
            let username = vars.get("RELAY_TURN_USERNAME").cloned().ok_or_else(|| {
                ConfigError::MissingEnvVar("RELAY_TURN_USERNAME".to_string())
            })?;
            let credential = vars.get("RELAY_TURN_CREDENTIAL").cloned().ok_or_else(|| {
                ConfigError::MissingEnvVar("RELAY_TURN_CREDENTIAL".to_string())
            })?;
            ice_servers.push(IceServer {
                urls,
                username: Some(username),
                credential: Some(SecretString::from(credential)),
            });
        }
    }

    Ok(TransportConfig {
        ice_servers,
        ..TransportConfig::default()
    })
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid, or a
    /// TURN URL is configured without its credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let health_check_interval = positive_seconds(
            vars,
            "RELAY_HEALTH_CHECK_INTERVAL_SECONDS",
            DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS,
        )?;

        let heartbeat_timeout = positive_seconds(
            vars,
            "RELAY_HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?;

        let limits = RegistryLimits {
            max_meetings: parse_or(vars, "RELAY_MAX_MEETINGS", DEFAULT_MAX_MEETINGS)?,
            max_participants_per_meeting: parse_or(
                vars,
                "RELAY_MAX_PARTICIPANTS_PER_MEETING",
                DEFAULT_MAX_PARTICIPANTS_PER_MEETING,
            )?,
        };

        let host_disconnect_policy = match vars.get("RELAY_HOST_DISCONNECT_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("RELAY_HOST_DISCONNECT_POLICY={raw}")))?,
            None => HostDisconnectPolicy::default(),
        };

        let log_format = match vars.get("RELAY_LOG_FORMAT").map(|s| s.trim().to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(f) if f == "text" => LogFormat::Text,
            Some(f) if f == "json" => LogFormat::Json,
            Some(f) => return Err(ConfigError::InvalidValue(format!("RELAY_LOG_FORMAT={f}"))),
        };

        let transport = transport_from_vars(vars)?;

        let relay_id = vars.get("RELAY_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RELAY_ID_PREFIX}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            relay_id,
            health_check_interval,
            heartbeat_timeout,
            limits,
            host_disconnect_policy,
            transport,
            log_format,
        })
    }
}
