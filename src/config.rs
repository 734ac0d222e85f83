use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::constants::{
    CLEANUP_INTERVAL_SECS, DIAL_TIMEOUT_SECS, MESSAGE_QUEUE_CAPACITY,
    OUTBOUND_QUEUE_CAPACITY, PING_INTERVAL_SECS, PONG_TIMEOUT_SECS,
    PUBLISH_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS, SESSION_TTL_SECS,
    SIGN_TIMEOUT_SECS, WRITE_TIMEOUT_SECS,
};
use crate::error::{Error, Result};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_URL: &str = "ws://127.0.0.1:8080/relay";

/// Relay server tuning.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub queue_capacity: usize,
    pub outbound_capacity: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub publish_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: MESSAGE_QUEUE_CAPACITY,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            pong_timeout: Duration::from_secs(PONG_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(PUBLISH_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
        }
    }
}

/// Session manager tuning. `relay_url` is the websocket the manager dials.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub relay_url: String,
    pub include_relay_url: bool,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub sign_timeout: Duration,
    pub cleanup_interval: Duration,
    pub session_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_PUBLIC_URL.to_string(),
            include_relay_url: false,
            dial_timeout: Duration::from_secs(DIAL_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            sign_timeout: Duration::from_secs(SIGN_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECS),
            session_ttl: Duration::from_secs(SESSION_TTL_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub relay: RelayConfig,
    pub manager: ManagerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = parse_var(
            "RELAY_BIND_ADDR",
            var("RELAY_BIND_ADDR"),
            DEFAULT_BIND_ADDR.parse::<SocketAddr>().map_err(|e| {
                Error::InvalidConfig(format!("default bind address: {e}"))
            })?,
        )?;

        let relay = RelayConfig {
            queue_capacity: parse_var(
                "RELAY_QUEUE_CAPACITY",
                var("RELAY_QUEUE_CAPACITY"),
                MESSAGE_QUEUE_CAPACITY,
            )?,
            ping_interval: Duration::from_secs(parse_var(
                "RELAY_PING_INTERVAL_SECS",
                var("RELAY_PING_INTERVAL_SECS"),
                PING_INTERVAL_SECS,
            )?),
            pong_timeout: Duration::from_secs(parse_var(
                "RELAY_PONG_TIMEOUT_SECS",
                var("RELAY_PONG_TIMEOUT_SECS"),
                PONG_TIMEOUT_SECS,
            )?),
            publish_timeout: Duration::from_secs(parse_var(
                "RELAY_PUBLISH_TIMEOUT_SECS",
                var("RELAY_PUBLISH_TIMEOUT_SECS"),
                PUBLISH_TIMEOUT_SECS,
            )?),
            ..RelayConfig::default()
        };

        let manager = ManagerConfig {
            relay_url: var("RELAY_PUBLIC_URL")
                .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string()),
            include_relay_url: parse_bool(
                "PAIRING_INCLUDE_RELAY_URL",
                var("PAIRING_INCLUDE_RELAY_URL"),
            )?,
            cleanup_interval: Duration::from_secs(parse_var(
                "SESSION_CLEANUP_INTERVAL_SECS",
                var("SESSION_CLEANUP_INTERVAL_SECS"),
                CLEANUP_INTERVAL_SECS,
            )?),
            sign_timeout: Duration::from_secs(parse_var(
                "SESSION_SIGN_TIMEOUT_SECS",
                var("SESSION_SIGN_TIMEOUT_SECS"),
                SIGN_TIMEOUT_SECS,
            )?),
            ..ManagerConfig::default()
        };

        Ok(Self {
            bind_addr,
            relay,
            manager,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        if relay.queue_capacity == 0 {
            return Err(invalid("RELAY_QUEUE_CAPACITY must be > 0"));
        }
        if relay.outbound_capacity == 0 {
            return Err(invalid("outbound queue capacity must be > 0"));
        }
        if relay.ping_interval.is_zero() {
            return Err(invalid("RELAY_PING_INTERVAL_SECS must be > 0"));
        }
        if relay.publish_timeout.is_zero() {
            return Err(invalid("RELAY_PUBLISH_TIMEOUT_SECS must be > 0"));
        }
        if relay.pong_timeout <= relay.ping_interval {
            return Err(invalid(
                "RELAY_PONG_TIMEOUT_SECS must be greater than RELAY_PING_INTERVAL_SECS",
            ));
        }

        let manager = &self.manager;
        if manager.cleanup_interval.is_zero() {
            return Err(invalid("SESSION_CLEANUP_INTERVAL_SECS must be > 0"));
        }
        if manager.sign_timeout.is_zero() {
            return Err(invalid("SESSION_SIGN_TIMEOUT_SECS must be > 0"));
        }

        let url = Url::parse(&manager.relay_url).map_err(|e| {
            Error::InvalidConfig(format!("RELAY_PUBLIC_URL: {e}"))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "RELAY_PUBLIC_URL scheme must be ws or wss; got '{other}'"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(invalid("RELAY_PUBLIC_URL must include a host"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig(message.to_string())
}

fn parse_var<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            Error::InvalidConfig(format!("{name}: {e} (got '{raw}')"))
        }),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(Error::InvalidConfig(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}
