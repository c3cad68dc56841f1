//! Environment configuration for the client and the relay.
//!
//! Both read a `.env` file first (if present) and then the process
//! environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, SignalError};
use crate::protocol::Identity;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_PING_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub identity: Identity,
    pub ping_interval: Duration,
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>, identity: Identity) -> Self {
        Self {
            relay_url: relay_url.into(),
            identity,
            ping_interval: Duration::from_secs(DEFAULT_PING_SECS),
        }
    }

    /// `SIGNAL_RELAY_URL`, `SIGNAL_IDENTITY`, `SIGNAL_PING_SECS`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let relay_url = lookup("SIGNAL_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.into());
        if !(relay_url.starts_with("ws://") || relay_url.starts_with("wss://")) {
            return Err(SignalError::Config(format!(
                "SIGNAL_RELAY_URL must be a ws:// or wss:// url, got {}",
                relay_url
            )));
        }

        let identity = match lookup("SIGNAL_IDENTITY") {
            Some(name) if name.trim().is_empty() => {
                return Err(SignalError::Config("SIGNAL_IDENTITY is empty".into()));
            }
            Some(name) => Identity::new(name.trim()),
            None => Identity::generate(),
        };

        Ok(Self {
            relay_url,
            identity,
            ping_interval: ping_interval(&lookup, "SIGNAL_PING_SECS")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub ping_interval: Duration,
}

impl RelayConfig {
    /// `RELAY_BIND_ADDR`, `RELAY_PING_SECS`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = lookup("RELAY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = raw
            .parse::<SocketAddr>()
            .map_err(|e| SignalError::Config(format!("RELAY_BIND_ADDR {}: {}", raw, e)))?;

        Ok(Self {
            bind_addr,
            ping_interval: ping_interval(&lookup, "RELAY_PING_SECS")?,
        })
    }
}

fn ping_interval(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Duration> {
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_secs(DEFAULT_PING_SECS));
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(SignalError::Config(format!(
            "{} must be a positive number of seconds, got {}",
            key, raw
        ))),
    }
}
