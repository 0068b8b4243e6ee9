//! Configuration for the vayu-link daemon and library consumers.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [network]
//! multicast_group = "239.255.1.1"
//! multicast_port = 49707
//! # simulator_address = "192.168.1.100:49000"   # skips discovery
//!
//! [subscription]
//! refresh_hz = 3
//! datarefs = [
//!     "sim/cockpit/autopilot/heading_mag,0",
//!     "sim/cockpit/misc/barometer_setting,2",
//! ]
//!
//! [subscription.transforms]
//! "sim/cockpit/misc/barometer_setting" = "inhg_to_hpa"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Transforms are keyed by wire name and resolved to [`ValueTransform`]
//! strategies at load time; a typo in a strategy name fails the load rather
//! than surfacing mid-flight.

use crate::client::ClientOptions;
use crate::core::types::{DatarefKey, Subscription, ValueTransform};
use crate::error::{Error, Result};
use crate::session::wire::WireFormat;
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionFileConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discovery and control-channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Discovery multicast group
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// Discovery multicast port
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    /// Static simulator address (`host:port`); set to skip discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator_address: Option<String>,
}

/// Subscription set and refresh rate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    /// Requested updates per second per dataref
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: i32,
    /// Composite dataref keys (`name[idx],precision` suffixes allowed)
    #[serde(default)]
    pub datarefs: Vec<String>,
    /// Wire name → transform strategy name
    #[serde(default)]
    pub transforms: HashMap<String, String>,
}

/// Session (directory + streaming) connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionFileConfig {
    /// Server address, `host:port`
    pub address: String,
    /// `json` or `postcard`
    #[serde(default = "default_wire_format")]
    pub wire_format: String,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_multicast_group() -> String {
    "239.255.1.1".to_string()
}

fn default_multicast_port() -> u16 {
    49707
}

fn default_refresh_hz() -> i32 {
    3
}

fn default_wire_format() -> String {
    "json".to_string()
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_resolve_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            simulator_address: None,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            datarefs: Vec::new(),
            transforms: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Build client options from the network section.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let multicast_group = self
            .network
            .multicast_group
            .parse()
            .map_err(|_| {
                Error::Config(format!(
                    "invalid multicast group `{}`",
                    self.network.multicast_group
                ))
            })?;

        let endpoint = match &self.network.simulator_address {
            Some(addr) => Some(
                addr.to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        Error::Config(format!("cannot resolve simulator address `{}`", addr))
                    })?,
            ),
            None => None,
        };

        Ok(ClientOptions {
            refresh_hz: self.subscription.refresh_hz,
            endpoint,
            multicast_group,
            multicast_port: self.network.multicast_port,
        })
    }

    /// Parse the configured dataref list, resolving transforms.
    pub fn subscriptions(&self) -> Result<Vec<Subscription>> {
        self.subscription
            .datarefs
            .iter()
            .map(|spec| {
                let key = DatarefKey::parse(spec)?;
                let transform = match self.subscription.transforms.get(key.wire_name()) {
                    Some(strategy) => ValueTransform::from_name(strategy)?,
                    None => ValueTransform::None,
                };
                Ok(Subscription::with_transform(key, transform))
            })
            .collect()
    }

    /// Build session options from the `[session]` section, if present.
    pub fn session_options(&self) -> Result<Option<SessionOptions>> {
        let session = match &self.session {
            Some(session) => session,
            None => return Ok(None),
        };

        let format = match session.wire_format.as_str() {
            "json" => WireFormat::Json,
            "postcard" => WireFormat::Postcard,
            other => {
                return Err(Error::Config(format!("unknown wire format `{}`", other)));
            }
        };

        Ok(Some(SessionOptions {
            address: session.address.clone(),
            format,
            initial_backoff: Duration::from_millis(session.initial_backoff_ms),
            max_backoff: Duration::from_millis(session.max_backoff_ms),
            resolve_timeout: Duration::from_millis(session.resolve_timeout_ms),
        }))
    }
}
