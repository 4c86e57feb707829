//! Client configuration and its validation.

use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::pump::DEFAULT_QUEUE_CAPACITY;
use crate::transport::Endpoint;

/// Default hub address.
pub const DEFAULT_HUB_URL: &str = "tcp://127.0.0.1:6666";

/// Default address a service listens on for the hub.
pub const DEFAULT_SERVICE_URL: &str = "tcp://127.0.0.1:13032";

/// Default interval between registrations.
pub const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_secs(60);

/// Settings for a service attaching to the hub.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service name the hub routes by.
    pub name: String,
    /// Hub address to push to.
    pub hub_url: String,
    /// Address this service listens on for the hub.
    pub service_url: String,
    /// Interval between registrations. Zero means the default.
    pub register_interval: Duration,
    /// Capacity of the internal queues.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            service_url: DEFAULT_SERVICE_URL.to_string(),
            register_interval: DEFAULT_REGISTER_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Addresses resolved by [`ClientConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAddrs {
    pub hub: Endpoint,
    pub service: Endpoint,
}

impl ClientConfig {
    /// Check required fields and parse both addresses.
    ///
    /// Runs before any socket is opened.
    pub fn validate(&self) -> Result<ValidatedAddrs> {
        if self.name.is_empty() {
            return Err(RelayError::Config("name must be set in config".to_string()));
        }
        if self.hub_url.is_empty() {
            return Err(RelayError::Config("hub url must be set in config".to_string()));
        }
        if self.service_url.is_empty() {
            return Err(RelayError::Config(
                "service url must be set in config".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(RelayError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let hub = Endpoint::parse(&self.hub_url)?;
        let service = Endpoint::parse(&self.service_url)?;

        Ok(ValidatedAddrs { hub, service })
    }

    /// Registration interval with the zero default applied.
    pub fn effective_register_interval(&self) -> Duration {
        if self.register_interval.is_zero() {
            DEFAULT_REGISTER_INTERVAL
        } else {
            self.register_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientConfig {
        ClientConfig {
            name: "config".to_string(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_valid_defaults() {
        let addrs = valid().validate().unwrap();
        assert_eq!(addrs.hub.port(), 6666);
        assert_eq!(addrs.service.port(), 13032);
    }

    #[test]
    fn test_missing_name() {
        let config = ClientConfig::default();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_hub_scheme_rejected() {
        let config = ClientConfig {
            hub_url: "ipc:///tmp/hub.sock".to_string(),
            ..valid()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::InvalidScheme(ref s) if s == "ipc"));
        assert_eq!(
            err.to_string(),
            "Invalid URL scheme: ipc - only tcp:// urls are supported"
        );
    }

    #[test]
    fn test_missing_urls() {
        let config = ClientConfig {
            hub_url: String::new(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = ClientConfig {
            service_url: String::new(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_zero_interval_defaults_to_a_minute() {
        let config = ClientConfig {
            register_interval: Duration::ZERO,
            ..valid()
        };
        assert_eq!(
            config.effective_register_interval(),
            Duration::from_secs(60)
        );
    }
}
