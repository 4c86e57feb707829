//! Hub configuration: device identity, upstream settings, and relay tuning.
//!
//! Loaded from a TOML file, then overridden by command-line flags, then
//! validated. Validation failures are fatal at startup.
//!
//! ```toml
//! hw_model = "xb3"
//! hw_serial_number = "123456789"
//! hw_manufacturer = "example"
//! hw_mac = "AA:BB:CC:DD:EE:FF"
//! xmidt_url = "https://fabric.example.com"
//! partner_id = "comcast"
//! ```

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::hub::{RelayConfig, DEFAULT_LOCAL_URL};
use crate::transport::Endpoint;

/// Path appended to the upstream URL.
pub const XMIDT_DEVICE_PATH: &str = "/api/v2/device";

/// Everything the hub binary is configured with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    pub hw_model: String,
    pub hw_serial_number: String,
    pub hw_manufacturer: String,
    pub hw_mac: String,
    pub hw_last_reboot_reason: String,
    pub fw_name: String,
    /// Unix seconds.
    pub boot_time: i64,

    pub xmidt_url: String,
    pub xmidt_ping_timeout: u64,
    pub xmidt_backoff_max: u64,
    pub xmidt_interface_used: String,
    pub ssl_cert_path: String,
    pub force_ipv4: bool,
    pub force_ipv6: bool,
    pub partner_id: String,

    pub parodus_local_url: String,

    pub queue_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub send_timeout_secs: u64,
    /// 0 keeps silent services forever.
    pub service_ttl_secs: u64,

    pub debug: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hw_model: String::new(),
            hw_serial_number: String::new(),
            hw_manufacturer: String::new(),
            hw_mac: "unknown".to_string(),
            hw_last_reboot_reason: String::new(),
            fw_name: String::new(),
            boot_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            xmidt_url: String::new(),
            xmidt_ping_timeout: 60,
            xmidt_backoff_max: 60,
            xmidt_interface_used: "eth0".to_string(),
            ssl_cert_path: String::new(),
            force_ipv4: false,
            force_ipv6: false,
            partner_id: String::new(),
            parodus_local_url: DEFAULT_LOCAL_URL.to_string(),
            queue_capacity: 100,
            heartbeat_interval_secs: 5,
            send_timeout_secs: 5,
            service_ttl_secs: 0,
            debug: false,
        }
    }
}

impl HubConfig {
    /// Read a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))?;
        config.normalize();
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| RelayError::Config(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Canonicalise values that are compared case-insensitively.
    pub fn normalize(&mut self) {
        self.hw_mac = self.hw_mac.to_lowercase();
    }

    /// Check everything the hub needs to start.
    pub fn validate(&self) -> Result<()> {
        require("hw-model", &self.hw_model)?;
        require("hw-serial-number", &self.hw_serial_number)?;
        require("hw-manufacturer", &self.hw_manufacturer)?;

        if !validate_mac(&self.hw_mac) {
            return Err(RelayError::Config(format!(
                "bad mac address: {}",
                self.hw_mac
            )));
        }

        require("xmidt-url", &self.xmidt_url)?;

        if self.force_ipv4 && self.force_ipv6 {
            return Err(RelayError::Config(
                "force-ipv4 and force-ipv6 are mutually exclusive".to_string(),
            ));
        }

        Endpoint::parse(&self.parodus_local_url)?;

        if self.queue_capacity == 0 {
            return Err(RelayError::Config(
                "queue-capacity must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(RelayError::Config(
                "heartbeat-interval must be at least 1 second".to_string(),
            ));
        }
        if self.send_timeout_secs == 0 {
            return Err(RelayError::Config(
                "send-timeout must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }

    /// Device id announced upstream: `mac:` plus the MAC without colons.
    pub fn device_id(&self) -> String {
        format!("mac:{}", self.hw_mac.replace(':', ""))
    }

    /// Full upstream URL including the device path.
    pub fn upstream_url(&self) -> String {
        format!(
            "{}{}",
            self.xmidt_url.trim_end_matches('/'),
            XMIDT_DEVICE_PATH
        )
    }

    /// Relay settings derived from this configuration.
    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            local_url: self.parodus_local_url.clone(),
            queue_capacity: self.queue_capacity,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            service_ttl: (self.service_ttl_secs > 0)
                .then(|| Duration::from_secs(self.service_ttl_secs)),
            partner_id: (!self.partner_id.is_empty()).then(|| self.partner_id.clone()),
        }
    }
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RelayError::Config(format!("{key} must be set")));
    }
    Ok(())
}

/// Whether `mac` is a 48-bit MAC address.
///
/// Accepts six hex pairs with an optional `:` or `-` between any two of them
/// (separators may be mixed), and the dotted `aabb.ccdd.eeff` form. The whole
/// string must be the address.
pub fn validate_mac(mac: &str) -> bool {
    let dotted: Vec<&str> = mac.split('.').collect();
    if dotted.len() == 3 {
        return dotted
            .iter()
            .all(|group| group.len() == 4 && group.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    let bytes = mac.as_bytes();
    let mut pairs = 0;
    let mut i = 0;
    while i < bytes.len() {
        if pairs > 0 && matches!(bytes[i], b':' | b'-') {
            i += 1;
        }
        match bytes.get(i..i + 2) {
            Some(pair) if pairs < 6 && pair.iter().all(u8::is_ascii_hexdigit) => {
                pairs += 1;
                i += 2;
            }
            _ => return false,
        }
    }
    pairs == 6
}
