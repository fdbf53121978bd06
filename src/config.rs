use serde::Deserialize;
use tokio::time::Duration;

use crate::device::DeviceVariant;

/// The peripheral a client talks to. Read-only for the life of the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfiguredDevice {
    /// Modbus address of the peripheral, 255 addresses whatever is attached.
    #[serde(default = "default_device_id")]
    pub device_id: u8,
    /// Advertised BLE name, e.g. `RMTShunt300xxxx` or `BT-TH-xxxx`.
    pub alias: String,
    /// MAC address (or platform device id) of the peripheral.
    #[serde(rename = "mac_addr")]
    pub address: String,
    #[serde(default)]
    pub adapter: String,
}

/// Everything a [`DeviceClient`](crate::DeviceClient) needs to run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub device: ConfiguredDevice,
    #[serde(rename = "type")]
    pub variant: DeviceVariant,
    /// Keep polling after the first complete sweep. When false the client
    /// disconnects once every section has been read once.
    #[serde(default, rename = "enable_polling")]
    pub continuous: bool,
    /// Pause between sweeps of a polled device, in seconds.
    #[serde(default = "default_poll_interval_secs", rename = "poll_interval")]
    pub poll_interval_secs: u64,
    /// Minimum seconds between telemetry deliveries. `None` delivers everything.
    #[serde(default, rename = "rate_interval")]
    pub rate_limit_secs: Option<u64>,
    /// Seconds to wait for a reply before the session is considered lost.
    /// `None` waits forever.
    #[serde(default = "default_read_timeout_secs", rename = "read_timeout")]
    pub read_timeout_secs: Option<u64>,
}

fn default_device_id() -> u8 {
    255
}

fn default_poll_interval_secs() -> u64 {
    20
}

fn default_read_timeout_secs() -> Option<u64> {
    Some(30)
}

impl ClientConfig {
    pub fn new(device: ConfiguredDevice, variant: DeviceVariant) -> Self {
        Self {
            device,
            variant,
            continuous: false,
            poll_interval_secs: default_poll_interval_secs(),
            rate_limit_secs: None,
            read_timeout_secs: default_read_timeout_secs(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rate_limit(&self) -> Option<Duration> {
        self.rate_limit_secs.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "device": { "alias": "RMTShunt300A1B2", "mac_addr": "AA:BB:CC:DD:EE:FF" },
            "type": "RNG_SHNT"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device.device_id, 255);
        assert_eq!(config.device.adapter, "");
        assert_eq!(config.variant, DeviceVariant::SmartShunt);
        assert!(!config.continuous);
        assert_eq!(config.poll_interval(), Duration::from_secs(20));
        assert_eq!(config.rate_limit(), None);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_deserialize_full() {
        let json = r#"{
            "device": { "device_id": 16, "alias": "BT-TH-1234", "mac_addr": "AA:BB", "adapter": "hci0" },
            "type": "RNG_CTRL",
            "enable_polling": true,
            "poll_interval": 60,
            "rate_interval": 10,
            "read_timeout": null
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device.device_id, 16);
        assert_eq!(config.variant, DeviceVariant::ChargeController);
        assert!(config.continuous);
        assert_eq!(config.rate_limit(), Some(Duration::from_secs(10)));
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_device_id_out_of_range() {
        let json = r#"{
            "device": { "device_id": 256, "alias": "x", "mac_addr": "y" },
            "type": "RNG_SHNT"
        }"#;
        assert!(serde_json::from_str::<ClientConfig>(json).is_err());
    }
}
