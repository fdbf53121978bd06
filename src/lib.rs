//! Read telemetry from Renogy-style solar charge controllers and battery shunts
//! over Bluetooth Low Energy
//!
//! The devices speak a Modbus-like register protocol on top of BLE
//! characteristics: a request names a device id, a function code, a register
//! and a word count, and carries a MODBUS CRC. Replies are decoded into named,
//! scaled measurements.
//!
//! A [`DeviceClient`] owns one peripheral. It discovers and connects to it
//! (retrying a bounded number of times), polls its register sections in turn,
//! decodes the replies and passes the [`Telemetry`] to a [`Consumer`],
//! optionally rate limited. Consumer failures never reach the read loop.
//!
//! Currently the following devices are supported:
//!
//! - Smart shunt (RMTShunt300), which streams its state unsolicited
//! - Rover / Wanderer / Adventurer charge controllers behind a BT-1 or BT-2 module
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use solarread::*;
//! struct Print;
//!
//! impl Consumer for Print {
//!     fn on_data(&self, device: &ConfiguredDevice, telemetry: &Telemetry) -> anyhow::Result<()> {
//!         println!("{} => {telemetry:?}", device.alias);
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # pub async fn main(){
//! let device = ConfiguredDevice {
//!     device_id: 255,
//!     alias: "RMTShunt300A1B2".into(),
//!     address: "AA:BB:CC:DD:EE:FF".into(),
//!     adapter: "hci0".into(),
//! };
//! let mut config = ClientConfig::new(device, DeviceVariant::SmartShunt);
//! config.continuous = true;
//! config.rate_limit_secs = Some(10);
//!
//! let transport = BleTransport::new(config.variant);
//! let handle = ClientHandle::spawn(DeviceClient::new(config, transport, Arc::new(Print)));
//! tokio::signal::ctrl_c().await.unwrap();
//! handle.stop().await;
//! # }
//! ```

mod ble;
mod client;
mod config;
pub mod device;
mod dispatch;
mod error;
pub mod frame;
mod lifecycle;
pub mod parser;
mod rate_limiter;
mod scheduler;
mod supervisor;
mod telemetry;
mod transport;

pub use ble::BleTransport;
pub use client::{Command, DeviceClient, Handled};
pub use config::{ClientConfig, ConfiguredDevice};
pub use device::{DeviceVariant, Framing, Section};
pub use dispatch::{dispatch, Consumer};
pub use error::{ClientError, ProtocolError, TransportError};
pub use lifecycle::{ClientHandle, DeviceRunner};
pub use rate_limiter::RateLimiter;
pub use scheduler::SectionScheduler;
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, Connected, RetryCounter, RetryPolicy,
    MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
pub use telemetry::{Telemetry, Value};
pub use transport::{Candidate, Discovery, Transport};
