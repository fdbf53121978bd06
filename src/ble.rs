//! [`Transport`] over Bluetooth Low Energy using `bluest`.
//!
//! Charge controllers are reached through a BT-1/BT-2 module: requests are
//! written to one characteristic and replies arrive as notifications on
//! another. The smart shunt only notifies.

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ConfiguredDevice;
use crate::device::DeviceVariant;
use crate::error::TransportError;
use crate::transport::{Candidate, Discovery, Transport};

const CONTROLLER_WRITE_CHARACTERISTIC_ID: Uuid =
    Uuid::from_u128(0x0000ffd1_0000_1000_8000_00805f9b34fb);
const CONTROLLER_NOTIFY_CHARACTERISTIC_ID: Uuid =
    Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);
const SHUNT_NOTIFY_CHARACTERISTIC_ID: Uuid =
    Uuid::from_u128(0x0000c411_0000_1000_8000_00805f9b34fb);

type Notification = Result<Vec<u8>, bluest::Error>;

pub struct BleTransport {
    variant: DeviceVariant,
    scan_timeout: Duration,
    adapter: Option<Adapter>,
    device: Option<Device>,
    write: Option<Characteristic>,
    notifications: Option<mpsc::Receiver<Notification>>,
    forwarder: Option<JoinHandle<()>>,
}

impl BleTransport {
    const DEFAULT_SCAN_TIMEOUT_S: u64 = 30;

    pub fn new(variant: DeviceVariant) -> Self {
        Self {
            variant,
            scan_timeout: Duration::from_secs(Self::DEFAULT_SCAN_TIMEOUT_S),
            adapter: None,
            device: None,
            write: None,
            notifications: None,
            forwarder: None,
        }
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    fn notify_characteristic_id(&self) -> Uuid {
        match self.variant {
            DeviceVariant::SmartShunt => SHUNT_NOTIFY_CHARACTERISTIC_ID,
            DeviceVariant::ChargeController => CONTROLLER_NOTIFY_CHARACTERISTIC_ID,
        }
    }

    async fn find_characteristic(device: &Device, id: Uuid) -> Result<Option<Characteristic>, TransportError> {
        for service in device.discover_services().await? {
            for characteristic in service.discover_characteristics().await? {
                if characteristic.uuid() == id {
                    return Ok(Some(characteristic));
                }
            }
        }
        Ok(None)
    }

    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.notifications = None;
    }
}

fn is_configured(device: &ConfiguredDevice, alias: Option<&str>, address: &str) -> bool {
    alias == Some(device.alias.as_str())
        || (!device.address.is_empty()
            && address.to_lowercase().contains(&device.address.to_lowercase()))
}

#[async_trait]
impl Transport for BleTransport {
    async fn discover(&mut self, device: &ConfiguredDevice) -> Result<Discovery, TransportError> {
        let adapter = Adapter::default().await.ok_or(TransportError::AdapterNotFound)?;
        adapter.wait_available().await?;
        if !device.adapter.is_empty() {
            debug!(adapter = %device.adapter, "named adapters are not supported, using the default");
        }

        let deadline = Instant::now() + self.scan_timeout;
        let mut candidates = Vec::new();
        let mut found = None;
        {
            let mut adapter_events = adapter.scan(&[]).await?;
            while let Ok(Some(advertising)) = timeout_at(deadline, adapter_events.next()).await {
                let alias = match advertising.adv_data.local_name.clone() {
                    Some(name) => Some(name),
                    None => advertising.device.name_async().await.ok(),
                };
                let address = format!("{:?}", advertising.device.id());
                if is_configured(device, alias.as_deref(), &address) {
                    info!(alias = ?alias, %address, "found device");
                    found = Some(advertising.device);
                    break;
                }
                if !candidates.iter().any(|c: &Candidate| c.address == address) {
                    candidates.push(Candidate { alias, address });
                }
            }
        }

        self.adapter = Some(adapter);
        match found {
            Some(found) => {
                self.device = Some(found);
                Ok(Discovery::Found)
            }
            None => Ok(Discovery::NotFound { candidates }),
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stop_forwarder();
        let (Some(adapter), Some(device)) = (self.adapter.as_ref(), self.device.as_ref()) else {
            return Err(TransportError::NotConnected);
        };
        if !device.is_connected().await {
            adapter.connect_device(device).await?;
        }

        let notify = Self::find_characteristic(device, self.notify_characteristic_id())
            .await?
            .ok_or(TransportError::Unsupported("the notify characteristic"))?;
        self.write = if self.variant.solicited() {
            let write = Self::find_characteristic(device, CONTROLLER_WRITE_CHARACTERISTIC_ID)
                .await?
                .ok_or(TransportError::Unsupported("the write characteristic"))?;
            Some(write)
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(32);
        let forwarder = tokio::spawn(async move {
            let reader = match notify.notify().await {
                Ok(reader) => reader,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            futures_util::pin_mut!(reader);
            while let Some(notification) = reader.next().await {
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
            debug!("End of notification stream");
        });
        self.notifications = Some(rx);
        self.forwarder = Some(forwarder);
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let write = self
            .write
            .as_ref()
            .ok_or(TransportError::Unsupported("the write characteristic"))?;
        write.write(frame).await?;
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let notifications = self.notifications.as_mut().ok_or(TransportError::NotConnected)?;
        match notifications.recv().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(err)) => {
                warn!("Notification error: {err}");
                Err(err.into())
            }
            None => Ok(None),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_forwarder();
        self.write = None;
        if let (Some(adapter), Some(device)) = (self.adapter.as_ref(), self.device.take()) {
            adapter.disconnect_device(&device).await?;
        }
        Ok(())
    }
}
