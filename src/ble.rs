use async_trait::async_trait;
use btleplug::{
    api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{BlockLightError, Result},
    types::{ConnectionParams, DeviceInfo},
    DEVICE_NAME_PATTERN, NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID,
};

/// Notification buffer depth between the radio and the session
const NOTIFICATION_CHANNEL_SIZE: usize = 32;

/// Capability the session consumes to reach a device
///
/// The session is agnostic to what sits behind this trait: the bundled
/// [`BleTransport`] drives a local radio through btleplug, but anything able
/// to move bytes to the command characteristic and deliver notification
/// bytes back works, including a remote proxy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection
    ///
    /// Returns the exclusive link for writes and teardown, plus the
    /// single-consumer channel that raw notification bytes arrive on in
    /// delivery order. The channel closing signals that the transport lost
    /// the connection.
    async fn connect(&self) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<Vec<u8>>)>;
}

/// An established connection, exclusively owned by one session
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Write raw bytes to the device's command characteristic
    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Release the connection
    async fn disconnect(&self) -> Result<()>;
}

/// BLE manager handling discovery of BlockBlueLight devices
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::Ble`] if the Bluetooth adapter cannot be
    /// initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scan for BlockBlueLight devices
    ///
    /// Scans for peripherals advertising the device's service and filters
    /// them by the vendor's name fragment.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::DeviceNotFound`] if no Bluetooth adapters
    /// are available, or [`BlockLightError::Ble`] for other Bluetooth
    /// failures.
    pub async fn scan_for_devices(&self, params: &ConnectionParams) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for BlockBlueLight devices...");

        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(BlockLightError::DeviceNotFound);
        }

        let central = &adapters[0];

        let service_uuid = parse_uuid(SERVICE_UUID)?;
        let scan_filter = ScanFilter {
            services: vec![service_uuid],
        };

        central.start_scan(scan_filter).await?;

        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;

        central.stop_scan().await?;

        let peripherals = central.peripherals().await?;
        let mut devices = Vec::new();
        for peripheral in peripherals {
            if let Some(device_info) = self.inspect_peripheral(&peripheral).await {
                info!("Found BlockBlueLight device: {}", device_info.name);
                devices.push(device_info);

                self.peripherals
                    .lock()
                    .await
                    .insert(peripheral.address(), peripheral);
            }
        }

        info!(
            "Scan completed. Found {} BlockBlueLight device(s)",
            devices.len()
        );
        Ok(devices)
    }

    /// Build a transport bound to a previously scanned device
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::DeviceNotFound`] if the device is not in
    /// the scan cache.
    pub async fn transport_for(
        &self,
        device_info: &DeviceInfo,
        params: &ConnectionParams,
    ) -> Result<BleTransport> {
        let address = device_info
            .address
            .as_deref()
            .ok_or(BlockLightError::DeviceNotFound)?;

        let peripherals = self.peripherals.lock().await;
        let peripheral = peripherals
            .values()
            .find(|p| p.address().to_string() == address)
            .ok_or(BlockLightError::DeviceNotFound)?
            .clone();

        Ok(BleTransport::new(peripheral, params.connect_timeout_ms))
    }

    /// Extract device info when the peripheral looks like a BlockBlueLight
    async fn inspect_peripheral(&self, peripheral: &Peripheral) -> Option<DeviceInfo> {
        let properties = peripheral.properties().await.ok()??;
        let name = properties.local_name?;
        if !matches_device_name(&name) {
            return None;
        }

        Some(DeviceInfo {
            name,
            address: Some(properties.address.to_string()),
            rssi: properties.rssi.unwrap_or(0),
        })
    }
}

/// A btleplug-backed [`Transport`] bound to one peripheral
///
/// Reconnects the same peripheral on every [`Transport::connect`] call, so
/// one instance serves the session across any number of idle-timeout
/// disconnect/reconnect cycles.
pub struct BleTransport {
    peripheral: Peripheral,
    connect_timeout_ms: u64,
}

impl BleTransport {
    /// Create a transport around a discovered peripheral
    #[must_use]
    pub const fn new(peripheral: Peripheral, connect_timeout_ms: u64) -> Self {
        Self {
            peripheral,
            connect_timeout_ms,
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<Vec<u8>>)> {
        info!("Connecting to {}", self.peripheral.address());

        let connect_future = self.peripheral.connect();
        timeout(Duration::from_millis(self.connect_timeout_ms), connect_future)
            .await
            .map_err(|_| BlockLightError::Timeout {
                timeout_ms: self.connect_timeout_ms,
            })?
            .map_err(|e| BlockLightError::ConnectionFailed(e.to_string()))?;

        self.peripheral.discover_services().await?;

        let service_uuid = parse_uuid(SERVICE_UUID)?;
        let write_char_uuid = parse_uuid(WRITE_CHAR_UUID)?;
        let notify_char_uuid = parse_uuid(NOTIFY_CHAR_UUID)?;

        let services = self.peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| {
                BlockLightError::ConnectionFailed("light service not found".to_string())
            })?;

        let write_char = find_characteristic(service, write_char_uuid, "write")?;
        let notify_char = find_characteristic(service, notify_char_uuid, "notify")?;

        self.peripheral.subscribe(&notify_char).await?;

        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_SIZE);
        let mut stream = self.peripheral.notifications().await?;
        let notify_uuid = notify_char.uuid;
        tokio::spawn(async move {
            while let Some(data) = stream.next().await {
                if data.uuid != notify_uuid {
                    continue;
                }
                if notification_tx.send(data.value).await.is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        });

        info!("Connected and notifications enabled");

        let link = BleLink {
            peripheral: self.peripheral.clone(),
            write_char,
        };
        Ok((Box::new(link), notification_rx))
    }
}

/// Active btleplug connection
struct BleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
}

#[async_trait]
impl TransportLink for BleLink {
    async fn write(&self, bytes: &[u8]) -> Result<()> {
        // The vendor app writes without response; the device acknowledges
        // over the notify characteristic instead.
        self.peripheral
            .write(&self.write_char, bytes, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

fn find_characteristic(
    service: &btleplug::api::Service,
    uuid: Uuid,
    role: &str,
) -> Result<Characteristic> {
    service
        .characteristics
        .iter()
        .find(|c| c.uuid == uuid)
        .cloned()
        .ok_or_else(|| {
            BlockLightError::ConnectionFailed(format!("{role} characteristic not found"))
        })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| BlockLightError::ConnectionFailed(format!("invalid UUID {value}: {e}")))
}

/// Whether an advertised name matches the vendor's naming scheme
pub(crate) fn matches_device_name(name: &str) -> bool {
    name.to_uppercase().contains(DEVICE_NAME_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing() {
        assert!(parse_uuid(SERVICE_UUID).is_ok());
        assert!(parse_uuid(WRITE_CHAR_UUID).is_ok());
        assert!(parse_uuid(NOTIFY_CHAR_UUID).is_ok());
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_device_name_matching() {
        assert!(matches_device_name("BLOCK-RLT-01"));
        assert!(matches_device_name("BlockBlueLight Panel"));
        assert!(matches_device_name("blockpanel"));
        assert!(!matches_device_name("Treadmill"));
        assert!(!matches_device_name(""));
    }
}
