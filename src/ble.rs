/*!
 # btleplug transport

 [`Transport`] over a platform BLE peripheral.
*/

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::transport::{NotificationHandler, Transport, TransportError};

/// Default deadline for a single characteristic write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sorts btleplug failures into the transport error classes
fn classify(error: btleplug::Error) -> TransportError {
    match error {
        btleplug::Error::TimedOut(_) => TransportError::Timeout,
        btleplug::Error::NotConnected => TransportError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "peripheral not connected",
        )),
        btleplug::Error::Other(source) => match source.downcast::<io::Error>() {
            Ok(source) => TransportError::Io(*source),
            Err(source) => TransportError::Connection(source.to_string()),
        },
        other => TransportError::Connection(other.to_string()),
    }
}

/// A single BLE peripheral driven through btleplug
pub struct BtleplugTransport {
    peripheral: Peripheral,
    address: String,
    write_timeout: Duration,
    /// Notification forwarding tasks, by characteristic
    listeners: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BtleplugTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        let address = peripheral.address().to_string();
        Self {
            peripheral,
            address,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_listener(&self, uuid: &Uuid) {
        if let Some(listener) = self.listeners.lock().remove(uuid) {
            listener.abort();
        }
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if !self.peripheral.is_connected().await.map_err(classify)? {
            debug!("{}: Connecting to device...", self.address);
            self.peripheral.connect().await.map_err(classify)?;
        }

        debug!("{}: Discovering services...", self.address);
        self.peripheral.discover_services().await.map_err(classify)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let listeners: Vec<_> = self.listeners.lock().drain().collect();
        for (_, listener) in listeners {
            listener.abort();
        }
        self.peripheral.disconnect().await.map_err(classify)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;

        // Prefer WriteWithResponse when supported
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        trace!("{}: Writing {}", self.address, hex::encode(data));
        match time::timeout(
            self.write_timeout,
            self.peripheral.write(&characteristic, data, write_type),
        )
        .await
        {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;

        // Open the stream first so nothing sent right after subscribing is lost
        let mut notifications = self.peripheral.notifications().await.map_err(classify)?;
        self.peripheral.subscribe(&target).await.map_err(classify)?;

        let address = self.address.clone();
        let listener = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    handler(&notification.value);
                }
            }
            trace!("{}: Notification stream ended", address);
        });

        if let Some(previous) = self.listeners.lock().insert(characteristic, listener) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_listener(&characteristic);
        let target = self.characteristic(characteristic)?;
        if let Err(e) = self.peripheral.unsubscribe(&target).await {
            warn!("{}: Failed to unsubscribe: {}", self.address, e);
            return Err(classify(e));
        }
        Ok(())
    }
}
