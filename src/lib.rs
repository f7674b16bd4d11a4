/*!
 # MagicStrip Bluetooth LED Strip Controller Library

 A Rust library for controlling MagicStrip (HTZM) Bluetooth LED strips.

 ## Features

 * Power toggling
 * RGB color control
 * Brightness adjustment
 * 41 built-in effects with adjustable speed
 * Power/brightness status read back from the device
 * A single shared BLE link per device, reference counted across callers

 ## Example

 ```no_run
 use magicstrip::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let mut hub = MagicStripHub::new().await?;
     for device in hub.discover().await? {
         device.set_color(255, 0, 0).await?; // Set to red
         device.set_brightness(128).await?;
         println!("{}", device.state());
     }

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the MagicStrip controller library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// No compatible LED device found
    #[error("No compatible LED device found")]
    NoCompatibleDevice,

    /// No peripheral with the requested address was seen during the scan
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// Value out of range
    #[error("Value {0} out of range ({1}..={2})")]
    ValueOutOfRange(i32, i32, i32),

    /// Effect name not present in the effect table
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// Transport deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Transport rejected or dropped the link
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether this error is a caller-side validation failure.
    ///
    /// These are raised before any transport I/O and are never retried.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::ValueOutOfRange(..) | Error::UnknownEffect(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod ble;
pub mod codec;
pub mod device;
pub mod dispatcher;
pub mod effects;
pub mod fake;
pub mod hub;
pub mod parser;
pub mod session;
pub mod state;
pub mod transport;

pub use ble::BtleplugTransport;
pub use codec::{Command, Frame, PowerStatus, CHARACTERISTIC_UUID, HARDCODED_NAMES, SERVICE_UUID};
pub use device::{DeviceConfig, MagicStripDevice};
pub use effects::{Effect, EFFECTS};
pub use fake::FakeTransport;
pub use hub::{HubConfig, MagicStripHub};
pub use state::{DeviceState, SignalQuality};
pub use transport::{NotificationHandler, Transport, TransportError};
