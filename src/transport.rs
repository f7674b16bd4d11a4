/*!
 # Transport seam

 The BLE stack the device talks through. [`crate::BtleplugTransport`] is the
 real implementation; [`crate::FakeTransport`] records calls for tests.
*/

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Error;

/// Callback invoked with the payload of every notification on a subscribed
/// characteristic
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Failures reported by a transport
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Deadline exceeded
    #[error("operation timed out")]
    Timeout,

    /// The stack rejected the operation or dropped the link
    #[error("connection error: {0}")]
    Connection(String),

    /// The peripheral does not expose the characteristic
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// Low-level I/O failure; usually the link went away underneath us
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => Error::Timeout("transport deadline exceeded".to_string()),
            TransportError::Connection(reason) => Error::ConnectionFailure(reason),
            TransportError::CharacteristicNotFound(uuid) => {
                Error::CharacteristicNotFound(uuid.to_string())
            }
            TransportError::Io(source) => Error::ConnectionFailure(source.to_string()),
            TransportError::Other(source) => Error::Other(source),
        }
    }
}

/// A link to a single peripheral
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transport-level identifier of the peripheral
    fn address(&self) -> &str;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError>;

    /// Routes notifications on `characteristic` to `handler` until
    /// [`Transport::unsubscribe`] is called
    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn maps_into_crate_error_taxonomy() {
        assert_matches!(Error::from(TransportError::Timeout), Error::Timeout(_));
        assert_matches!(
            Error::from(TransportError::Connection("gone".into())),
            Error::ConnectionFailure(reason) if reason == "gone"
        );
        assert_matches!(
            Error::from(TransportError::Io(std::io::ErrorKind::BrokenPipe.into())),
            Error::ConnectionFailure(_)
        );
        assert_matches!(
            Error::from(TransportError::CharacteristicNotFound(crate::CHARACTERISTIC_UUID)),
            Error::CharacteristicNotFound(uuid) if uuid.starts_with("0000fff1")
        );
        assert_matches!(
            Error::from(TransportError::Other("odd".into())),
            Error::Other(_)
        );
    }
}
