/*!
 # Shared connection session

 Several operations on one device may need the link at the same time. The
 session counts them: the first holder opens the link, the last one to leave
 closes it. Entry and exit bookkeeping is serialized per device.
*/

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, instrument, warn};

use crate::transport::{Transport, TransportError};
use crate::{Error, Result};

/// Reference-counted wrapper around one physical link
pub struct ConnectionSession<T: Transport> {
    transport: Arc<T>,
    connect_timeout: Duration,
    /// Number of live [`SessionGuard`]s
    holders: Mutex<usize>,
}

impl<T: Transport> ConnectionSession<T> {
    pub fn new(transport: Arc<T>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            holders: Mutex::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current number of holders
    pub async fn holders(&self) -> usize {
        *self.holders.lock().await
    }

    /// Joins the session, connecting first if nobody holds the link.
    ///
    /// The count is left untouched when connecting fails.
    #[instrument(skip(self), fields(address = self.transport.address()))]
    pub async fn enter(self: &Arc<Self>) -> Result<SessionGuard<T>> {
        let mut holders = self.holders.lock().await;

        if *holders == 0 {
            let address = self.transport.address();
            debug!("{}: Connecting", address);
            match time::timeout(self.connect_timeout, self.transport.connect()).await {
                Ok(Ok(())) => debug!("{}: Connected", address),
                Err(_) | Ok(Err(TransportError::Timeout)) => {
                    debug!("{}: Timeout on connect", address);
                    return Err(Error::Timeout(format!("connecting to {address}")));
                }
                Ok(Err(e)) => {
                    debug!("{}: Error on connect: {}", address, e);
                    return Err(Error::ConnectionFailure(format!(
                        "connecting to {address}: {e}"
                    )));
                }
            }
        }

        *holders += 1;
        Ok(SessionGuard {
            session: Arc::clone(self),
            released: false,
        })
    }

    /// Leaves the session, disconnecting when the last holder leaves.
    ///
    /// Disconnect failures are logged, never returned.
    #[instrument(skip(self), fields(address = self.transport.address()))]
    async fn exit(&self) {
        let mut holders = self.holders.lock().await;
        let address = self.transport.address();

        match *holders {
            0 => warn!("{}: Session exit without a matching enter", address),
            1 => {
                *holders = 0;
                debug!("{}: Last holder left, disconnecting", address);
                if let Err(e) = self.transport.disconnect().await {
                    warn!("{}: Failed to disconnect: {}", address, e);
                }
            }
            _ => *holders -= 1,
        }
    }
}

/// Proof of membership in a [`ConnectionSession`]
///
/// Call [`SessionGuard::release`] when done. A guard dropped without release
/// (a cancelled future, a panic) schedules the exit on the runtime instead,
/// so the count never leaks.
#[must_use = "the link stays open until the guard is released"]
pub struct SessionGuard<T: Transport> {
    session: Arc<ConnectionSession<T>>,
    released: bool,
}

impl<T: Transport> SessionGuard<T> {
    /// The open link
    pub fn transport(&self) -> &T {
        &self.session.transport
    }

    pub async fn release(mut self) {
        self.released = true;
        self.session.exit().await;
    }
}

impl<T: Transport> fmt::Debug for SessionGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("address", &self.session.transport.address())
            .field("released", &self.released)
            .finish()
    }
}

impl<T: Transport> Drop for SessionGuard<T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = Arc::clone(&self.session);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.exit().await });
            }
            Err(_) => warn!(
                "{}: Session guard dropped outside a runtime; link left open",
                session.transport.address()
            ),
        }
    }
}
