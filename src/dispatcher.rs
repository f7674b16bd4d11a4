/*!
 # Command dispatch

 Every device-bound write goes through here. A command is written to the
 control characteristic and followed by the `F0` trigger that makes the device
 acknowledge it. Writes are serialized per device through a [`CommandQueue`].
*/

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{self, Instant};
use tracing::{debug, error, instrument, trace};
use uuid::Uuid;

use crate::codec::Command;
use crate::session::ConnectionSession;
use crate::transport::{Transport, TransportError};
use crate::{Error, Result};

/// Command queue to serialize device writes with rate limiting
pub struct CommandQueue {
    /// Minimum delay between commands
    min_delay: Duration,
    /// When the previous turn ended; the lock itself is the turn
    last_command: Mutex<Option<Instant>>,
}

impl CommandQueue {
    pub fn new(min_delay_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            last_command: Mutex::new(None),
        }
    }

    /// Waits for exclusive use of the device.
    ///
    /// The turn lasts until the returned value is dropped.
    pub async fn acquire(&self) -> QueueTurn<'_> {
        let last_command = self.last_command.lock().await;

        if let Some(last) = *last_command {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait_time);
                time::sleep(wait_time).await;
            }
        }

        QueueTurn { last_command }
    }
}

/// Exclusive use of a device's command path
pub struct QueueTurn<'a> {
    last_command: MutexGuard<'a, Option<Instant>>,
}

impl Drop for QueueTurn<'_> {
    fn drop(&mut self) {
        *self.last_command = Some(Instant::now());
    }
}

/// Maps a transport failure onto the crate error taxonomy
pub(crate) fn classify(context: &str, error: TransportError) -> Error {
    match error {
        TransportError::Timeout => {
            debug!("Timeout on {}", context);
            Error::Timeout(context.to_string())
        }
        TransportError::Connection(reason) => {
            debug!("Failed to {}: {}", context, reason);
            Error::ConnectionFailure(format!("Failed to {context}: {reason}"))
        }
        other => other.into(),
    }
}

/// Sends commands over a shared [`ConnectionSession`]
pub struct CommandDispatcher<T: Transport> {
    session: Arc<ConnectionSession<T>>,
    queue: CommandQueue,
    characteristic: Uuid,
    max_attempts: u8,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(
        session: Arc<ConnectionSession<T>>,
        characteristic: Uuid,
        max_attempts: u8,
        command_delay_ms: u64,
    ) -> Self {
        Self {
            session,
            queue: CommandQueue::new(command_delay_ms),
            characteristic,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn session(&self) -> &Arc<ConnectionSession<T>> {
        &self.session
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Sends `commands` one after another, in order.
    ///
    /// The whole sequence holds the queue, so no other caller's command lands
    /// between two of these. Stops at the first failure.
    #[instrument(skip(self, commands), fields(count = commands.len()))]
    pub async fn send(&self, commands: &[Command]) -> Result<()> {
        let _turn = self.queue.acquire().await;
        for command in commands {
            self.send_one(command).await?;
        }
        Ok(())
    }

    /// Sends a single command, retrying once the link is found dropped.
    async fn send_one(&self, command: &Command) -> Result<()> {
        let mut attempt = 1;
        loop {
            debug!("Sending command: {} (attempt {}/{})", command, attempt, self.max_attempts);

            match self.attempt(command).await? {
                Ok(()) => {
                    trace!("Command sent successfully");
                    return Ok(());
                }
                Err(TransportError::Io(e)) if attempt < self.max_attempts => {
                    debug!("Encountered I/O error: {}", e);
                    debug!("Assuming connection has been closed. Trying again...");
                    attempt += 1;
                }
                Err(TransportError::Io(e)) => {
                    error!("Command failed permanently after {} attempts: {}", attempt, e);
                    return Err(Error::ConnectionFailure(format!(
                        "link lost after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => return Err(classify("write", e)),
            }
        }
    }

    /// One enter/write/release cycle.
    ///
    /// The outer result carries session errors, the inner one the write
    /// outcome, so the caller can decide whether to retry.
    async fn attempt(&self, command: &Command) -> Result<std::result::Result<(), TransportError>> {
        let guard = self.session.enter().await?;
        let transport = guard.transport();

        let mut outcome = transport
            .write(self.characteristic, command.as_bytes())
            .await;
        if outcome.is_ok() {
            outcome = transport
                .write(self.characteristic, Command::trigger_ack().as_bytes())
                .await;
        }

        guard.release().await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CHARACTERISTIC_UUID;
    use crate::fake::FakeTransport;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::io;

    fn dispatcher(fake: &Arc<FakeTransport>) -> CommandDispatcher<FakeTransport> {
        let session = Arc::new(ConnectionSession::new(
            Arc::clone(fake),
            Duration::from_secs(10),
        ));
        CommandDispatcher::new(session, CHARACTERISTIC_UUID, 2, 0)
    }

    fn broken_pipe() -> TransportError {
        TransportError::Io(io::ErrorKind::BrokenPipe.into())
    }

    #[tokio::test]
    async fn writes_command_then_trigger() {
        let fake = Arc::new(FakeTransport::new("AA"));
        dispatcher(&fake).send(&[Command::toggle_power()]).await.unwrap();

        assert_eq!(vec![vec![0x04], vec![0xf0]], fake.writes());
        assert_eq!(1, fake.connects());
        assert_eq!(1, fake.disconnects());
    }

    #[tokio::test]
    async fn sequences_keep_their_order() {
        let fake = Arc::new(FakeTransport::new("AA"));
        dispatcher(&fake)
            .send(&[Command::effect(0x16), Command::effect_speed(0)])
            .await
            .unwrap();

        assert_eq!(
            vec![vec![0x07, 0x16], vec![0xf0], vec![0x09, 0xff], vec![0xf0]],
            fake.writes()
        );
    }

    #[tokio::test]
    async fn one_dropped_link_is_retried() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(broken_pipe());

        dispatcher(&fake).send(&[Command::brightness(3)]).await.unwrap();

        assert_eq!(vec![vec![0x08, 0x03], vec![0xf0]], fake.writes());
        assert_eq!(3, fake.write_attempts());
    }

    #[tokio::test]
    async fn repeated_dropped_links_are_fatal() {
        let fake = Arc::new(FakeTransport::new("AA"));
        for _ in 0..3 {
            fake.fail_next_write(broken_pipe());
        }
        let dispatcher = dispatcher(&fake);

        assert_matches!(
            dispatcher.send(&[Command::brightness(3)]).await,
            Err(Error::ConnectionFailure(_))
        );
        assert!(fake.writes().is_empty());
        assert_eq!(0, dispatcher.session().holders().await);
    }

    #[tokio::test]
    async fn timeouts_are_not_retried() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(TransportError::Timeout);
        let dispatcher = dispatcher(&fake);

        assert_matches!(
            dispatcher.send(&[Command::toggle_power()]).await,
            Err(Error::Timeout(_))
        );
        assert_eq!(1, fake.write_attempts());
        assert_eq!(0, dispatcher.session().holders().await);
    }

    #[tokio::test]
    async fn connection_errors_are_not_retried() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(TransportError::Connection("rejected".into()));

        assert_matches!(
            dispatcher(&fake).send(&[Command::toggle_power()]).await,
            Err(Error::ConnectionFailure(_))
        );
        assert_eq!(1, fake.write_attempts());
    }

    #[tokio::test]
    async fn other_errors_pass_through() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(TransportError::Other("stack bug".into()));

        assert_matches!(
            dispatcher(&fake).send(&[Command::toggle_power()]).await,
            Err(Error::Other(_))
        );
    }

    #[tokio::test]
    async fn failure_stops_the_sequence() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(TransportError::Timeout);

        let result = dispatcher(&fake)
            .send(&[Command::effect(1), Command::effect_speed(1)])
            .await;
        assert!(result.is_err());
        assert!(fake.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_spaces_out_commands() {
        let queue = CommandQueue::new(200);
        let start = Instant::now();
        drop(queue.acquire().await);
        drop(queue.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
