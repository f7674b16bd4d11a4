/*!
 # Fake transport

 An in-memory [`Transport`] that records every call, can be scripted to fail,
 and answers writes with canned notifications. Used by the tests and by the
 binaries' `--fake` mode.
*/

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::codec::{Command, ACK_FRAME, CHARACTERISTIC_UUID};
use crate::transport::{NotificationHandler, Transport, TransportError};

/// A call that reached the fake transport successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
}

#[derive(Default)]
struct Script {
    connect_failures: VecDeque<TransportError>,
    write_failures: VecDeque<TransportError>,
    disconnect_failures: VecDeque<TransportError>,
    responses: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

/// Recording, scriptable transport
pub struct FakeTransport {
    address: String,
    latency: Duration,
    connected: Mutex<bool>,
    calls: Mutex<Vec<TransportCall>>,
    script: Mutex<Script>,
    handlers: Mutex<HashMap<Uuid, NotificationHandler>>,
    write_attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            latency: Duration::ZERO,
            connected: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            handlers: Mutex::new(HashMap::new()),
            write_attempts: AtomicUsize::new(0),
        }
    }

    /// A fake strip that acknowledges every trigger and reports the given
    /// power and brightness when queried
    pub fn with_status(address: impl Into<String>, on: bool, brightness: u8) -> Self {
        let fake = Self::new(address);
        fake.set_status(on, brightness);
        fake
    }

    /// Delay applied to connect, disconnect and write
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Changes the status frame sent in answer to a status query
    pub fn set_status(&self, on: bool, brightness: u8) {
        let status = vec![0x0f, u8::from(on), brightness, 0x00, 0x00];
        self.respond_to(Command::trigger_ack().as_bytes(), vec![ACK_FRAME.to_vec()]);
        self.respond_to(Command::query_status().as_bytes(), vec![status]);
    }

    /// Notifications to deliver whenever exactly `written` is written
    pub fn respond_to(&self, written: &[u8], notifications: Vec<Vec<u8>>) {
        self.script
            .lock()
            .responses
            .insert(written.to_vec(), notifications);
    }

    pub fn fail_next_connect(&self, error: TransportError) {
        self.script.lock().connect_failures.push_back(error);
    }

    pub fn fail_next_write(&self, error: TransportError) {
        self.script.lock().write_failures.push_back(error);
    }

    pub fn fail_next_disconnect(&self, error: TransportError) {
        self.script.lock().disconnect_failures.push_back(error);
    }

    /// Delivers a notification as if the device had sent it
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) {
        let handler = self.handlers.lock().get(&characteristic).cloned();
        match handler {
            Some(handler) => handler(data),
            None => trace!("{}: No subscriber for {}", self.address, characteristic),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Connect))
    }

    pub fn disconnects(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Disconnect))
    }

    /// Payloads of successful writes, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write(_, data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of write calls, including failed ones
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    async fn pause(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.pause().await;
        if let Some(error) = self.script.lock().connect_failures.pop_front() {
            return Err(error);
        }
        *self.connected.lock() = true;
        self.record(TransportCall::Connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.pause().await;
        *self.connected.lock() = false;
        self.handlers.lock().clear();
        if let Some(error) = self.script.lock().disconnect_failures.pop_front() {
            return Err(error);
        }
        self.record(TransportCall::Disconnect);
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.script.lock().write_failures.pop_front() {
            return Err(error);
        }
        if !self.is_connected() {
            return Err(TransportError::Connection("not connected".to_string()));
        }
        self.record(TransportCall::Write(characteristic, data.to_vec()));

        let replies = self.script.lock().responses.get(data).cloned();
        for reply in replies.unwrap_or_default() {
            self.notify(CHARACTERISTIC_UUID, &reply);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Connection("not connected".to_string()));
        }
        self.handlers.lock().insert(characteristic, handler);
        self.record(TransportCall::Subscribe(characteristic));
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.handlers.lock().remove(&characteristic);
        self.record(TransportCall::Unsubscribe(characteristic));
        Ok(())
    }
}
