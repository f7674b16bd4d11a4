use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ble::BtleplugTransport;
use crate::codec::{Command, CHARACTERISTIC_UUID};
use crate::dispatcher::{self, CommandDispatcher};
use crate::effects::{self, Effect};
use crate::parser::{StatusParser, DEFAULT_ACK_WINDOW};
use crate::session::ConnectionSession;
use crate::state::{DeviceState, SignalQuality};
use crate::transport::{NotificationHandler, Transport, TransportError};
use crate::{Error, Result};

/// Default effect speed used by [`MagicStripDevice::set_effect`] callers that
/// have no preference
pub const DEFAULT_EFFECT_SPEED: u8 = 128;

/// Static color restored when an effect is stopped before any color was set
pub const DEFAULT_STATIC_COLOR: (u8, u8, u8) = (255, 255, 255);

/// Per-device protocol settings
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Characteristic used for commands and notifications
    pub characteristic_uuid: Uuid,
    /// Deadline for opening the link
    pub connect_timeout: Duration,
    /// How long an acknowledgement stays valid for a following status frame
    pub ack_window: Duration,
    /// How long a refresh listens for the status frame
    pub refresh_grace: Duration,
    /// Attempts per command when the link is found dropped
    pub max_send_attempts: u8,
    /// Minimum delay between commands in milliseconds
    pub command_delay: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            characteristic_uuid: CHARACTERISTIC_UUID,
            connect_timeout: Duration::from_secs(10),
            ack_window: DEFAULT_ACK_WINDOW,
            refresh_grace: Duration::from_secs(1),
            max_send_attempts: 2,
            command_delay: 0,
        }
    }
}

/// Main struct for controlling a MagicStrip LED strip
///
/// All operations take `&self`; share the device behind an [`Arc`] to drive
/// it from several tasks. They all use one link, opened on demand.
pub struct MagicStripDevice<T: Transport = BtleplugTransport> {
    name: String,
    address: String,
    rssi: Option<i16>,
    config: DeviceConfig,
    dispatcher: CommandDispatcher<T>,
    parser: Arc<Mutex<StatusParser>>,
    state: Arc<watch::Sender<DeviceState>>,
    /// Last static color sent, restored when an effect is stopped
    resume_color: Mutex<(u8, u8, u8)>,
}

fn channel(value: i32) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::ValueOutOfRange(value, 0, i32::from(u8::MAX)))
}

fn lookup_effect(name: &str) -> Result<&'static Effect> {
    effects::find(name).ok_or_else(|| Error::UnknownEffect(name.to_string()))
}

impl<T: Transport> MagicStripDevice<T> {
    /// Wraps a transport without touching the device
    pub fn new(
        transport: Arc<T>,
        name: impl Into<String>,
        rssi: Option<i16>,
        config: DeviceConfig,
    ) -> Self {
        let name = name.into();
        let address = transport.address().to_string();
        let signal_quality = rssi.map(SignalQuality::from_rssi);

        info!(
            "Found {} ({}), Signal Strength: {} ({})",
            name,
            address,
            signal_quality.map_or_else(|| "?".to_string(), |q| q.to_string()),
            rssi.map_or_else(|| "?".to_string(), |r| r.to_string()),
        );

        let session = Arc::new(ConnectionSession::new(transport, config.connect_timeout));
        let dispatcher = CommandDispatcher::new(
            session,
            config.characteristic_uuid,
            config.max_send_attempts,
            config.command_delay,
        );
        let parser = StatusParser::new(address.clone(), config.ack_window);
        let (state, _) = watch::channel(DeviceState {
            signal_quality,
            ..DeviceState::default()
        });

        Self {
            name,
            address,
            rssi,
            config,
            dispatcher,
            parser: Arc::new(Mutex::new(parser)),
            state: Arc::new(state),
            resume_color: Mutex::new(DEFAULT_STATIC_COLOR),
        }
    }

    /// Creates the device and reads its power and brightness
    #[instrument(skip(transport, config))]
    pub async fn create(
        transport: Arc<T>,
        name: String,
        rssi: Option<i16>,
        config: DeviceConfig,
    ) -> Result<Self> {
        let device = Self::new(transport, name, rssi, config);
        device.refresh_state().await?;
        Ok(device)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Current snapshot
    pub fn state(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    /// Observes every snapshot replacement
    pub fn subscribe_state(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    pub fn is_on(&self) -> Option<bool> {
        self.state.borrow().on
    }

    pub fn brightness(&self) -> Option<u8> {
        self.state.borrow().brightness
    }

    pub fn color(&self) -> Option<(u8, u8, u8)> {
        self.state.borrow().color
    }

    pub fn effect(&self) -> Option<&'static str> {
        self.state.borrow().effect
    }

    pub fn effect_speed(&self) -> Option<u8> {
        self.state.borrow().effect_speed
    }

    /// Names of the built-in effects
    pub fn effects_list(&self) -> Vec<&'static str> {
        effects::names().collect()
    }

    /// Replaces the snapshot with one derived from the current one
    fn update_state(&self, change: impl FnOnce(&DeviceState) -> DeviceState) {
        self.state.send_modify(|state| *state = change(state));
    }

    /// Sets the strip to a static RGB color, stopping any effect
    ///
    /// # Arguments
    ///
    /// * `red` - Red component (0-255)
    /// * `green` - Green component (0-255)
    /// * `blue` - Blue component (0-255)
    #[instrument(skip(self))]
    pub async fn set_color(&self, red: i32, green: i32, blue: i32) -> Result<()> {
        let (red, green, blue) = (channel(red)?, channel(green)?, channel(blue)?);

        debug!("Setting color to RGB({}, {}, {})", red, green, blue);
        self.dispatcher
            .send(&[Command::color(red, green, blue)])
            .await?;
        self.update_state(|state| state.with_color(red, green, blue));
        *self.resume_color.lock() = (red, green, blue);

        info!("Color set to RGB({}, {}, {})", red, green, blue);
        Ok(())
    }

    /// Sets the brightness level, then reads back what the device reports
    ///
    /// # Arguments
    ///
    /// * `level` - Brightness level (0-255)
    #[instrument(skip(self))]
    pub async fn set_brightness(&self, level: i32) -> Result<()> {
        let level = channel(level)?;

        debug!("Setting brightness to {}", level);
        self.dispatcher.send(&[Command::brightness(level)]).await?;
        self.update_state(|state| state.with_brightness(level));
        info!("Brightness set to {}", level);

        self.refresh_state().await
    }

    /// Selects a built-in effect by name, or stops the effect with `None`
    ///
    /// The strip has no "stop" opcode; stopping switches it back to the last
    /// static color set through [`MagicStripDevice::set_color`].
    #[instrument(skip(self))]
    pub async fn set_effect_name(&self, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            return self.stop_effect().await;
        };
        let effect = lookup_effect(name)?;

        debug!("Setting effect to {} ({:#04x})", effect.name, effect.id);
        self.dispatcher.send(&[effect.command()]).await?;
        self.update_state(|state| state.with_effect(Some(effect.name), state.effect_speed));

        info!("Effect set to {}", effect.name);
        Ok(())
    }

    async fn stop_effect(&self) -> Result<()> {
        let (red, green, blue) = *self.resume_color.lock();

        debug!("Stopping effect, back to RGB({}, {}, {})", red, green, blue);
        self.dispatcher
            .send(&[Command::color(red, green, blue)])
            .await?;
        self.update_state(|state| state.with_color(red, green, blue));

        info!("Effect stopped");
        Ok(())
    }

    /// Sets the speed of the current effect
    ///
    /// # Arguments
    ///
    /// * `speed` - Effect speed (0-255, 0 is fastest)
    #[instrument(skip(self))]
    pub async fn set_effect_speed(&self, speed: i32) -> Result<()> {
        let speed = channel(speed)?;

        if self.effect().is_none() {
            warn!("Setting effect speed without an active effect. This may not have any effect.");
        }

        debug!("Setting effect speed to {}", speed);
        self.dispatcher.send(&[Command::effect_speed(speed)]).await?;
        self.update_state(|state| state.with_effect_speed(speed));

        info!("Effect speed set to {}", speed);
        Ok(())
    }

    /// Selects an effect and its speed in one ordered exchange
    #[instrument(skip(self))]
    pub async fn set_effect(&self, name: &str, speed: i32) -> Result<()> {
        let speed = channel(speed)?;
        let effect = lookup_effect(name)?;

        debug!(
            "Setting effect to {} ({:#04x}) at speed {}",
            effect.name, effect.id, speed
        );
        self.dispatcher
            .send(&[effect.command(), Command::effect_speed(speed)])
            .await?;
        self.update_state(|state| state.with_effect(Some(effect.name), Some(speed)));

        info!("Effect set to {} at speed {}", effect.name, speed);
        Ok(())
    }

    /// Toggles the power, then reads back the reported state
    #[instrument(skip(self))]
    pub async fn toggle_power(&self) -> Result<()> {
        debug!("Toggling power");
        self.dispatcher.send(&[Command::toggle_power()]).await?;
        self.update_state(DeviceState::with_power_toggled);

        self.refresh_state().await
    }

    /// Alias of [`MagicStripDevice::refresh_state`]
    pub async fn update(&self) -> Result<()> {
        self.refresh_state().await
    }

    /// Queries the device for current power and brightness states.
    ///
    /// Listens on the control characteristic, writes the `F0`/`0F` query and
    /// gives the answer [`DeviceConfig::refresh_grace`] to arrive.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn refresh_state(&self) -> Result<()> {
        debug!("Refreshing state.");

        let _turn = self.dispatcher.queue().acquire().await;
        let guard = self.dispatcher.session().enter().await?;
        debug!("{}: Connected", self.address);

        let outcome = self.query_status(guard.transport()).await;
        guard.release().await;

        outcome.map_err(|e| dispatcher::classify("update device", e))
    }

    fn notification_handler(&self) -> NotificationHandler {
        let parser = Arc::clone(&self.parser);
        let state = Arc::clone(&self.state);

        Arc::new(move |data: &[u8]| {
            let status = parser.lock().feed(data, Instant::now());
            if let Some(status) = status {
                state.send_modify(|current| *current = current.with_power_status(status));
            }
        })
    }

    async fn query_status(&self, transport: &T) -> std::result::Result<(), TransportError> {
        let characteristic = self.config.characteristic_uuid;
        self.parser.lock().reset();
        transport
            .subscribe(characteristic, self.notification_handler())
            .await?;

        let exchange = async {
            transport
                .write(characteristic, Command::trigger_ack().as_bytes())
                .await?;
            transport
                .write(characteristic, Command::query_status().as_bytes())
                .await?;
            time::sleep(self.config.refresh_grace).await;
            Ok::<(), TransportError>(())
        };
        let outcome = exchange.await;

        if let Err(e) = transport.unsubscribe(characteristic).await {
            warn!("{}: Failed to stop notifications: {}", self.address, e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ACK_FRAME;
    use crate::fake::{FakeTransport, TransportCall};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn device(fake: &Arc<FakeTransport>) -> MagicStripDevice<FakeTransport> {
        MagicStripDevice::new(Arc::clone(fake), "HTZM", Some(-60), DeviceConfig::default())
    }

    #[tokio::test]
    async fn starts_with_only_signal_quality_known() {
        let fake = Arc::new(FakeTransport::new("AA"));
        assert_eq!(
            DeviceState {
                signal_quality: Some(SignalQuality::Good),
                ..DeviceState::default()
            },
            device(&fake).state()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_subscribes_queries_and_unsubscribes() {
        let fake = Arc::new(FakeTransport::with_status("AA", true, 127));
        let device = device(&fake);

        device.refresh_state().await.unwrap();

        assert_eq!(
            vec![
                TransportCall::Connect,
                TransportCall::Subscribe(CHARACTERISTIC_UUID),
                TransportCall::Write(CHARACTERISTIC_UUID, vec![0xf0]),
                TransportCall::Write(CHARACTERISTIC_UUID, vec![0x0f]),
                TransportCall::Unsubscribe(CHARACTERISTIC_UUID),
                TransportCall::Disconnect,
            ],
            fake.calls()
        );
        assert_eq!(Some(true), device.is_on());
        assert_eq!(Some(127), device.brightness());
    }

    #[tokio::test(start_paused = true)]
    async fn status_without_ack_does_not_count() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.respond_to(&[0x0f], vec![vec![0x0f, 0x01, 0x10, 0x00, 0x00]]);
        let device = device(&fake);

        device.refresh_state().await.unwrap();
        assert_eq!(None, device.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn late_status_is_discarded() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.respond_to(&[0xf0], vec![ACK_FRAME.to_vec()]);
        let device = device(&fake);
        device.refresh_state().await.unwrap();

        time::advance(Duration::from_secs(11)).await;
        let handler = device.notification_handler();
        handler(&[0x0f, 0x01, 0x10, 0x00, 0x00]);
        assert_eq!(None, device.brightness());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_still_unsubscribes_and_releases() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_write(TransportError::Timeout);
        let device = device(&fake);

        assert_matches!(device.refresh_state().await, Err(Error::Timeout(_)));
        assert!(fake
            .calls()
            .contains(&TransportCall::Unsubscribe(CHARACTERISTIC_UUID)));
        assert_eq!(0, device.dispatcher.session().holders().await);
        assert!(!fake.is_connected());
    }

    #[tokio::test]
    async fn effect_names_are_validated_before_io() {
        let fake = Arc::new(FakeTransport::new("AA"));
        let device = device(&fake);

        let error = device.set_effect_name(Some("Disco")).await.unwrap_err();
        assert!(error.is_out_of_range());
        let error = device.set_effect("Colorful", 256).await.unwrap_err();
        assert!(error.is_out_of_range());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn stopping_an_effect_restores_the_last_color() {
        let fake = Arc::new(FakeTransport::new("AA"));
        let device = device(&fake);
        device.set_color(1, 2, 3).await.unwrap();
        device.set_effect("Colorful", 3).await.unwrap();

        device.set_effect_name(None).await.unwrap();

        let writes = fake.writes();
        assert_eq!(
            vec![vec![0x03, 1, 2, 3], vec![0xf0]],
            writes[writes.len() - 2..].to_vec()
        );
        assert_eq!(Some((1, 2, 3)), device.color());
        assert_eq!(None, device.effect());
        assert_eq!(None, device.effect_speed());
    }

    #[tokio::test]
    async fn stopping_an_effect_without_a_color_goes_white() {
        let fake = Arc::new(FakeTransport::new("AA"));
        let device = device(&fake);
        device.set_effect_name(Some("Colorful Jump")).await.unwrap();

        device.set_effect_name(None).await.unwrap();

        assert_eq!(Some(&vec![0x03, 0xff, 0xff, 0xff]), fake.writes().iter().rev().nth(1));
        assert_eq!(Some(DEFAULT_STATIC_COLOR), device.color());
        assert_eq!(None, device.effect());
    }

    #[tokio::test]
    async fn failed_stop_keeps_the_effect() {
        let fake = Arc::new(FakeTransport::new("AA"));
        let device = device(&fake);
        device.set_effect_name(Some("Colorful Jump")).await.unwrap();
        fake.fail_next_connect(TransportError::Connection("out of range".into()));

        assert!(device.set_effect_name(None).await.is_err());
        assert_eq!(Some("Colorful Jump"), device.effect());
        assert_eq!(None, device.color());
    }

    #[tokio::test]
    async fn failed_send_leaves_state_untouched() {
        let fake = Arc::new(FakeTransport::new("AA"));
        fake.fail_next_connect(TransportError::Connection("out of range".into()));
        let device = device(&fake);
        let before = device.state();

        assert!(device.set_color(1, 2, 3).await.is_err());
        assert_eq!(before, device.state());
    }
}
