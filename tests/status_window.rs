use std::sync::Arc;
use std::time::Duration;

use magicstrip::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

/// A strip whose every write takes `latency`, so the status frame arrives
/// that long after the acknowledgement
fn slow_strip(latency: Duration) -> (Arc<FakeTransport>, MagicStripDevice<FakeTransport>) {
    let fake = Arc::new(FakeTransport::with_status("AA:BB", true, 127).with_latency(latency));
    let config = DeviceConfig {
        connect_timeout: Duration::from_secs(60),
        ..DeviceConfig::default()
    };
    let device = MagicStripDevice::new(Arc::clone(&fake), "HTZM", None, config);
    (fake, device)
}

#[rstest]
#[case(Duration::from_secs(9), Some(true), Some(127))]
#[case(Duration::from_secs(10), Some(true), Some(127))]
#[case(Duration::from_secs(11), None, None)]
#[tokio::test(start_paused = true)]
async fn status_is_applied_only_inside_the_ack_window(
    #[case] latency: Duration,
    #[case] on: Option<bool>,
    #[case] brightness: Option<u8>,
) -> anyhow::Result<()> {
    let (_fake, device) = slow_strip(latency);

    device.refresh_state().await?;

    assert_eq!(on, device.is_on());
    assert_eq!(brightness, device.brightness());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_status_leaves_the_rest_of_the_snapshot_alone() -> anyhow::Result<()> {
    let (_fake, device) = slow_strip(Duration::from_secs(11));
    device.set_color(4, 5, 6).await?;
    let before = device.state();

    device.refresh_state().await?;

    assert_eq!(before, device.state());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unrecognized_notifications_are_ignored() -> anyhow::Result<()> {
    let fake = Arc::new(FakeTransport::new("AA:BB"));
    fake.respond_to(&[0xf0], vec![vec![0xf0, 0x02, 0x01], vec![0x42, 0x42]]);
    fake.respond_to(&[0x0f], vec![vec![0x0f, 0x07, 0x01], vec![0x0f, 0x00, 0x05, 0x00, 0x00]]);
    let device = MagicStripDevice::new(Arc::clone(&fake), "HTZM", None, DeviceConfig::default());

    device.refresh_state().await?;

    assert_eq!(Some(false), device.is_on());
    assert_eq!(Some(5), device.brightness());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unanswered_query_does_not_poison_the_next_refresh() -> anyhow::Result<()> {
    let fake = Arc::new(FakeTransport::new("AA:BB"));
    fake.respond_to(&[0xf0], vec![vec![0xf0, 0x02, 0x01]]);
    let device = MagicStripDevice::new(Arc::clone(&fake), "HTZM", None, DeviceConfig::default());

    device.refresh_state().await?;
    assert_eq!(None, device.brightness());

    tokio::time::advance(Duration::from_secs(30)).await;
    fake.set_status(true, 77);
    device.refresh_state().await?;

    assert_eq!(Some(true), device.is_on());
    assert_eq!(Some(77), device.brightness());
    Ok(())
}
