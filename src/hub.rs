/*!
 # Device discovery

 Scans for strips advertising the MagicStrip service under an allowed name
 and keeps the devices it has found.
*/

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::ble::BtleplugTransport;
use crate::codec::{HARDCODED_NAMES, SERVICE_UUID};
use crate::device::{DeviceConfig, MagicStripDevice};
use crate::transport::Transport;
use crate::{Error, Result};

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            error!("No Bluetooth adapters found");
            Error::NoBluetoothAdapters
        })?;
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// Discovery settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum time to wait for devices
    pub scan_duration: Duration,
    /// Delay between peripheral polls while scanning
    pub poll_interval: Duration,
    /// Accepted advertised names, compared case-insensitively
    pub name_allow_list: Vec<String>,
    /// Settings handed to every created device
    pub device: DeviceConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            name_allow_list: HARDCODED_NAMES.iter().map(|name| name.to_string()).collect(),
            device: DeviceConfig::default(),
        }
    }
}

/// Whether an advertisement belongs to a supported strip
pub fn is_compatible(name: Option<&str>, services: &[Uuid], allow_list: &[String]) -> bool {
    let Some(name) = name else {
        return false;
    };
    services.contains(&SERVICE_UUID)
        && allow_list
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

/// Discovery only wants peripherals advertising the strip service
fn discovery_filter() -> ScanFilter {
    ScanFilter {
        services: vec![SERVICE_UUID],
    }
}

/// Known addresses are looked up whatever they advertise
fn lookup_filter() -> ScanFilter {
    ScanFilter::default()
}

fn same_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

/// A peripheral seen while scanning
struct Candidate {
    peripheral: Peripheral,
    name: String,
    rssi: Option<i16>,
}

/// Finds and keeps MagicStrip devices
pub struct MagicStripHub {
    central: Adapter,
    config: HubConfig,
    known_devices: Vec<Arc<MagicStripDevice>>,
}

impl MagicStripHub {
    /// Uses the first Bluetooth adapter with default settings
    #[instrument]
    pub async fn new() -> Result<Self> {
        Self::with_config(HubConfig::default()).await
    }

    #[instrument]
    pub async fn with_config(config: HubConfig) -> Result<Self> {
        info!("Initializing BLE controller");
        let manager = Manager::new().await?;
        let central = get_central(&manager).await?;
        Ok(Self {
            central,
            config,
            known_devices: Vec::new(),
        })
    }

    pub fn known_devices(&self) -> &[Arc<MagicStripDevice>] {
        &self.known_devices
    }

    /// Searches for undiscovered devices.
    ///
    /// Returns every known device, including ones found earlier.
    #[instrument(skip(self))]
    pub async fn discover(&mut self) -> Result<Vec<Arc<MagicStripDevice>>> {
        let allow_list = self.config.name_allow_list.clone();
        let candidates = self
            .scan(
                discovery_filter(),
                |_, name, services| is_compatible(name, services, &allow_list),
                None,
            )
            .await?;

        if candidates.is_empty() {
            info!("No compatible LED device found");
        }
        for candidate in candidates {
            self.adopt(candidate).await;
        }
        Ok(self.known_devices.clone())
    }

    /// Adds devices by address, skipping addresses that never show up.
    #[instrument(skip(self))]
    pub async fn add_known_devices(
        &mut self,
        addresses: &[&str],
    ) -> Result<Vec<Arc<MagicStripDevice>>> {
        let candidates = self
            .scan(
                lookup_filter(),
                |peripheral, _, _| addresses.iter().any(|address| same_address(peripheral, address)),
                Some(addresses.len()),
            )
            .await?;

        for address in addresses {
            if !candidates
                .iter()
                .any(|candidate| same_address(&candidate.peripheral, address))
            {
                warn!("Device {} not found", address);
            }
        }
        for candidate in candidates {
            self.adopt(candidate).await;
        }
        Ok(self.known_devices.clone())
    }

    /// Connects to and registers a candidate unless it is already known.
    async fn adopt(&mut self, candidate: Candidate) {
        let transport = Arc::new(BtleplugTransport::new(candidate.peripheral));
        if self
            .known_devices
            .iter()
            .any(|device| device.address().eq_ignore_ascii_case(transport.address()))
        {
            debug!("{} already known", transport.address());
            return;
        }

        let device = MagicStripDevice::new(
            transport,
            candidate.name,
            candidate.rssi,
            self.config.device.clone(),
        );
        if let Err(e) = device.refresh_state().await {
            warn!("{}: Initial refresh failed: {}", device.address(), e);
        }
        self.known_devices.push(Arc::new(device));
    }

    /// Runs one scan, stopping it whether or not polling succeeds
    async fn scan<F>(
        &self,
        filter: ScanFilter,
        matches: F,
        want: Option<usize>,
    ) -> Result<Vec<Candidate>>
    where
        F: Fn(&Peripheral, Option<&str>, &[Uuid]) -> bool,
    {
        info!("Scanning for compatible BLE devices...");
        self.central.start_scan(filter).await?;

        let found = self.poll(matches, want).await;
        let stopped = self.central.stop_scan().await;
        if let Err(e) = &stopped {
            warn!("Failed to stop scanning: {}", e);
        }

        let found = found?;
        stopped?;
        Ok(found)
    }

    /// Polls the adapter until `want` matches are found or the scan times out
    async fn poll<F>(&self, matches: F, want: Option<usize>) -> Result<Vec<Candidate>>
    where
        F: Fn(&Peripheral, Option<&str>, &[Uuid]) -> bool,
    {
        let start_time = Instant::now();
        let mut found: Vec<Candidate> = Vec::new();

        while start_time.elapsed() < self.config.scan_duration {
            let peripherals = self.central.peripherals().await?;
            debug!("Found {} BLE peripherals so far", peripherals.len());

            for peripheral in peripherals {
                if found
                    .iter()
                    .any(|candidate| candidate.peripheral.id() == peripheral.id())
                {
                    continue;
                }
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                if !matches(&peripheral, props.local_name.as_deref(), &props.services) {
                    continue;
                }

                let name = props.local_name.unwrap_or_default();
                info!("Found compatible device: {} ({})", name, peripheral.address());
                found.push(Candidate {
                    peripheral,
                    name,
                    rssi: props.rssi,
                });
            }

            if want.is_some_and(|want| found.len() >= want) {
                break;
            }
            time::sleep(self.config.poll_interval).await;
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> Vec<String> {
        HubConfig::default().name_allow_list
    }

    #[test]
    fn accepts_allowed_names_in_any_case() {
        assert!(is_compatible(Some("HTZM"), &[SERVICE_UUID], &allow_list()));
        assert!(is_compatible(Some("htzm"), &[SERVICE_UUID], &allow_list()));
    }

    #[test]
    fn only_discovery_filters_on_the_service() {
        assert_eq!(vec![SERVICE_UUID], discovery_filter().services);
        assert!(lookup_filter().services.is_empty());
    }

    #[test]
    fn rejects_wrong_name_or_service() {
        assert!(!is_compatible(Some("ELK-BLEDOM"), &[SERVICE_UUID], &allow_list()));
        assert!(!is_compatible(None, &[SERVICE_UUID], &allow_list()));
        assert!(!is_compatible(Some("HTZM"), &[], &allow_list()));
        assert!(!is_compatible(
            Some("HTZM"),
            &[Uuid::from_u128(0xfff3)],
            &allow_list()
        ));
    }
}
