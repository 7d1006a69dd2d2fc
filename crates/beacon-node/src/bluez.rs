//! BlueZ radio via `bluer`.
//!
//! The token travels as manufacturer-specific data under [`COMPANY_ID`].
//! Scanning runs LE discovery for the window and reads each device's
//! manufacturer data and RSSI once the window closes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::wait::{within, Deadline};
use beacon_core::{Advertiser, PeerObservation, PeerScanner, RadioError, RadioResult};
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{pin_mut, StreamExt};
use tracing::{debug, info, warn};

/// Company identifier the token is advertised under.
pub const COMPANY_ID: u16 = 0x1234;

fn scan_failed(err: &bluer::Error) -> RadioError {
    RadioError::ScanFailed {
        message: err.to_string(),
    }
}

fn advertise_failed(err: &bluer::Error) -> RadioError {
    RadioError::AdvertiseFailed {
        message: err.to_string(),
    }
}

/// Open the default adapter, power it on, and split it into a scanner and
/// an advertiser.
///
/// # Errors
///
/// Returns [`RadioError::AdapterNotFound`] if BlueZ is unreachable or has no
/// usable adapter.
pub async fn open(device_name: &str) -> RadioResult<(BluezScanner, BluezAdvertiser)> {
    let adapter = connect().await.map_err(|err| {
        warn!(error = %err, "Bluetooth adapter unavailable");
        RadioError::AdapterNotFound
    })?;
    info!(adapter = adapter.name(), "Bluetooth adapter powered");

    let scanner = BluezScanner {
        adapter: adapter.clone(),
    };
    let advertiser = BluezAdvertiser {
        adapter,
        device_name: device_name.to_string(),
        handle: None,
    };
    Ok((scanner, advertiser))
}

async fn connect() -> bluer::Result<Adapter> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..DiscoveryFilter::default()
        })
        .await?;
    Ok(adapter)
}

/// LE discovery on a BlueZ adapter.
pub struct BluezScanner {
    adapter: Adapter,
}

impl BluezScanner {
    async fn observe(&self, address: Address) -> bluer::Result<Option<PeerObservation>> {
        let device = self.adapter.device(address)?;
        let Some(rssi) = device.rssi().await? else {
            return Ok(None);
        };
        let token = device
            .manufacturer_data()
            .await?
            .and_then(|mut data| data.remove(&COMPANY_ID))
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();

        Ok(Some(PeerObservation::new(address.to_string(), rssi, token)))
    }
}

#[async_trait]
impl PeerScanner for BluezScanner {
    async fn scan(&mut self, window: Duration) -> RadioResult<Vec<PeerObservation>> {
        let deadline = Deadline::after(window);
        let mut heard: Vec<Address> = Vec::new();
        {
            let events = self
                .adapter
                .discover_devices()
                .await
                .map_err(|e| scan_failed(&e))?;
            pin_mut!(events);

            while let Some(Some(event)) = within(deadline, events.next()).await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    if !heard.contains(&address) {
                        heard.push(address);
                    }
                }
            }
        }

        let mut observations = Vec::with_capacity(heard.len());
        for address in heard {
            match self.observe(address).await {
                Ok(Some(observation)) => observations.push(observation),
                Ok(None) => {}
                Err(err) => debug!(%address, error = %err, "Device vanished before it could be read"),
            }
        }
        Ok(observations)
    }
}

/// LE advertising on a BlueZ adapter.
pub struct BluezAdvertiser {
    adapter: Adapter,
    device_name: String,
    handle: Option<AdvertisementHandle>,
}

#[async_trait]
impl Advertiser for BluezAdvertiser {
    async fn advertise(&mut self, token: &str) -> RadioResult<()> {
        // Dropping the handle unregisters the previous advertisement.
        self.handle = None;

        let advertisement = Advertisement {
            advertisement_type: Type::Peripheral,
            manufacturer_data: BTreeMap::from([(COMPANY_ID, token.as_bytes().to_vec())]),
            local_name: Some(self.device_name.clone()),
            discoverable: Some(true),
            ..Advertisement::default()
        };
        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|e| advertise_failed(&e))?;
        self.handle = Some(handle);
        debug!(token, "Advertising token");
        Ok(())
    }

    async fn stop(&mut self) -> RadioResult<()> {
        self.handle = None;
        Ok(())
    }
}
