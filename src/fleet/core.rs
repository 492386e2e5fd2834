//! Fleet coordinator.
//!
//! The [`Fleet`] owns every claimed dongle, keyed by port, and drives
//! campaign operations across all of them.
//!
//! # Fan-out
//!
//! A lifecycle operation targets every connected device whose test type is
//! not Idle (for data writes, also not Downlink). Per-device operations run
//! concurrently; the call returns once every one of them has finished,
//! whether it succeeded or not. No failure cancels the others.
//!
//! # Example
//!
//! ```no_run
//! use dongle_fleet::Fleet;
//!
//! # async fn example() -> dongle_fleet::Result<()> {
//! let fleet = Fleet::builder().build()?;
//!
//! for port in fleet.available_ports() {
//!     fleet.claim(port).await?;
//! }
//!
//! let report = fleet.start_tests().await;
//! for failure in &report.failed {
//!     eprintln!("{} {}: {}", failure.port, failure.address, failure.error);
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dongle::{Device, DongleService, TestType};
use crate::error::{Error, Result};
use crate::identifiers::PortId;
use crate::transport::{CommandService, PortProvider, Transport};

use super::builder::FleetBuilder;
use super::discovery::{Discovery, PortWatch};
use super::report::{CampaignReport, DongleReport, FanOutReport, Operation};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the fleet.
pub(crate) struct FleetInner {
    /// Port provider and the published port set.
    ports: PortWatch,

    /// Claimed dongles.
    dongles: Mutex<FxHashMap<PortId, DongleService>>,

    /// Discovery task, if running.
    discovery: Mutex<Option<Discovery>>,
}

// ============================================================================
// Fleet
// ============================================================================

/// Coordinator for all claimed dongles.
///
/// Cheap to clone; clones share the same dongles.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

impl fmt::Debug for Fleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fleet")
            .field("dongle_count", &self.dongle_count())
            .field("discovering", &self.is_discovering())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Fleet - Construction
// ============================================================================

impl Fleet {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> FleetBuilder {
        FleetBuilder::new()
    }

    pub(crate) fn new(provider: Arc<dyn PortProvider>, discovery_interval: Option<Duration>) -> Self {
        let ports = PortWatch::new(provider);
        let discovery = discovery_interval.map(|interval| Discovery::spawn(ports.clone(), interval));

        Self {
            inner: Arc::new(FleetInner {
                ports,
                dongles: Mutex::new(FxHashMap::default()),
                discovery: Mutex::new(discovery),
            }),
        }
    }
}

// ============================================================================
// Fleet - Ports
// ============================================================================

impl Fleet {
    /// Last published port set.
    #[must_use]
    pub fn available_ports(&self) -> Vec<PortId> {
        self.inner.ports.current()
    }

    /// Receiver notified whenever the port set changes.
    #[must_use]
    pub fn watch_ports(&self) -> watch::Receiver<Vec<PortId>> {
        self.inner.ports.subscribe()
    }

    /// Lists ports now and publishes the set if it changed.
    ///
    /// # Errors
    ///
    /// Returns the provider's listing error.
    pub async fn refresh_ports(&self) -> Result<bool> {
        self.inner.ports.refresh().await
    }

    /// Returns `true` while background discovery runs.
    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.inner
            .discovery
            .lock()
            .as_ref()
            .is_some_and(|d| !d.is_finished())
    }

    /// Stops background discovery.
    pub fn stop_discovery(&self) {
        if let Some(discovery) = self.inner.discovery.lock().take() {
            discovery.cancel();
            debug!("Port discovery stopped");
        }
    }
}

// ============================================================================
// Fleet - Dongles
// ============================================================================

impl Fleet {
    /// Opens `port` through the provider and claims the dongle on it.
    ///
    /// # Errors
    ///
    /// - [`Error::PortInUse`] if the port is already claimed
    /// - The provider's open error
    pub async fn claim(&self, port: impl Into<PortId>) -> Result<DongleService> {
        let port = port.into();
        if self.inner.dongles.lock().contains_key(&port) {
            return Err(Error::PortInUse { port });
        }

        let transport = self.inner.ports.provider().open(&port).await?;
        self.attach(port, transport)
    }

    /// Claims a dongle on an already open transport.
    ///
    /// # Errors
    ///
    /// [`Error::PortInUse`] if the port is already claimed.
    pub fn attach<T: Transport>(&self, port: impl Into<PortId>, transport: T) -> Result<DongleService> {
        let port = port.into();
        let mut dongles = self.inner.dongles.lock();
        if dongles.contains_key(&port) {
            return Err(Error::PortInUse { port });
        }

        let dongle = DongleService::new(CommandService::new(port.clone(), transport));
        dongles.insert(port.clone(), dongle.clone());

        info!(port = %port, "Dongle claimed");
        Ok(dongle)
    }

    /// Closes and removes the dongle on `port`.
    ///
    /// # Errors
    ///
    /// [`Error::DongleNotFound`] if the port is not claimed.
    pub fn release(&self, port: impl Into<PortId>) -> Result<()> {
        let port = port.into();
        let dongle = self
            .inner
            .dongles
            .lock()
            .remove(&port)
            .ok_or_else(|| Error::dongle_not_found(port.clone()))?;

        dongle.close();
        info!(port = %port, "Dongle released");
        Ok(())
    }

    /// Dongle claimed on `port`.
    #[must_use]
    pub fn dongle(&self, port: impl Into<PortId>) -> Option<DongleService> {
        let port = port.into();
        self.inner.dongles.lock().get(&port).cloned()
    }

    /// All claimed dongles, ordered by port.
    #[must_use]
    pub fn dongles(&self) -> Vec<DongleService> {
        let mut dongles: Vec<_> = self.inner.dongles.lock().values().cloned().collect();
        dongles.sort_by(|a, b| a.port().cmp(b.port()));
        dongles
    }

    /// Number of claimed dongles.
    #[inline]
    #[must_use]
    pub fn dongle_count(&self) -> usize {
        self.inner.dongles.lock().len()
    }
}

// ============================================================================
// Fleet - Campaign
// ============================================================================

impl Fleet {
    /// Starts the planned test on every non-idle device.
    pub async fn start_tests(&self) -> FanOutReport {
        self.fan_out(Operation::StartTests, |t| !t.is_idle(), |dongle, device| async move {
            dongle
                .start_test(device.address(), device.test_type(), device.frame_size())
                .await
        })
        .await
    }

    /// Stops the test on every non-idle device.
    pub async fn stop_tests(&self) -> FanOutReport {
        self.fan_out(Operation::StopTests, |t| !t.is_idle(), |dongle, device| async move {
            dongle.stop_test(device.address()).await
        })
        .await
    }

    /// Starts result collection on every non-idle device.
    pub async fn start_result_collection(&self) -> FanOutReport {
        self.fan_out(
            Operation::StartResultCollection,
            |t| !t.is_idle(),
            |dongle, device| async move { dongle.start_result_collection(device.address()).await },
        )
        .await
    }

    /// Stops result collection on every non-idle device and records the
    /// results. Idle devices get the idle marker so histories stay aligned
    /// across cycles.
    pub async fn stop_result_collection(&self) -> FanOutReport {
        for dongle in self.dongles() {
            for device in dongle.connected_devices() {
                if device.test_type().is_idle()
                    && let Err(e) = dongle.record_idle(device.address())
                {
                    debug!(port = %dongle.port(), address = %device.address(), error = %e, "Idle marker skipped");
                }
            }
        }

        self.fan_out(
            Operation::StopResultCollection,
            |t| !t.is_idle(),
            |dongle, device| async move {
                dongle
                    .stop_result_collection(device.address())
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Starts data writes on every uplink and bidirectional device.
    pub async fn start_data_write(&self) -> FanOutReport {
        self.fan_out(Operation::StartDataWrite, TestType::writes_data, |dongle, device| async move {
            dongle.start_data_write(device.address()).await
        })
        .await
    }

    /// Stops data writes on every uplink and bidirectional device.
    pub async fn stop_data_write(&self) -> FanOutReport {
        self.fan_out(Operation::StopDataWrite, TestType::writes_data, |dongle, device| async move {
            dongle.stop_data_write(device.address()).await
        })
        .await
    }

    /// Snapshot of every dongle and device.
    #[must_use]
    pub fn report(&self) -> CampaignReport {
        CampaignReport {
            dongles: self
                .dongles()
                .iter()
                .map(DongleReport::from_service)
                .collect(),
        }
    }

    /// [`Fleet::report`] rendered as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn report_json(&self) -> Result<String> {
        self.report().to_json()
    }

    /// Stops discovery and releases every dongle.
    pub fn shutdown(&self) {
        self.stop_discovery();

        let dongles: Vec<DongleService> = {
            let mut map = self.inner.dongles.lock();
            map.drain().map(|(_, d)| d).collect()
        };

        info!(count = dongles.len(), "Releasing all dongles");

        for dongle in dongles {
            dongle.close();
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    async fn fan_out<F, Fut>(
        &self,
        operation: Operation,
        select: fn(TestType) -> bool,
        run: F,
    ) -> FanOutReport
    where
        F: Fn(DongleService, Device) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut targets = Vec::new();
        for dongle in self.dongles() {
            for device in dongle.connected_devices() {
                if select(device.test_type()) {
                    targets.push((dongle.clone(), device));
                }
            }
        }

        debug!(?operation, count = targets.len(), "Fan-out started");

        let runs = targets.into_iter().map(|(dongle, device)| {
            let port = dongle.port().clone();
            let address = device.address();
            let operation = run(dongle, device);
            async move { (port, address, operation.await) }
        });

        let report = FanOutReport::new(operation, join_all(runs).await);

        if report.is_success() {
            info!(?operation, count = report.attempted(), "Fan-out completed");
        } else {
            warn!(
                ?operation,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "Fan-out completed with failures"
            );
        }

        report
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::assert_ok;

    use crate::dongle::{DeviceState, DongleState};
    use crate::identifiers::{AddressType, BtAddress};
    use crate::mock::{MockPortProvider, eventually};
    use crate::protocol::Opcode;

    fn device(last: u8) -> BtAddress {
        BtAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last], AddressType::Random)
    }

    fn fleet(ports: &[&str]) -> (MockPortProvider, Fleet) {
        let provider = MockPortProvider::new(ports);
        let fleet = Fleet::builder()
            .port_provider(provider.clone())
            .no_discovery()
            .build()
            .unwrap();
        (provider, fleet)
    }

    async fn connect(dongle: &DongleService, address: BtAddress, test_type: TestType) {
        assert_ok!(dongle.connect_device(address).await);
        eventually(|| dongle.device(address).map(|d| d.state()) == Some(DeviceState::Connected))
            .await;
        assert_ok!(dongle.configure_test(address, test_type, 20));
    }

    /// Two dongles, each with one idle device and one device of `active`.
    async fn campaign(active: [TestType; 2]) -> (MockPortProvider, Fleet) {
        let (provider, fleet) = fleet(&["COM3", "COM4"]);
        for (port, test_type) in ["COM3", "COM4"].into_iter().zip(active) {
            let dongle = fleet.claim(port).await.unwrap();
            connect(&dongle, device(1), TestType::Idle).await;
            connect(&dongle, device(2), test_type).await;
        }
        (provider, fleet)
    }

    fn total(provider: &MockPortProvider, opcode: Opcode, tag: Option<u8>) -> usize {
        ["COM3", "COM4"]
            .iter()
            .map(|port| provider.dongle(port).unwrap().count(opcode, tag))
            .sum()
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let (_provider, fleet) = fleet(&["COM3"]);

        let dongle = fleet.claim("COM3").await.unwrap();
        assert_eq!(dongle.port(), &PortId::from("COM3"));
        assert_eq!(fleet.dongle_count(), 1);

        let err = fleet.claim("COM3").await.unwrap_err();
        assert!(matches!(err, Error::PortInUse { .. }));

        assert_ok!(fleet.release("COM3"));
        eventually(|| dongle.is_closed()).await;
        assert!(fleet.dongle("COM3").is_none());

        let err = fleet.release("COM3").unwrap_err();
        assert!(matches!(err, Error::DongleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_claim_unknown_port_fails() {
        let (_provider, fleet) = fleet(&["COM3"]);
        let err = fleet.claim("COM9").await.unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(fleet.dongle_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_ports() {
        let (provider, fleet) = fleet(&["COM4", "COM3"]);
        let mut rx = fleet.watch_ports();

        assert!(fleet.refresh_ports().await.unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            fleet.available_ports(),
            vec![PortId::from("COM3"), PortId::from("COM4")]
        );
        rx.mark_unchanged();

        provider.set_ports(&["COM3", "COM4"]);
        assert!(!fleet.refresh_ports().await.unwrap());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_start_tests_skips_idle_devices() {
        let (provider, fleet) = campaign([TestType::Uplink, TestType::Uplink]).await;

        let report = fleet.start_tests().await;

        assert_eq!(report.operation, Operation::StartTests);
        assert_eq!(report.attempted(), 2);
        assert!(report.is_success());
        assert_eq!(total(&provider, Opcode::WriteCtrl, Some(0xFA)), 2);
        assert_eq!(total(&provider, Opcode::WriteCtrl, Some(0xFC)), 2);

        for dongle in fleet.dongles() {
            assert_eq!(dongle.device(device(1)).unwrap().state(), DeviceState::Connected);
            assert_eq!(dongle.device(device(2)).unwrap().state(), DeviceState::UplinkTest);
        }
    }

    #[tokio::test]
    async fn test_start_tests_completes_despite_failure() {
        let (provider, fleet) = campaign([TestType::Uplink, TestType::Uplink]).await;
        provider.dongle("COM4").unwrap().silence(Opcode::WriteCtrl);

        let report = fleet.start_tests().await;

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.succeeded, vec![(PortId::from("COM3"), device(2))]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].port, PortId::from("COM4"));
        assert!(report.failed[0].error.is_timeout());

        assert_eq!(fleet.dongle("COM3").unwrap().state(), DongleState::Connected);
        assert_eq!(fleet.dongle("COM4").unwrap().state(), DongleState::Error);
        assert_eq!(
            fleet.dongle("COM3").unwrap().device(device(2)).unwrap().state(),
            DeviceState::UplinkTest
        );
        assert_eq!(
            fleet.dongle("COM4").unwrap().device(device(2)).unwrap().state(),
            DeviceState::Connected
        );
    }

    #[tokio::test]
    async fn test_stop_tests_waits_for_in_flight_start() {
        let (provider, fleet) = campaign([TestType::Uplink, TestType::Downlink]).await;
        let com3 = provider.dongle("COM3").unwrap();
        com3.hold_ack(0xFC);

        let start = tokio::spawn({
            let fleet = fleet.clone();
            async move { fleet.start_tests().await }
        });
        eventually(|| com3.count(Opcode::WriteCtrl, Some(0xFC)) == 1).await;

        let stop = tokio::spawn({
            let fleet = fleet.clone();
            async move { fleet.stop_tests().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(com3.count(Opcode::WriteCtrl, Some(0xFE)), 0);

        com3.release_acks();
        assert!(start.await.unwrap().is_success());
        let stop = stop.await.unwrap();
        assert_eq!(stop.attempted(), 2);
        assert!(stop.is_success());

        for dongle in fleet.dongles() {
            assert_eq!(dongle.state(), DongleState::Connected);
            assert_eq!(dongle.device(device(2)).unwrap().state(), DeviceState::Connected);
        }
    }

    #[tokio::test]
    async fn test_stop_result_collection_records_idle_markers() {
        let (provider, fleet) = campaign([TestType::Uplink, TestType::Downlink]).await;
        provider.dongle("COM3").unwrap().set_measurement(4000, 8000);

        assert!(fleet.start_result_collection().await.is_success());
        let report = fleet.stop_result_collection().await;
        assert_eq!(report.attempted(), 2);
        assert!(report.is_success());

        let com3 = fleet.dongle("COM3").unwrap();
        assert!(com3.device(device(1)).unwrap().results()[0].is_idle());
        assert_eq!(
            com3.device(device(2)).unwrap().results()[0].throughput_bps,
            Some(2000)
        );
        assert_eq!(total(&provider, Opcode::StartResult, None), 2);
    }

    #[tokio::test]
    async fn test_data_write_skips_downlink() {
        let (provider, fleet) = campaign([TestType::Downlink, TestType::Bidirectional]).await;

        let report = fleet.start_data_write().await;
        assert_eq!(report.attempted(), 1);
        assert_eq!(report.succeeded, vec![(PortId::from("COM4"), device(2))]);

        assert!(fleet.stop_data_write().await.is_success());
        assert_eq!(provider.dongle("COM3").unwrap().count(Opcode::WriteData, None), 0);
        assert_eq!(provider.dongle("COM4").unwrap().count(Opcode::StopData, None), 1);
    }

    #[tokio::test]
    async fn test_full_cycle_and_report() {
        let (_provider, fleet) = campaign([TestType::Uplink, TestType::Bidirectional]).await;

        assert!(fleet.start_tests().await.is_success());
        assert!(fleet.start_result_collection().await.is_success());
        assert!(fleet.start_data_write().await.is_success());
        assert!(fleet.stop_data_write().await.is_success());
        assert!(fleet.stop_result_collection().await.is_success());
        assert!(fleet.stop_tests().await.is_success());

        let report = fleet.report();
        assert_eq!(report.dongles.len(), 2);
        assert_eq!(report.device_count(), 4);
        assert_eq!(report.dongles[0].port, PortId::from("COM3"));

        let json: serde_json::Value = serde_json::from_str(&fleet.report_json().unwrap()).unwrap();
        assert_eq!(json["dongles"][1]["port"], "COM4");
        assert_eq!(json["dongles"][1]["devices"][1]["test_type"], "Bidirectional");
        assert_eq!(json["dongles"][1]["devices"][1]["state"], "Connected");
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (_provider, fleet) = fleet(&["COM3", "COM4"]);
        let a = fleet.claim("COM3").await.unwrap();
        let b = fleet.claim("COM4").await.unwrap();

        fleet.shutdown();

        assert_eq!(fleet.dongle_count(), 0);
        eventually(|| a.is_closed() && b.is_closed()).await;
    }
}
