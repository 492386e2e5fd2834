//! Dongle service.
//!
//! One [`DongleService`] per claimed dongle. It owns the dongle's state and
//! its scanned and connected device lists, turns command-service events into
//! state changes, and runs per-device operations through a
//! [`TestSequencer`].
//!
//! # Event Handling
//!
//! | Event | Effect |
//! |-------|--------|
//! | `DeviceScanned` | Appended to the scanned list, deduplicated by address |
//! | `CONNECT_FAILED` / `DISCONNECTED` | Device removed from the connected set |
//! | `BONDED` | Device rebound to the new address |
//! | `SUBSCRIBED` | Device becomes `Connected` |
//! | `TransportClosed` | Dongle becomes `Error` |
//!
//! Status events for untracked addresses are ignored.
//!
//! # Failure Policy
//!
//! A failed step leaves the device state as it was, flags the dongle
//! `Error`, logs at `warn` and returns the error to the caller.
//!
//! # Ordering
//!
//! Operations on one device hold that device's lock for their whole
//! sequence, so a stop issued while a start is in flight waits for the
//! start to finish. Different devices proceed concurrently.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BtAddress, PortId};
use crate::protocol::{DongleResponse, Opcode, ProtocolEvent, Response};
use crate::transport::CommandService;

use super::event::DongleEvent;
use super::model::{Device, DeviceState, DongleState, TestResult, TestType, decode_serial_number};
use super::sequencer::TestSequencer;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Registry
// ============================================================================

/// Mutable dongle state. Never locked across an await.
#[derive(Default)]
struct Registry {
    state: DongleState,
    scanned: Vec<Device>,
    /// Devices whose connect command is in flight.
    connecting: Vec<Device>,
    connected: Vec<Device>,
}

impl Registry {
    fn tracked_mut(&mut self, address: BtAddress) -> Option<&mut Device> {
        self.connected
            .iter_mut()
            .chain(self.connecting.iter_mut())
            .find(|d| d.address() == address)
    }

    fn is_tracked(&self, address: BtAddress) -> bool {
        self.connected
            .iter()
            .chain(self.connecting.iter())
            .any(|d| d.address() == address)
    }
}

// ============================================================================
// DongleInner
// ============================================================================

struct DongleInner {
    commands: CommandService,
    registry: Mutex<Registry>,
    /// Per-device operation locks, created on first use.
    device_locks: Mutex<FxHashMap<BtAddress, Arc<AsyncMutex<()>>>>,
    events: broadcast::Sender<DongleEvent>,
}

impl DongleInner {
    fn port(&self) -> &PortId {
        self.commands.port()
    }

    async fn lock_device(&self, address: BtAddress) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.device_locks.lock().entry(address).or_default());
        lock.lock_owned().await
    }

    fn publish(&self, event: DongleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: DongleState) {
        let previous = std::mem::replace(&mut self.registry.lock().state, state);
        if previous != state {
            debug!(port = %self.port(), ?previous, ?state, "Dongle state changed");
            self.publish(DongleEvent::StateChanged(state));
        }
    }

    fn fail(&self, address: BtAddress, step: &'static str, error: &Error) {
        warn!(
            port = %self.port(),
            address = %address,
            step,
            error = %error,
            "Dongle command failed"
        );
        self.set_state(DongleState::Error);
    }

    fn set_device_state(&self, address: BtAddress, state: DeviceState) -> bool {
        let updated = match self.registry.lock().tracked_mut(address) {
            Some(device) => {
                device.set_state(state);
                true
            }
            None => false,
        };

        if updated {
            self.publish(DongleEvent::DeviceStateChanged { address, state });
        }
        updated
    }

    // ========================================================================
    // Event Handling
    // ========================================================================

    fn handle_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::DeviceScanned {
                address,
                serial_info,
            } => self.on_scanned(address, &serial_info),
            ProtocolEvent::DeviceStatusChanged {
                address,
                code,
                new_address,
            } => self.on_status(address, code, new_address),
            ProtocolEvent::TransportClosed => {
                warn!(port = %self.port(), "Transport closed");
                self.set_state(DongleState::Error);
            }
        }
    }

    fn on_scanned(&self, address: BtAddress, serial_info: &[u8]) {
        let device = {
            let mut registry = self.registry.lock();
            if registry.scanned.iter().any(|d| d.address() == address) {
                return;
            }
            let device = Device::new(address, decode_serial_number(serial_info));
            registry.scanned.push(device.clone());
            device
        };

        debug!(
            port = %self.port(),
            address = %address,
            serial = device.serial_number().unwrap_or("-"),
            "Device scanned"
        );
        self.publish(DongleEvent::DeviceScanned(device));
    }

    fn on_status(&self, address: BtAddress, code: DongleResponse, new_address: Option<BtAddress>) {
        if !self.registry.lock().is_tracked(address) {
            debug!(port = %self.port(), address = %address, ?code, "Status for untracked device ignored");
            return;
        }

        match code {
            DongleResponse::DeviceConnectFailed | DongleResponse::DeviceDisconnected => {
                self.set_device_state(address, DeviceState::Disconnected);

                let removed = {
                    let mut registry = self.registry.lock();
                    let before = registry.connected.len();
                    registry.connected.retain(|d| d.address() != address);
                    registry.connected.len() != before
                };

                if removed {
                    info!(port = %self.port(), address = %address, ?code, "Device removed");
                    self.publish(DongleEvent::DeviceRemoved(address));
                }
            }

            DongleResponse::DeviceBonded => {
                let Some(new) = new_address else {
                    debug!(port = %self.port(), address = %address, "Bonded without address change");
                    return;
                };

                let rebound = {
                    let mut registry = self.registry.lock();
                    if registry.is_tracked(new) {
                        false
                    } else if let Some(device) =
                        registry.connected.iter_mut().find(|d| d.address() == address)
                    {
                        device.set_address(new);
                        true
                    } else {
                        false
                    }
                };

                if rebound {
                    info!(port = %self.port(), old = %address, new = %new, "Device address rebound");
                    self.publish(DongleEvent::DeviceAddressChanged { old: address, new });
                } else {
                    warn!(port = %self.port(), old = %address, new = %new, "Bonded address already tracked");
                }
            }

            DongleResponse::DeviceSubscribed => {
                self.set_device_state(address, DeviceState::Connected);
            }

            other => {
                debug!(port = %self.port(), address = %address, code = ?other, "Status ignored");
            }
        }
    }
}

// ============================================================================
// DongleService
// ============================================================================

/// Service for one dongle and the peripherals connected through it.
///
/// # Thread Safety
///
/// `DongleService` is `Send + Sync` and cheap to clone; clones share state.
///
/// # Example
///
/// ```no_run
/// use dongle_fleet::dongle::{DongleService, TestType};
/// use dongle_fleet::transport::{CommandService, PortProvider, SerialPortProvider};
/// use dongle_fleet::PortId;
///
/// # async fn example(address: dongle_fleet::BtAddress) -> dongle_fleet::Result<()> {
/// let port = PortId::new("/dev/ttyACM0");
/// let transport = SerialPortProvider::default().open(&port).await?;
/// let dongle = DongleService::new(CommandService::new(port, transport));
///
/// dongle.connect_device(address).await?;
/// dongle.start_test(address, TestType::Uplink, 20).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DongleService {
    inner: Arc<DongleInner>,
}

impl std::fmt::Debug for DongleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DongleService")
            .field("port", self.port())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DongleService {
    /// Creates the service and installs its event handler on `commands`.
    #[must_use]
    pub fn new(commands: CommandService) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(DongleInner {
            commands,
            registry: Mutex::new(Registry::default()),
            device_locks: Mutex::new(FxHashMap::default()),
            events,
        });

        let weak: Weak<DongleInner> = Arc::downgrade(&inner);
        inner.commands.set_event_handler(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        }));

        debug!(port = %inner.port(), "Dongle service created");

        Self { inner }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Port this dongle is attached to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortId {
        self.inner.port()
    }

    /// Current dongle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> DongleState {
        self.inner.registry.lock().state
    }

    /// Snapshot of the connected set.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<Device> {
        self.inner.registry.lock().connected.clone()
    }

    /// Snapshot of the scanned list.
    #[must_use]
    pub fn scanned_devices(&self) -> Vec<Device> {
        self.inner.registry.lock().scanned.clone()
    }

    /// Snapshot of a connected device.
    #[must_use]
    pub fn device(&self, address: BtAddress) -> Option<Device> {
        self.inner
            .registry
            .lock()
            .connected
            .iter()
            .find(|d| d.address() == address)
            .cloned()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DongleEvent> {
        self.inner.events.subscribe()
    }

    /// Returns `true` once the command service has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Starts scanning. Clears the scanned list on success.
    ///
    /// # Errors
    ///
    /// Returns the command error; the dongle becomes `Error`.
    pub async fn start_scan(&self) -> Result<()> {
        self.dongle_command(Opcode::StartScan, "start scan").await?;
        self.inner.registry.lock().scanned.clear();
        self.inner.set_state(DongleState::Scanning);
        info!(port = %self.port(), "Scan started");
        Ok(())
    }

    /// Stops scanning.
    ///
    /// # Errors
    ///
    /// Returns the command error; the dongle becomes `Error`.
    pub async fn stop_scan(&self) -> Result<()> {
        self.dongle_command(Opcode::StopScan, "stop scan").await?;
        self.inner.set_state(DongleState::Connected);
        info!(port = %self.port(), "Scan stopped");
        Ok(())
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connects a peripheral.
    ///
    /// The device is `Connecting` while the command is in flight and joins
    /// the connected set when the dongle accepts it.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateDevice`] if the address is connected or connecting;
    /// otherwise the command error. On failure the device is not in the
    /// connected set.
    pub async fn connect_device(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        {
            let mut registry = self.inner.registry.lock();
            if registry.is_tracked(address) {
                return Err(Error::DuplicateDevice { address });
            }

            let mut device = registry
                .scanned
                .iter()
                .find(|d| d.address() == address)
                .cloned()
                .unwrap_or_else(|| Device::new(address, None));
            device.set_state(DeviceState::Connecting);
            registry.connecting.push(device);
        }
        self.inner.publish(DongleEvent::DeviceStateChanged {
            address,
            state: DeviceState::Connecting,
        });

        let result = self
            .inner
            .commands
            .send_command(address, Opcode::Connect, &[])
            .await
            .and_then(Response::ensure_ok);

        let device = {
            let mut registry = self.inner.registry.lock();
            let index = registry
                .connecting
                .iter()
                .position(|d| d.address() == address);
            index.map(|i| registry.connecting.remove(i))
        };

        if let Err(e) = result {
            self.inner.fail(address, "connect", &e);
            self.inner.publish(DongleEvent::DeviceStateChanged {
                address,
                state: DeviceState::Disconnected,
            });
            return Err(e);
        }

        let Some(device) = device else {
            return Err(Error::unknown_device(address));
        };

        if device.state() == DeviceState::Disconnected {
            let e = Error::command_rejected(address, Opcode::Connect, DongleResponse::DeviceConnectFailed);
            self.inner.fail(address, "connect", &e);
            return Err(e);
        }

        let added = device.address();
        self.inner.registry.lock().connected.push(device);
        info!(port = %self.port(), address = %added, "Device connected");
        self.inner.publish(DongleEvent::DeviceAdded(added));
        Ok(())
    }

    /// Disconnects a peripheral.
    ///
    /// The device becomes `Disconnecting`; it leaves the connected set when
    /// the dongle reports the link down.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected, otherwise the command error.
    pub async fn disconnect_device(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        self.require(address)?;

        let result = self
            .inner
            .commands
            .send_command(address, Opcode::Disconnect, &[])
            .await
            .and_then(Response::ensure_ok);

        match result {
            Ok(_) => {
                self.inner
                    .set_device_state(address, DeviceState::Disconnecting);
                info!(port = %self.port(), address = %address, "Disconnect requested");
                Ok(())
            }
            Err(e) => {
                self.inner.fail(address, "disconnect", &e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Test Plan
    // ========================================================================

    /// Sets a connected device's test plan.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a zero frame size,
    /// [`Error::UnknownDevice`] if not connected.
    pub fn configure_test(&self, address: BtAddress, test_type: TestType, frame_size: u8) -> Result<()> {
        if frame_size == 0 {
            return Err(Error::invalid_argument("Frame size must be at least 1"));
        }

        {
            let mut registry = self.inner.registry.lock();
            let device = registry
                .connected
                .iter_mut()
                .find(|d| d.address() == address)
                .ok_or_else(|| Error::unknown_device(address))?;
            device.set_test_plan(test_type, frame_size);
        }

        debug!(port = %self.port(), address = %address, ?test_type, frame_size, "Test configured");
        Ok(())
    }

    /// Appends the idle marker to a device's result history.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected.
    pub fn record_idle(&self, address: BtAddress) -> Result<()> {
        self.push_result(address, TestResult::idle())
    }

    // ========================================================================
    // Test Sequences
    // ========================================================================

    /// Enters test mode and selects the sub-mode for `test_type`.
    ///
    /// Each control step waits for its acknowledgement before the next is
    /// sent. The device becomes `TestMode` after entry and the running test
    /// state after selection.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for [`TestType::Idle`],
    /// [`Error::UnknownDevice`] if not connected, otherwise the failed step.
    pub async fn start_test(&self, address: BtAddress, test_type: TestType, frame_size: u8) -> Result<()> {
        let mode = test_type
            .test_mode()
            .ok_or_else(|| Error::invalid_argument("Idle devices do not run tests"))?;

        let _guard = self.inner.lock_device(address).await;
        self.configure_test(address, test_type, frame_size)?;

        let sequencer = TestSequencer::new(&self.inner.commands, address);

        self.step(address, "enter test mode", sequencer.enter_test_mode())
            .await?;
        self.inner.set_device_state(address, DeviceState::TestMode);

        self.step(address, "select mode", sequencer.select_mode(mode, frame_size))
            .await?;
        if let Some(state) = test_type.running_state() {
            self.inner.set_device_state(address, state);
        }

        info!(port = %self.port(), address = %address, ?test_type, frame_size, "Test started");
        Ok(())
    }

    /// Leaves test mode.
    ///
    /// Waits for any in-flight operation on the device before sending the
    /// exit command.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected, otherwise the failed step.
    pub async fn stop_test(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        self.require(address)?;

        let sequencer = TestSequencer::new(&self.inner.commands, address);
        self.step(address, "exit test mode", sequencer.exit_test_mode())
            .await?;
        self.inner.set_device_state(address, DeviceState::Connected);

        info!(port = %self.port(), address = %address, "Test stopped");
        Ok(())
    }

    /// Starts result collection in the direction of the device's test.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected, [`Error::InvalidArgument`]
    /// for an idle device, otherwise the command error.
    pub async fn start_result_collection(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        let device = self.require(address)?;
        let kind = device.test_type().collection_type().ok_or_else(|| {
            Error::invalid_argument(format!("No result collection for {address}: test type is Idle"))
        })?;

        let sequencer = TestSequencer::new(&self.inner.commands, address);
        self.step(
            address,
            "start result collection",
            sequencer.start_result_collection(kind),
        )
        .await
    }

    /// Stops result collection and appends the measured result.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected, [`Error::InvalidArgument`]
    /// for an idle device, otherwise the command or decoding error.
    pub async fn stop_result_collection(&self, address: BtAddress) -> Result<TestResult> {
        let _guard = self.inner.lock_device(address).await;
        let device = self.require(address)?;
        if device.test_type().is_idle() {
            return Err(Error::invalid_argument(format!(
                "No result collection for {address}: test type is Idle"
            )));
        }

        let sequencer = TestSequencer::new(&self.inner.commands, address);
        let measurement = self
            .step(
                address,
                "stop result collection",
                sequencer.stop_result_collection(),
            )
            .await?;

        if measurement.duration_ms < 1000 {
            warn!(
                port = %self.port(),
                address = %address,
                duration_ms = measurement.duration_ms,
                "Measurement shorter than one second, throughput reported as 0"
            );
        }

        let result = TestResult::measured(
            device.test_type(),
            device.frame_size(),
            measurement.throughput_bps(),
        );
        self.push_result(address, result)?;

        info!(
            port = %self.port(),
            address = %address,
            throughput_bps = result.throughput_bps.unwrap_or(0),
            "Result recorded"
        );
        Ok(result)
    }

    /// Starts streaming test data to an uplink or bidirectional device.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if not connected, [`Error::InvalidArgument`]
    /// unless the test type writes data, otherwise the command error.
    pub async fn start_data_write(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        let device = self.require(address)?;
        let kind = device.test_type().data_write_type().ok_or_else(|| {
            Error::invalid_argument(format!(
                "No data write for {address}: dongle does not transmit in {:?} tests",
                device.test_type()
            ))
        })?;

        let sequencer = TestSequencer::new(&self.inner.commands, address);
        self.step(
            address,
            "start data write",
            sequencer.start_data_write(device.frame_size(), kind),
        )
        .await
    }

    /// Stops streaming test data.
    ///
    /// # Errors
    ///
    /// Same as [`start_data_write`](Self::start_data_write).
    pub async fn stop_data_write(&self, address: BtAddress) -> Result<()> {
        let _guard = self.inner.lock_device(address).await;
        let device = self.require(address)?;
        if !device.test_type().writes_data() {
            return Err(Error::invalid_argument(format!(
                "No data write for {address}: dongle does not transmit in {:?} tests",
                device.test_type()
            )));
        }

        let sequencer = TestSequencer::new(&self.inner.commands, address);
        self.step(address, "stop data write", sequencer.stop_data_write())
            .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Releases the transport; in-flight commands fail with
    /// [`Error::Cancelled`].
    pub fn close(&self) {
        self.inner.commands.clear_event_handler();
        self.inner.commands.close();
        debug!(port = %self.port(), "Dongle service closed");
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn require(&self, address: BtAddress) -> Result<Device> {
        self.device(address)
            .ok_or_else(|| Error::unknown_device(address))
    }

    fn push_result(&self, address: BtAddress, result: TestResult) -> Result<()> {
        {
            let mut registry = self.inner.registry.lock();
            let device = registry
                .connected
                .iter_mut()
                .find(|d| d.address() == address)
                .ok_or_else(|| Error::unknown_device(address))?;
            device.push_result(result);
        }

        self.inner
            .publish(DongleEvent::ResultRecorded { address, result });
        Ok(())
    }

    async fn dongle_command(&self, opcode: Opcode, step: &'static str) -> Result<Response> {
        let result = self
            .inner
            .commands
            .send_command(BtAddress::DONGLE, opcode, &[])
            .await
            .and_then(Response::ensure_ok);

        result.inspect_err(|e| self.inner.fail(BtAddress::DONGLE, step, e))
    }

    async fn step<T>(
        &self,
        address: BtAddress,
        step: &'static str,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        operation
            .await
            .inspect_err(|e| self.inner.fail(address, step, e))
    }
}

// ============================================================================
// Tests
// ============================================================================
