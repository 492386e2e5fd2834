//! Dongle and device entities.
//!
//! Entities handed out by the service are snapshots; the service owns the
//! live copies and is the only writer.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::identifiers::BtAddress;
use crate::protocol::{DataWriteType, ResultCollectionType, TestMode};

// ============================================================================
// Constants
// ============================================================================

/// Default test frame size: payload of a 23-byte ATT MTU.
pub const DEFAULT_FRAME_SIZE: u8 = 20;

// ============================================================================
// DongleState
// ============================================================================

/// Dongle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DongleState {
    /// Transport claimed, idle.
    #[default]
    Connected,
    /// Scanning for peripherals.
    Scanning,
    /// A command failed or the transport dropped.
    Error,
}

// ============================================================================
// DeviceState
// ============================================================================

/// Peripheral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DeviceState {
    /// No link.
    #[default]
    Disconnected,
    /// Connect command issued.
    Connecting,
    /// Link up and subscribed.
    Connected,
    /// Disconnect command accepted.
    Disconnecting,
    /// In RF test mode, no sub-mode yet.
    TestMode,
    /// Uplink test running.
    UplinkTest,
    /// Downlink test running.
    DownlinkTest,
    /// Bidirectional test running.
    BidirectionalTest,
}

// ============================================================================
// TestType
// ============================================================================

/// Test planned for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum TestType {
    /// Not part of the campaign.
    #[default]
    Idle,
    /// Dongle sends, peripheral receives.
    Uplink,
    /// Peripheral sends, dongle receives.
    Downlink,
    /// Both directions.
    Bidirectional,
}

impl TestType {
    /// Returns `true` for [`TestType::Idle`].
    #[inline]
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    /// Returns `true` if the dongle streams test data for this test.
    ///
    /// Downlink is excluded: the dongle is the receiver there.
    #[inline]
    #[must_use]
    pub fn writes_data(self) -> bool {
        matches!(self, Self::Uplink | Self::Bidirectional)
    }

    /// Sub-mode selected on the peripheral.
    #[must_use]
    pub fn test_mode(self) -> Option<TestMode> {
        match self {
            Self::Idle => None,
            Self::Uplink => Some(TestMode::Uplink),
            Self::Downlink => Some(TestMode::Downlink),
            Self::Bidirectional => Some(TestMode::Bidirectional),
        }
    }

    /// Device state once the sub-mode is active.
    #[must_use]
    pub fn running_state(self) -> Option<DeviceState> {
        match self {
            Self::Idle => None,
            Self::Uplink => Some(DeviceState::UplinkTest),
            Self::Downlink => Some(DeviceState::DownlinkTest),
            Self::Bidirectional => Some(DeviceState::BidirectionalTest),
        }
    }

    /// Direction measured during result collection.
    #[must_use]
    pub fn collection_type(self) -> Option<ResultCollectionType> {
        match self {
            Self::Idle => None,
            Self::Uplink => Some(ResultCollectionType::Tx),
            Self::Downlink => Some(ResultCollectionType::Rx),
            Self::Bidirectional => Some(ResultCollectionType::Bidirectional),
        }
    }

    /// Data-write direction, `None` where the dongle does not stream.
    #[must_use]
    pub fn data_write_type(self) -> Option<DataWriteType> {
        match self {
            Self::Uplink => Some(DataWriteType::Tx),
            Self::Bidirectional => Some(DataWriteType::Bidirectional),
            Self::Idle | Self::Downlink => None,
        }
    }
}

// ============================================================================
// TestResult
// ============================================================================

/// One result-collection cycle for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Test that ran.
    pub test_type: TestType,
    /// Frame size used.
    pub frame_size: u8,
    /// Measured throughput in bytes per second; `None` for the idle marker.
    pub throughput_bps: Option<u32>,
}

impl TestResult {
    /// Creates a measured result.
    #[inline]
    #[must_use]
    pub fn measured(test_type: TestType, frame_size: u8, throughput_bps: u32) -> Self {
        Self {
            test_type,
            frame_size,
            throughput_bps: Some(throughput_bps),
        }
    }

    /// Creates the marker for a cycle the peripheral sat out.
    #[inline]
    #[must_use]
    pub fn idle() -> Self {
        Self {
            test_type: TestType::Idle,
            frame_size: 0,
            throughput_bps: None,
        }
    }

    /// Returns `true` for the idle marker.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.throughput_bps.is_none()
    }
}

/// Throughput from a measurement: `bytes / (duration_ms / 1000)`.
///
/// Integer arithmetic throughout. A measurement shorter than one second has
/// no whole-second duration and yields 0.
#[inline]
#[must_use]
pub fn throughput_bps(duration_ms: u32, bytes: u32) -> u32 {
    bytes.checked_div(duration_ms / 1000).unwrap_or(0)
}

// ============================================================================
// Device
// ============================================================================

/// A BLE peripheral under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    address: BtAddress,
    serial_number: Option<String>,
    state: DeviceState,
    test_type: TestType,
    frame_size: u8,
    results: Vec<TestResult>,
}

impl Device {
    /// Creates an unconnected, idle device.
    #[must_use]
    pub fn new(address: BtAddress, serial_number: Option<String>) -> Self {
        Self {
            address,
            serial_number,
            state: DeviceState::Disconnected,
            test_type: TestType::Idle,
            frame_size: DEFAULT_FRAME_SIZE,
            results: Vec::new(),
        }
    }

    /// Current address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> BtAddress {
        self.address
    }

    /// Serial number decoded from advertising data.
    #[inline]
    #[must_use]
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Planned test.
    #[inline]
    #[must_use]
    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Test frame size.
    #[inline]
    #[must_use]
    pub fn frame_size(&self) -> u8 {
        self.frame_size
    }

    /// Result history, oldest first.
    #[inline]
    #[must_use]
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub(crate) fn set_address(&mut self, address: BtAddress) {
        self.address = address;
    }

    pub(crate) fn set_state(&mut self, state: DeviceState) {
        self.state = state;
    }

    pub(crate) fn set_test_plan(&mut self, test_type: TestType, frame_size: u8) {
        self.test_type = test_type;
        self.frame_size = frame_size;
    }

    pub(crate) fn push_result(&mut self, result: TestResult) {
        self.results.push(result);
    }
}

// ============================================================================
// Serial Number Decoding
// ============================================================================

/// Decodes the serial number carried in advertising data.
///
/// Trailing NUL padding is stripped. Printable ASCII is taken as-is,
/// anything else is rendered as uppercase hex. Empty data has no serial.
#[must_use]
pub fn decode_serial_number(raw: &[u8]) -> Option<String> {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let raw = &raw[..end];

    if raw.is_empty() {
        return None;
    }

    if raw.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        let text = String::from_utf8_lossy(raw).trim().to_owned();
        return (!text.is_empty()).then_some(text);
    }

    Some(raw.iter().map(|b| format!("{b:02X}")).collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::AddressType;

    #[test]
    fn test_throughput_formula() {
        assert_eq!(throughput_bps(2000, 4000), 2000);
        assert_eq!(throughput_bps(2999, 4000), 2000);
        assert_eq!(throughput_bps(10_000, 1_000_000), 100_000);
    }

    #[test]
    fn test_throughput_without_whole_second_is_zero() {
        assert_eq!(throughput_bps(0, 4000), 0);
        assert_eq!(throughput_bps(999, 4000), 0);
    }

    #[test]
    fn test_type_mappings() {
        assert_eq!(TestType::Uplink.collection_type(), Some(ResultCollectionType::Tx));
        assert_eq!(TestType::Downlink.collection_type(), Some(ResultCollectionType::Rx));
        assert_eq!(
            TestType::Bidirectional.collection_type(),
            Some(ResultCollectionType::Bidirectional)
        );
        assert_eq!(TestType::Idle.collection_type(), None);

        assert!(TestType::Uplink.writes_data());
        assert!(TestType::Bidirectional.writes_data());
        assert!(!TestType::Downlink.writes_data());
        assert!(!TestType::Idle.writes_data());

        assert_eq!(TestType::Downlink.running_state(), Some(DeviceState::DownlinkTest));
    }

    #[test]
    fn test_new_device_defaults() {
        let device = Device::new(BtAddress::new([1; 6], AddressType::Public), None);
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert_eq!(device.test_type(), TestType::Idle);
        assert_eq!(device.frame_size(), DEFAULT_FRAME_SIZE);
        assert!(device.results().is_empty());
    }

    #[test]
    fn test_idle_marker() {
        let marker = TestResult::idle();
        assert!(marker.is_idle());
        assert!(!TestResult::measured(TestType::Uplink, 20, 0).is_idle());
    }

    #[test]
    fn test_decode_serial_number() {
        assert_eq!(decode_serial_number(b"RF-0042\0\0"), Some("RF-0042".to_owned()));
        assert_eq!(decode_serial_number(&[0x01, 0xAB]), Some("01AB".to_owned()));
        assert_eq!(decode_serial_number(&[0, 0]), None);
        assert_eq!(decode_serial_number(&[]), None);
        assert_eq!(decode_serial_number(b"  \0"), None);
    }
}
