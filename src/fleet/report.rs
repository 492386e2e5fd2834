//! Fan-out outcomes and campaign reports.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::dongle::{Device, DongleService, DongleState};
use crate::error::{Error, Result};
use crate::identifiers::{BtAddress, PortId};

// ============================================================================
// Operation
// ============================================================================

/// Fleet-wide lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    /// Enter test mode and select the sub-mode.
    StartTests,
    /// Leave test mode.
    StopTests,
    /// Start measuring.
    StartResultCollection,
    /// Stop measuring and record results.
    StopResultCollection,
    /// Start streaming test data.
    StartDataWrite,
    /// Stop streaming test data.
    StopDataWrite,
}

// ============================================================================
// FanOutReport
// ============================================================================

/// A per-device failure inside a fan-out.
#[derive(Debug)]
pub struct DeviceFailure {
    /// Dongle port.
    pub port: PortId,
    /// Peripheral address.
    pub address: BtAddress,
    /// What went wrong.
    pub error: Error,
}

/// Outcome of one fleet-wide operation.
///
/// Every targeted device appears exactly once, in `succeeded` or `failed`.
#[derive(Debug)]
pub struct FanOutReport {
    /// The operation that ran.
    pub operation: Operation,
    /// Devices where the operation completed.
    pub succeeded: Vec<(PortId, BtAddress)>,
    /// Devices where it failed.
    pub failed: Vec<DeviceFailure>,
}

impl FanOutReport {
    pub(crate) fn new(
        operation: Operation,
        outcomes: impl IntoIterator<Item = (PortId, BtAddress, Result<()>)>,
    ) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (port, address, outcome) in outcomes {
            match outcome {
                Ok(()) => succeeded.push((port, address)),
                Err(error) => failed.push(DeviceFailure {
                    port,
                    address,
                    error,
                }),
            }
        }

        Self {
            operation,
            succeeded,
            failed,
        }
    }

    /// Number of devices targeted.
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns `true` if no device failed.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// CampaignReport
// ============================================================================

/// One dongle in a [`CampaignReport`].
#[derive(Debug, Clone, Serialize)]
pub struct DongleReport {
    /// Dongle port.
    pub port: PortId,
    /// Dongle state at report time.
    pub state: DongleState,
    /// Connected devices with their result histories.
    pub devices: Vec<Device>,
}

impl DongleReport {
    pub(crate) fn from_service(dongle: &DongleService) -> Self {
        Self {
            port: dongle.port().clone(),
            state: dongle.state(),
            devices: dongle.connected_devices(),
        }
    }
}

/// Snapshot of every dongle and device in the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    /// Dongles, ordered by port.
    pub dongles: Vec<DongleReport>,
}

impl CampaignReport {
    /// Total connected devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.dongles.iter().map(|d| d.devices.len()).sum()
    }

    /// Renders the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dongle::{TestResult, TestType};
    use crate::identifiers::AddressType;

    fn address(last: u8) -> BtAddress {
        BtAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last], AddressType::Random)
    }

    #[test]
    fn test_fan_out_report_partitions_outcomes() {
        let report = FanOutReport::new(
            Operation::StartTests,
            vec![
                (PortId::from("COM3"), address(1), Ok(())),
                (PortId::from("COM4"), address(2), Err(Error::Cancelled)),
            ],
        );

        assert_eq!(report.attempted(), 2);
        assert!(!report.is_success());
        assert_eq!(report.succeeded, vec![(PortId::from("COM3"), address(1))]);
        assert_eq!(report.failed[0].port, PortId::from("COM4"));
        assert!(matches!(report.failed[0].error, Error::Cancelled));
    }

    #[test]
    fn test_campaign_report_json() {
        let mut device = Device::new(address(1), Some("SN-1".to_owned()));
        device.set_test_plan(TestType::Uplink, 20);
        device.push_result(TestResult::measured(TestType::Uplink, 20, 2000));
        device.push_result(TestResult::idle());

        let report = CampaignReport {
            dongles: vec![DongleReport {
                port: PortId::from("COM3"),
                state: DongleState::Connected,
                devices: vec![device],
            }],
        };
        assert_eq!(report.device_count(), 1);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let device = &json["dongles"][0]["devices"][0];
        assert_eq!(json["dongles"][0]["port"], "COM3");
        assert_eq!(device["address"], "AA:BB:CC:DD:EE:01 (random)");
        assert_eq!(device["serial_number"], "SN-1");
        assert_eq!(device["results"][0]["throughput_bps"], 2000);
        assert!(device["results"][1]["throughput_bps"].is_null());
    }
}
