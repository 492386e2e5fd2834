//! Dongle events for subscribers.
//!
//! Every state mutation in a [`DongleService`](super::DongleService) is
//! published on a broadcast channel. Subscribers that lag behind lose the
//! oldest events; the service never blocks on them.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::BtAddress;

use super::model::{Device, DeviceState, DongleState, TestResult};

// ============================================================================
// DongleEvent
// ============================================================================

/// Change notification from a dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DongleEvent {
    /// Dongle state changed.
    StateChanged(DongleState),

    /// A new peripheral was seen while scanning.
    DeviceScanned(Device),

    /// A peripheral entered the connected set.
    DeviceAdded(BtAddress),

    /// A peripheral left the connected set.
    DeviceRemoved(BtAddress),

    /// A peripheral changed state.
    DeviceStateChanged {
        /// Peripheral address.
        address: BtAddress,
        /// New state.
        state: DeviceState,
    },

    /// A peripheral was rebound to a new address by bonding.
    DeviceAddressChanged {
        /// Address before bonding.
        old: BtAddress,
        /// Address after bonding.
        new: BtAddress,
    },

    /// A result was appended to a peripheral's history.
    ResultRecorded {
        /// Peripheral address.
        address: BtAddress,
        /// The new result.
        result: TestResult,
    },
}
