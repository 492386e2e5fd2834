//! Unsolicited protocol events.
//!
//! Frames that answer neither a pending request nor a registered
//! notification waiter are classified by opcode and raised as events.
//!
//! | Event | Source frame |
//! |-------|--------------|
//! | [`ProtocolEvent::DeviceScanned`] | `0x83` advertising report |
//! | [`ProtocolEvent::DeviceStatusChanged`] | `0x82` status change |
//! | [`ProtocolEvent::TransportClosed`] | link ended without a local close |

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::BtAddress;

use super::command::DongleResponse;
use super::message::Inbound;

// ============================================================================
// ProtocolEvent
// ============================================================================

/// Event raised by the command service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A peripheral advertised while scanning.
    DeviceScanned {
        /// Advertiser address.
        address: BtAddress,
        /// Raw serial-number advertising data.
        serial_info: Vec<u8>,
    },

    /// A peripheral's link status changed.
    DeviceStatusChanged {
        /// Peripheral address.
        address: BtAddress,
        /// Status code.
        code: DongleResponse,
        /// Address after bonding, if it changed.
        new_address: Option<BtAddress>,
    },

    /// The transport ended (EOF, read error or write error).
    TransportClosed,
}

impl ProtocolEvent {
    /// Classifies an inbound frame as an event.
    ///
    /// Responses and notifications are not events; they return `None`.
    #[must_use]
    pub fn from_inbound(inbound: Inbound) -> Option<Self> {
        match inbound {
            Inbound::Scanned {
                address,
                serial_info,
            } => Some(Self::DeviceScanned {
                address,
                serial_info,
            }),
            Inbound::Status {
                address,
                code,
                new_address,
            } => Some(Self::DeviceStatusChanged {
                address,
                code,
                new_address,
            }),
            Inbound::Response(_) | Inbound::Notification(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
