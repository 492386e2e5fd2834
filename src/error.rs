//! Error types for the dongle test client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use dongle_fleet::{Result, Error};
//!
//! async fn example(dongle: &DongleService, address: BtAddress) -> Result<()> {
//!     dongle.connect_device(address).await?;
//!     dongle.start_test(address, TestType::Uplink, 20).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Transport | [`Error::Transport`], [`Error::Serial`], [`Error::ConnectionClosed`] |
//! | Timeout | [`Error::RequestTimeout`], [`Error::AckTimeout`] |
//! | Protocol | [`Error::ProtocolDesync`], [`Error::CommandRejected`], [`Error::RequestPending`], [`Error::WaiterBusy`], [`Error::Protocol`] |
//! | Lookup | [`Error::UnknownDevice`], [`Error::DuplicateDevice`], [`Error::DongleNotFound`], [`Error::PortInUse`] |
//! | Lifecycle | [`Error::Cancelled`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::{BtAddress, PortId};
use crate::protocol::{DongleResponse, Opcode};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when fleet configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument for an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport open or write failed.
    ///
    /// The owning dongle is flagged `Error` and its transport is closed.
    #[error("Transport error on {port}: {message}")]
    Transport {
        /// Port the failure happened on.
        port: PortId,
        /// Description of the failure.
        message: String,
    },

    /// Serial port driver error.
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The transport closed while a request was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// No correlated response within the command window.
    #[error("Request to {address} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Target address of the request.
        address: BtAddress,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No asynchronous acknowledgement within the acknowledgement window.
    #[error("Acknowledgement from {address} timed out after {timeout_ms}ms")]
    AckTimeout {
        /// Address the acknowledgement was expected from.
        address: BtAddress,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Acknowledgement tag did not match the command it should acknowledge.
    #[error("Protocol desync on {address}: expected ack 0x{expected:02X}, got {actual}")]
    ProtocolDesync {
        /// Device address.
        address: BtAddress,
        /// Expected control tag.
        expected: u8,
        /// What arrived instead.
        actual: String,
    },

    /// Dongle answered with a non-OK response code.
    #[error("Command {opcode:?} for {address} rejected: {code:?}")]
    CommandRejected {
        /// Target address.
        address: BtAddress,
        /// Command opcode.
        opcode: Opcode,
        /// Response code reported by the dongle.
        code: DongleResponse,
    },

    /// A request for this address is already outstanding.
    #[error("Request already pending for {address}")]
    RequestPending {
        /// Target address.
        address: BtAddress,
    },

    /// A notification waiter for this address is already registered.
    #[error("Notification waiter already registered for {address}")]
    WaiterBusy {
        /// Target address.
        address: BtAddress,
    },

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Device is not tracked by the dongle.
    #[error("Unknown device: {address}")]
    UnknownDevice {
        /// The untracked address.
        address: BtAddress,
    },

    /// Device is already in the connected set.
    #[error("Device already connected: {address}")]
    DuplicateDevice {
        /// The duplicate address.
        address: BtAddress,
    },

    /// No dongle is claimed on this port.
    #[error("Dongle not found: {port}")]
    DongleNotFound {
        /// The missing port.
        port: PortId,
    },

    /// A dongle is already claimed on this port.
    #[error("Port already in use: {port}")]
    PortInUse {
        /// The busy port.
        port: PortId,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The command service was closed before the request resolved.
    #[error("Request cancelled")]
    Cancelled,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(port: PortId, message: impl Into<String>) -> Self {
        Self::Transport {
            port,
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(address: BtAddress, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            address,
            timeout_ms,
        }
    }

    /// Creates an acknowledgement timeout error.
    #[inline]
    pub fn ack_timeout(address: BtAddress, timeout_ms: u64) -> Self {
        Self::AckTimeout {
            address,
            timeout_ms,
        }
    }

    /// Creates a protocol desync error.
    #[inline]
    pub fn protocol_desync(address: BtAddress, expected: u8, actual: impl Into<String>) -> Self {
        Self::ProtocolDesync {
            address,
            expected,
            actual: actual.into(),
        }
    }

    /// Creates a command rejected error.
    #[inline]
    pub fn command_rejected(address: BtAddress, opcode: Opcode, code: DongleResponse) -> Self {
        Self::CommandRejected {
            address,
            opcode,
            code,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown device error.
    #[inline]
    pub fn unknown_device(address: BtAddress) -> Self {
        Self::UnknownDevice { address }
    }

    /// Creates a dongle not found error.
    #[inline]
    pub fn dongle_not_found(port: PortId) -> Self {
        Self::DongleNotFound { port }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. } | Self::AckTimeout { .. })
    }

    /// Returns `true` if the transport is gone or failed.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Serial(_) | Self::ConnectionClosed
        )
    }

    /// Returns `true` if the dongle or device broke protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::ProtocolDesync { .. }
                | Self::CommandRejected { .. }
                | Self::RequestPending { .. }
                | Self::WaiterBusy { .. }
                | Self::Protocol { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::AddressType;

    fn address() -> BtAddress {
        BtAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01], AddressType::Random)
    }

    #[test]
    fn test_error_display() {
        let err = Error::transport(PortId::new("COM7"), "write failed");
        assert_eq!(err.to_string(), "Transport error on COM7: write failed");
    }

    #[test]
    fn test_desync_display() {
        let err = Error::protocol_desync(address(), 0xFA, "0xFC");
        assert_eq!(
            err.to_string(),
            "Protocol desync on AA:BB:CC:DD:EE:01 (random): expected ack 0xFA, got 0xFC"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(address(), 500);
        let ack_err = Error::ack_timeout(address(), 5000);
        let other_err = Error::Cancelled;

        assert!(timeout_err.is_timeout());
        assert!(ack_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::ConnectionClosed.is_transport_error());
        assert!(Error::transport(PortId::new("COM1"), "gone").is_transport_error());
        assert!(!Error::config("test").is_transport_error());
    }

    #[test]
    fn test_is_protocol_error() {
        let rejected = Error::command_rejected(address(), Opcode::Connect, DongleResponse::CmdError);
        assert!(rejected.is_protocol_error());
        assert!(Error::WaiterBusy { address: address() }.is_protocol_error());
        assert!(!Error::request_timeout(address(), 500).is_protocol_error());
    }
}
