//! Request and inbound message types.
//!
//! Every frame payload starts with the same header:
//!
//! ```text
//! ┌────────┬────────────────────┬──────┬──────────┐
//! │ opcode │ address (6 bytes)  │ type │ body ... │
//! └────────┴────────────────────┴──────┴──────────┘
//! ```
//!
//! The address tags the frame to a peripheral, or to the dongle itself via
//! [`BtAddress::DONGLE`].

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::identifiers::BtAddress;

use super::command::{DongleResponse, Opcode};
use super::framer;

// ============================================================================
// Constants
// ============================================================================

/// Opcode byte plus encoded address.
pub const HEADER_LEN: usize = 1 + BtAddress::WIRE_LEN;

/// Byte length of the stop-result body (duration + byte count).
pub const RESULT_DATA_LEN: usize = 8;

// ============================================================================
// Request
// ============================================================================

/// A command from host to dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command opcode.
    pub opcode: Opcode,
    /// Target address, correlation key of the reply.
    pub address: BtAddress,
    /// Opcode-specific body.
    pub body: Vec<u8>,
}

impl Request {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(opcode: Opcode, address: BtAddress, body: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            address,
            body: body.into(),
        }
    }

    /// Encodes the unframed payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.push(self.opcode.to_byte());
        out.extend_from_slice(&self.address.to_wire());
        out.extend_from_slice(&self.body);
        out
    }

    /// Encodes and frames the request for the wire.
    #[inline]
    #[must_use]
    pub fn to_frame(&self) -> Vec<u8> {
        framer::encode(&self.encode())
    }
}

// ============================================================================
// Response
// ============================================================================

/// Direct reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Address the reply is tagged to.
    pub address: BtAddress,
    /// Opcode of the request being answered.
    pub opcode: Opcode,
    /// Dongle response code.
    pub code: DongleResponse,
    /// Trailing data (stop-result measurements).
    pub data: Vec<u8>,
}

impl Response {
    /// Returns `true` if the dongle accepted the command.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Fails with [`Error::CommandRejected`] unless the code is `CmdOk`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandRejected`] for any non-OK code.
    pub fn ensure_ok(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::command_rejected(self.address, self.opcode, self.code))
        }
    }

    /// Parses stop-result data: little-endian duration in ms, then byte count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if fewer than 8 bytes are present.
    pub fn result_measurement(&self) -> Result<(u32, u32)> {
        let data = self.data.get(..RESULT_DATA_LEN).ok_or_else(|| {
            Error::protocol(format!(
                "Result data too short: {} bytes, need {RESULT_DATA_LEN}",
                self.data.len()
            ))
        })?;

        let duration_ms = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let bytes = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        Ok((duration_ms, bytes))
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Unsolicited data from a peripheral, distinct from a direct reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Peripheral address.
    pub address: BtAddress,
    /// Raw notification data; the first byte is the acknowledged tag.
    pub data: Vec<u8>,
}

impl Notification {
    /// First byte of the data, if any.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// A decoded dongle-to-host frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Command reply.
    Response(Response),
    /// Peripheral notification.
    Notification(Notification),
    /// Peripheral status change.
    Status {
        /// Peripheral address.
        address: BtAddress,
        /// Status code.
        code: DongleResponse,
        /// New address after bonding.
        new_address: Option<BtAddress>,
    },
    /// Advertising report.
    Scanned {
        /// Advertiser address.
        address: BtAddress,
        /// Raw serial-number advertising data.
        serial_info: Vec<u8>,
    },
}

impl Inbound {
    /// Decodes a payload.
    ///
    /// Returns `None` for short payloads, unknown or host-side opcodes, and
    /// bodies that do not fit their opcode.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let (&opcode, rest) = payload.split_first()?;
        let opcode = Opcode::from_byte(opcode)?;
        let address = BtAddress::from_wire(rest)?;
        let body = &rest[BtAddress::WIRE_LEN..];

        match opcode {
            Opcode::Response => {
                let (&echoed, body) = body.split_first()?;
                let (&code, data) = body.split_first()?;
                Some(Self::Response(Response {
                    address,
                    opcode: Opcode::from_byte(echoed)?,
                    code: DongleResponse::from_byte(code),
                    data: data.to_vec(),
                }))
            }
            Opcode::Notification => Some(Self::Notification(Notification {
                address,
                data: body.to_vec(),
            })),
            Opcode::DeviceStatus => {
                let (&code, rest) = body.split_first()?;
                let new_address = if rest.is_empty() {
                    None
                } else {
                    Some(BtAddress::from_wire(rest)?)
                };
                Some(Self::Status {
                    address,
                    code: DongleResponse::from_byte(code),
                    new_address,
                })
            }
            Opcode::DeviceScanned => Some(Self::Scanned {
                address,
                serial_info: body.to_vec(),
            }),
            _ => None,
        }
    }

    /// Address the frame is tagged to.
    #[must_use]
    pub fn address(&self) -> BtAddress {
        match self {
            Self::Response(response) => response.address,
            Self::Notification(notification) => notification.address,
            Self::Status { address, .. } | Self::Scanned { address, .. } => *address,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::AddressType;

    fn device() -> BtAddress {
        BtAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60], AddressType::Random)
    }

    fn header(opcode: u8, address: BtAddress) -> Vec<u8> {
        let mut out = vec![opcode];
        out.extend_from_slice(&address.to_wire());
        out
    }

    #[test]
    fn test_request_layout() {
        let request = Request::new(Opcode::WriteCtrl, device(), vec![0xFE]);
        assert_eq!(
            request.encode(),
            vec![0x05, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x01, 0xFE]
        );
        assert_eq!(*request.to_frame().last().unwrap(), 0x00);
    }

    #[test]
    fn test_decode_response_with_result_data() {
        let mut payload = header(0x80, device());
        payload.extend_from_slice(&[0x07, 0x00]);
        payload.extend_from_slice(&2000u32.to_le_bytes());
        payload.extend_from_slice(&4000u32.to_le_bytes());

        let Some(Inbound::Response(response)) = Inbound::decode(&payload) else {
            panic!("expected response");
        };
        assert_eq!(response.opcode, Opcode::StopResult);
        assert!(response.is_ok());
        assert_eq!(response.result_measurement().unwrap(), (2000, 4000));
    }

    #[test]
    fn test_short_result_data_is_protocol_error() {
        let response = Response {
            address: device(),
            opcode: Opcode::StopResult,
            code: DongleResponse::CmdOk,
            data: vec![1, 2, 3],
        };
        assert!(matches!(response.result_measurement(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_ensure_ok_rejects_error_code() {
        let response = Response {
            address: device(),
            opcode: Opcode::Connect,
            code: DongleResponse::CmdError,
            data: Vec::new(),
        };
        assert!(matches!(
            response.ensure_ok(),
            Err(Error::CommandRejected {
                code: DongleResponse::CmdError,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_status_with_bond_address() {
        let bonded = BtAddress::new([1, 1, 1, 1, 1, 1], AddressType::Public);
        let mut payload = header(0x82, device());
        payload.push(0x13);
        payload.extend_from_slice(&bonded.to_wire());

        assert_eq!(
            Inbound::decode(&payload),
            Some(Inbound::Status {
                address: device(),
                code: DongleResponse::DeviceBonded,
                new_address: Some(bonded),
            })
        );
    }

    #[test]
    fn test_decode_notification_and_scan() {
        let mut notification = header(0x81, device());
        notification.push(0xFA);
        let decoded = Inbound::decode(&notification).unwrap();
        assert_eq!(decoded.address(), device());
        assert!(matches!(decoded, Inbound::Notification(ref n) if n.tag() == Some(0xFA)));

        let mut scanned = header(0x83, device());
        scanned.extend_from_slice(b"SN123");
        assert_eq!(
            Inbound::decode(&scanned),
            Some(Inbound::Scanned {
                address: device(),
                serial_info: b"SN123".to_vec(),
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Inbound::decode(&[]), None);
        assert_eq!(Inbound::decode(&[0x80, 1, 2]), None);
        assert_eq!(Inbound::decode(&header(0x03, device())), None);
        assert_eq!(Inbound::decode(&header(0x80, device())), None);
    }
}
