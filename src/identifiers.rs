//! Type-safe identifiers for dongles and devices.
//!
//! Newtype wrappers prevent mixing a port name with an arbitrary string
//! and carry the wire encoding of BLE addresses.
//!
//! | Type | Identifies | Wire size |
//! |------|------------|-----------|
//! | [`PortId`] | A dongle, by the transport it is attached to | - |
//! | [`BtAddress`] | A BLE peripheral (6 bytes + type) | 7 bytes |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Serialize, Serializer};

// ============================================================================
// PortId
// ============================================================================

/// Transport identifier, e.g. `COM7` or `/dev/ttyACM0`.
///
/// A dongle's identity is the port it was claimed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PortId(String);

impl PortId {
    /// Creates a port identifier.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the port name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PortId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

// ============================================================================
// AddressType
// ============================================================================

/// BLE address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Public device address.
    #[default]
    Public,
    /// Random device address.
    Random,
}

impl AddressType {
    /// Wire value (0 = public, 1 = random).
    #[inline]
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Random => 1,
        }
    }

    /// Parses the wire value. Anything other than 0 or 1 is invalid.
    #[inline]
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Public),
            1 => Some(Self::Random),
            _ => None,
        }
    }
}

// ============================================================================
// BtAddress
// ============================================================================

/// BLE peripheral address: six address bytes plus the address type.
///
/// Two addresses are equal only if both the bytes and the type match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BtAddress {
    bytes: [u8; 6],
    kind: AddressType,
}

impl BtAddress {
    /// Encoded size on the wire.
    pub const WIRE_LEN: usize = 7;

    /// Reserved target for dongle-level commands (scan start/stop).
    pub const DONGLE: Self = Self {
        bytes: [0; 6],
        kind: AddressType::Public,
    };

    /// Creates an address.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 6], kind: AddressType) -> Self {
        Self { bytes, kind }
    }

    /// Returns the six address bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> [u8; 6] {
        self.bytes
    }

    /// Returns the address type.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> AddressType {
        self.kind
    }

    /// Returns `true` for the reserved dongle-level target.
    #[inline]
    #[must_use]
    pub fn is_dongle(&self) -> bool {
        *self == Self::DONGLE
    }

    /// Encodes as 6 address bytes followed by the type byte.
    #[must_use]
    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..6].copy_from_slice(&self.bytes);
        out[6] = self.kind.to_byte();
        out
    }

    /// Decodes the first 7 bytes of `data`.
    ///
    /// Returns `None` if `data` is too short or the type byte is invalid.
    #[must_use]
    pub fn from_wire(data: &[u8]) -> Option<Self> {
        let wire = data.get(..Self::WIRE_LEN)?;
        let kind = AddressType::from_byte(wire[6])?;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&wire[..6]);
        Some(Self { bytes, kind })
    }
}

impl fmt::Display for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        let kind = match self.kind {
            AddressType::Public => "public",
            AddressType::Random => "random",
        };
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({kind})",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BtAddress({self})")
    }
}

impl Serialize for BtAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let address = BtAddress::new([1, 2, 3, 4, 5, 6], AddressType::Random);
        assert_eq!(address.to_wire(), [1, 2, 3, 4, 5, 6, 1]);
        assert_eq!(BtAddress::from_wire(&[1, 2, 3, 4, 5, 6, 1, 0xFF]), Some(address));
    }

    #[test]
    fn test_from_wire_rejects_short_or_bad_type() {
        assert_eq!(BtAddress::from_wire(&[1, 2, 3]), None);
        assert_eq!(BtAddress::from_wire(&[1, 2, 3, 4, 5, 6, 9]), None);
    }

    #[test]
    fn test_type_is_part_of_identity() {
        let public = BtAddress::new([9; 6], AddressType::Public);
        let random = BtAddress::new([9; 6], AddressType::Random);
        assert_ne!(public, random);
    }

    #[test]
    fn test_display() {
        let address = BtAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x10, 0x0A], AddressType::Public);
        assert_eq!(address.to_string(), "C0:FF:EE:00:10:0A (public)");
    }

    #[test]
    fn test_dongle_target() {
        assert!(BtAddress::DONGLE.is_dongle());
        assert!(!BtAddress::new([1; 6], AddressType::Public).is_dongle());
    }

    #[test]
    fn test_port_id_display() {
        let port = PortId::from("/dev/ttyACM0");
        assert_eq!(port.to_string(), "/dev/ttyACM0");
        assert_eq!(port.as_str(), "/dev/ttyACM0");
    }
}
