//! Opcodes, control commands and response codes.
//!
//! These are firmware-fixed constants. Host-to-dongle opcodes occupy
//! `0x01..=0x09`, dongle-to-host opcodes `0x80..=0x83`.
//!
//! # Control Commands
//!
//! Test-mode control travels inside [`Opcode::WriteCtrl`] and is executed by
//! the peripheral itself, which acknowledges asynchronously with a
//! notification whose first byte echoes the control tag.
//!
//! | Tag | Command | Payload |
//! |-----|---------|---------|
//! | `0xFA` | Enter test mode | 6-byte placeholder address |
//! | `0xFC` | Select sub-mode | mode id [+ frame size for downlink] |
//! | `0xFE` | Exit test mode | none |

// ============================================================================
// Opcode
// ============================================================================

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Host -> dongle
    /// Start BLE scanning.
    StartScan,
    /// Stop BLE scanning.
    StopScan,
    /// Connect to a peripheral.
    Connect,
    /// Disconnect a peripheral.
    Disconnect,
    /// Write a control command to a peripheral.
    WriteCtrl,
    /// Start throughput result collection.
    StartResult,
    /// Stop result collection and return duration and byte count.
    StopResult,
    /// Start streaming test data to a peripheral.
    WriteData,
    /// Stop streaming test data.
    StopData,

    // Dongle -> host
    /// Direct reply to a command.
    Response,
    /// Unsolicited data from a peripheral (control acknowledgements).
    Notification,
    /// Peripheral link status change.
    DeviceStatus,
    /// Advertising report while scanning.
    DeviceScanned,
}

impl Opcode {
    /// Wire value.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::StartScan => 0x01,
            Self::StopScan => 0x02,
            Self::Connect => 0x03,
            Self::Disconnect => 0x04,
            Self::WriteCtrl => 0x05,
            Self::StartResult => 0x06,
            Self::StopResult => 0x07,
            Self::WriteData => 0x08,
            Self::StopData => 0x09,
            Self::Response => 0x80,
            Self::Notification => 0x81,
            Self::DeviceStatus => 0x82,
            Self::DeviceScanned => 0x83,
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::StartScan,
            0x02 => Self::StopScan,
            0x03 => Self::Connect,
            0x04 => Self::Disconnect,
            0x05 => Self::WriteCtrl,
            0x06 => Self::StartResult,
            0x07 => Self::StopResult,
            0x08 => Self::WriteData,
            0x09 => Self::StopData,
            0x80 => Self::Response,
            0x81 => Self::Notification,
            0x82 => Self::DeviceStatus,
            0x83 => Self::DeviceScanned,
            _ => return None,
        })
    }

    /// Returns `true` for opcodes the host sends.
    #[inline]
    #[must_use]
    pub const fn is_outbound(self) -> bool {
        self.to_byte() < 0x80
    }
}

// ============================================================================
// DongleResponse
// ============================================================================

/// Response code reported by the dongle, in command replies and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DongleResponse {
    /// Command accepted.
    CmdOk,
    /// Command failed.
    CmdError,
    /// Dongle busy, command not executed.
    CmdBusy,
    /// Link to the peripheral established.
    DeviceConnected,
    /// Link establishment failed.
    DeviceConnectFailed,
    /// Link lost or closed.
    DeviceDisconnected,
    /// Peripheral bonded, possibly under a new address.
    DeviceBonded,
    /// Notifications subscribed, peripheral ready.
    DeviceSubscribed,
    /// Code not known to this client.
    Unknown(u8),
}

impl DongleResponse {
    /// Wire value.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::CmdOk => 0x00,
            Self::CmdError => 0x01,
            Self::CmdBusy => 0x02,
            Self::DeviceConnected => 0x10,
            Self::DeviceConnectFailed => 0x11,
            Self::DeviceDisconnected => 0x12,
            Self::DeviceBonded => 0x13,
            Self::DeviceSubscribed => 0x14,
            Self::Unknown(byte) => byte,
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::CmdOk,
            0x01 => Self::CmdError,
            0x02 => Self::CmdBusy,
            0x10 => Self::DeviceConnected,
            0x11 => Self::DeviceConnectFailed,
            0x12 => Self::DeviceDisconnected,
            0x13 => Self::DeviceBonded,
            0x14 => Self::DeviceSubscribed,
            other => Self::Unknown(other),
        }
    }

    /// Returns `true` for [`DongleResponse::CmdOk`].
    #[inline]
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::CmdOk
    }
}

// ============================================================================
// Control Commands
// ============================================================================

/// Placeholder address sent with the enter-test-mode command.
pub const TEST_MODE_PLACEHOLDER: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

/// Test sub-mode selected on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestMode {
    /// Peripheral receives, dongle sends.
    Uplink,
    /// Both directions.
    Bidirectional,
    /// Peripheral sends, dongle receives.
    Downlink,
}

impl TestMode {
    /// Mode id carried in the select command.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Uplink => 0x00,
            Self::Bidirectional => 0x01,
            Self::Downlink => 0x02,
        }
    }
}

/// Control command written to a peripheral through [`Opcode::WriteCtrl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Enter RF test mode.
    EnterTestMode,
    /// Select a test sub-mode. Frame size applies to downlink only.
    SelectMode {
        /// Sub-mode.
        mode: TestMode,
        /// Frame size used by the peripheral when it transmits.
        frame_size: u8,
    },
    /// Leave test mode.
    ExitTestMode,
}

impl ControlCommand {
    /// Enter-test-mode tag.
    pub const ENTER_TAG: u8 = 0xFA;
    /// Select-mode tag.
    pub const SELECT_TAG: u8 = 0xFC;
    /// Exit-test-mode tag.
    pub const EXIT_TAG: u8 = 0xFE;

    /// Leading tag byte, echoed by the peripheral's acknowledgement.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::EnterTestMode => Self::ENTER_TAG,
            Self::SelectMode { .. } => Self::SELECT_TAG,
            Self::ExitTestMode => Self::EXIT_TAG,
        }
    }

    /// Encodes the command bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match *self {
            Self::EnterTestMode => out.extend_from_slice(&TEST_MODE_PLACEHOLDER),
            Self::SelectMode { mode, frame_size } => {
                out.push(mode.id());
                if mode == TestMode::Downlink {
                    out.push(frame_size);
                }
            }
            Self::ExitTestMode => {}
        }
        out
    }
}

// ============================================================================
// Result Collection / Data Write
// ============================================================================

/// Direction measured during result collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCollectionType {
    /// Count bytes the dongle transmits.
    Tx,
    /// Count bytes the dongle receives.
    Rx,
    /// Count both.
    Bidirectional,
}

impl ResultCollectionType {
    /// Wire value.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Tx => 0x00,
            Self::Rx => 0x01,
            Self::Bidirectional => 0x02,
        }
    }
}

/// Direction of dongle-originated test data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataWriteType {
    /// Dongle transmits only.
    Tx,
    /// Dongle transmits while also receiving.
    Bidirectional,
}

impl DataWriteType {
    /// Wire value.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Tx => 0x00,
            Self::Bidirectional => 0x01,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
