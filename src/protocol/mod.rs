//! Wire protocol between host and dongle.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Request`] | Host → Dongle | Command addressed to the dongle or a peripheral |
//! | [`Response`] | Dongle → Host | Direct reply, correlated by address |
//! | [`Notification`] | Dongle → Host | Peripheral acknowledgement of a control command |
//! | [`ProtocolEvent`] | Dongle → Host | Scan reports and link status changes |
//!
//! Every message is one COBS frame (see [`framer`]).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `framer` | COBS framing over a byte stream |
//! | `command` | Opcodes, control commands, response codes |
//! | `message` | Request / inbound frame layout |
//! | `event` | Unsolicited event classification |

// ============================================================================
// Submodules
// ============================================================================

/// Opcodes, control commands and response codes.
pub mod command;

/// Unsolicited event types.
pub mod event;

/// COBS byte framer.
pub mod framer;

/// Request and inbound message types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    ControlCommand, DataWriteType, DongleResponse, Opcode, ResultCollectionType, TestMode,
};
pub use event::ProtocolEvent;
pub use framer::Framer;
pub use message::{Inbound, Notification, Request, Response};
