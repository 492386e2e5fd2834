//! Dongle Fleet - BLE RF throughput test client.
//!
//! This library drives a fleet of USB BLE dongles over serial links to run
//! RF throughput tests against connected peripherals.
//!
//! # Architecture
//!
//! - **Host (Rust)**: Sends framed commands, correlates replies, tracks state
//! - **Dongle (firmware)**: BLE central, relays commands to peripherals and
//!   reports scans, link status and acknowledgements
//!
//! Key design principles:
//!
//! - Each [`DongleService`] owns one transport and one command event loop
//! - Replies are correlated by target address, at most one in flight per address
//! - Control commands wait for the peripheral's tag acknowledgement
//! - Fleet operations fan out concurrently and never short-circuit
//!
//! # Quick Start
//!
//! ```no_run
//! use dongle_fleet::{Fleet, Result, TestType};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let fleet = Fleet::builder().no_discovery().build()?;
//!     fleet.refresh_ports().await?;
//!
//!     for port in fleet.available_ports() {
//!         let dongle = fleet.claim(port).await?;
//!         dongle.start_scan().await?;
//!     }
//!
//!     // ... connect devices and configure their tests ...
//!
//!     let report = fleet.start_tests().await;
//!     println!("{} of {} devices started", report.succeeded.len(), report.attempted());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dongle`] | Dongle service, device model, test sequencer |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`fleet`] | Fleet coordinator, discovery, reports |
//! | [`identifiers`] | Port and Bluetooth address types |
//! | [`protocol`] | Wire framing and message types |
//! | [`transport`] | Serial transport and command service |

// ============================================================================
// Modules
// ============================================================================

/// Dongle service, device model and test sequencer.
pub mod dongle;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Fleet coordination across dongles.
///
/// Use [`Fleet::builder()`] to create a configured fleet.
pub mod fleet;

/// Port and Bluetooth address types.
pub mod identifiers;

/// Wire framing and message types.
pub mod protocol;

/// Serial transport and command service.
pub mod transport;

#[cfg(test)]
mod mock;

// ============================================================================
// Re-exports
// ============================================================================

// Dongle types
pub use dongle::{
    Device, DeviceState, DongleEvent, DongleService, DongleState, TestResult, TestType,
};

// Error types
pub use error::{Error, Result};

// Fleet types
pub use fleet::{CampaignReport, FanOutReport, Fleet, FleetBuilder, Operation};

// Identifier types
pub use identifiers::{AddressType, BtAddress, PortId};

// Transport types
pub use transport::{PortProvider, SerialOptions, SerialPortProvider};
