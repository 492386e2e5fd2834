//! Fleet coordination across dongles.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Fleet`] | Claimed dongles, discovery and campaign fan-outs |
//! | [`FleetBuilder`] | Port provider and discovery configuration |
//! | [`FanOutReport`] | Per-device outcome of a fleet-wide operation |
//! | [`CampaignReport`] | Serializable snapshot of all result histories |
//!
//! # Campaign
//!
//! ```text
//! start_tests ─► start_result_collection ─► start_data_write
//!                                                  │
//! stop_tests ◄── stop_result_collection ◄── stop_data_write
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fleet builder.
pub mod builder;

/// Fleet coordinator.
pub mod core;

/// Background port discovery.
pub mod discovery;

/// Fan-out and campaign reports.
pub mod report;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::FleetBuilder;
pub use core::Fleet;
pub use discovery::{DEFAULT_DISCOVERY_INTERVAL, Discovery};
pub use report::{CampaignReport, DeviceFailure, DongleReport, FanOutReport, Operation};
