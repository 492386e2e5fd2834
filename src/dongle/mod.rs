//! Dongle entities and per-dongle service.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DongleService`] | One claimed dongle: state, device lists, operations |
//! | [`TestSequencer`] | Ordered test commands for one peripheral |
//! | [`Device`] | Peripheral snapshot with result history |
//! | [`DongleEvent`] | State change published to subscribers |
//!
//! # Device Lifecycle
//!
//! ```text
//! Disconnected ─connect─► Connecting ─SUBSCRIBED─► Connected
//!                                                   │  ▲
//!                                       enter (FA)  │  │ exit (FE)
//!                                                   ▼  │
//!                        TestMode ─select (FC)─► Uplink / Downlink / Bidirectional
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Dongle events.
pub mod event;

/// Dongle and device entities.
pub mod model;

/// Per-peripheral command sequences.
pub mod sequencer;

/// Dongle service.
pub mod service;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::DongleEvent;
pub use model::{
    DEFAULT_FRAME_SIZE, Device, DeviceState, DongleState, TestResult, TestType,
    decode_serial_number, throughput_bps,
};
pub use sequencer::{Measurement, TestSequencer};
pub use service::DongleService;
