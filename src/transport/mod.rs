//! Transport layer.
//!
//! This module owns the byte channel to each dongle and the command service
//! that multiplexes requests, acknowledgements and events over it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌──────────────────┐
//! │  DongleService   │                           │  Dongle firmware │
//! │                  │      serial / COBS        │                  │
//! │  CommandService  │◄─────────────────────────►│  BLE central     │
//! │  (event loop)    │      115200 8N1           │  → peripherals   │
//! └──────────────────┘                           └──────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. [`PortProvider::open`] - Open the transport for a port
//! 2. [`CommandService::new`] - Spawn the event loop, which owns the transport
//! 3. [`CommandService::send_command`] / [`CommandService::register_notification`]
//! 4. [`CommandService::close`] - Release the transport, cancel pending work
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command_service` | Correlation of requests, acknowledgements and events |
//! | `serial` | Serial port provider built on `tokio-serial` |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::identifiers::PortId;

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation and event routing.
pub mod command_service;

/// Serial port transport provider.
pub mod serial;

// ============================================================================
// Re-exports
// ============================================================================

pub use command_service::{
    ACK_TIMEOUT, COMMAND_TIMEOUT, CommandService, EventHandler, NotificationWaiter,
};
pub use serial::{SerialOptions, SerialPortProvider};

// ============================================================================
// Transport
// ============================================================================

/// Duplex raw byte channel to a dongle.
///
/// No frame alignment is guaranteed on reads. Implemented for every
/// `AsyncRead + AsyncWrite` stream, e.g. a serial stream or an in-memory
/// duplex pipe.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

// ============================================================================
// PortProvider
// ============================================================================

/// Source of transports: enumerates ports and opens them.
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Lists currently available ports, sorted.
    async fn list(&self) -> Result<Vec<PortId>>;

    /// Opens the transport on `port`.
    async fn open(&self, port: &PortId) -> Result<BoxedTransport>;
}
