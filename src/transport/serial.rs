//! Serial port provider.
//!
//! Dongles enumerate as USB CDC serial ports and talk 115200 baud, 8N1,
//! without flow control. The firmware expects RTS and DTR asserted.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, StopBits};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::{BoxedTransport, PortProvider};

// ============================================================================
// SerialOptions
// ============================================================================

/// Serial line settings used when opening a dongle port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    /// Baud rate.
    pub baud_rate: u32,

    /// Assert RTS after opening.
    pub rts: bool,

    /// Assert DTR after opening.
    pub dtr: bool,
}

impl SerialOptions {
    /// Default dongle settings: 115200 baud, RTS and DTR asserted.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            baud_rate: 115_200,
            rts: true,
            dtr: true,
        }
    }

    /// Sets the baud rate.
    #[inline]
    #[must_use]
    pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets RTS.
    #[inline]
    #[must_use]
    pub const fn with_rts(mut self, rts: bool) -> Self {
        self.rts = rts;
        self
    }

    /// Sets DTR.
    #[inline]
    #[must_use]
    pub const fn with_dtr(mut self, dtr: bool) -> Self {
        self.dtr = dtr;
        self
    }
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SerialPortProvider
// ============================================================================

/// [`PortProvider`] backed by the system's serial ports.
#[derive(Debug, Clone, Default)]
pub struct SerialPortProvider {
    options: SerialOptions,
}

impl SerialPortProvider {
    /// Creates a provider with the given line settings.
    #[inline]
    #[must_use]
    pub fn new(options: SerialOptions) -> Self {
        Self { options }
    }

    /// Returns the line settings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> SerialOptions {
        self.options
    }
}

#[async_trait]
impl PortProvider for SerialPortProvider {
    async fn list(&self) -> Result<Vec<PortId>> {
        let mut ports: Vec<PortId> = tokio_serial::available_ports()?
            .into_iter()
            .map(|info| PortId::new(info.port_name))
            .collect();
        ports.sort();
        Ok(ports)
    }

    async fn open(&self, port: &PortId) -> Result<BoxedTransport> {
        let mut stream = tokio_serial::new(port.as_str(), self.options.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::transport(port.clone(), e.to_string()))?;

        stream
            .write_request_to_send(self.options.rts)
            .map_err(|e| Error::transport(port.clone(), e.to_string()))?;
        stream
            .write_data_terminal_ready(self.options.dtr)
            .map_err(|e| Error::transport(port.clone(), e.to_string()))?;

        debug!(port = %port, baud = self.options.baud_rate, "Serial port opened");

        Ok(Box::new(stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
