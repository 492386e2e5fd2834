//! Builder pattern for fleet configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use dongle_fleet::Fleet;
//! use dongle_fleet::transport::SerialOptions;
//!
//! # async fn example() -> dongle_fleet::Result<()> {
//! let fleet = Fleet::builder()
//!     .serial_options(SerialOptions::new().with_baud_rate(115_200))
//!     .discovery_interval(Duration::from_millis(500))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{PortProvider, SerialOptions, SerialPortProvider};

use super::core::Fleet;
use super::discovery::DEFAULT_DISCOVERY_INTERVAL;

// ============================================================================
// FleetBuilder
// ============================================================================

/// Builder for a [`Fleet`].
///
/// Use [`Fleet::builder()`] to create one.
#[derive(Clone)]
pub struct FleetBuilder {
    /// Custom port provider; serial ports when unset.
    provider: Option<Arc<dyn PortProvider>>,
    /// Line settings for the default serial provider.
    serial: SerialOptions,
    /// Discovery polling interval; `None` disables discovery.
    discovery_interval: Option<Duration>,
}

impl Default for FleetBuilder {
    fn default() -> Self {
        Self {
            provider: None,
            serial: SerialOptions::default(),
            discovery_interval: Some(DEFAULT_DISCOVERY_INTERVAL),
        }
    }
}

impl std::fmt::Debug for FleetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetBuilder")
            .field("custom_provider", &self.provider.is_some())
            .field("serial", &self.serial)
            .field("discovery_interval", &self.discovery_interval)
            .finish()
    }
}

impl FleetBuilder {
    /// Creates a builder with serial ports and one-second discovery.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `provider` instead of the system's serial ports.
    #[inline]
    #[must_use]
    pub fn port_provider(mut self, provider: impl PortProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Sets serial line options. Ignored with a custom provider.
    #[inline]
    #[must_use]
    pub fn serial_options(mut self, options: SerialOptions) -> Self {
        self.serial = options;
        self
    }

    /// Sets the discovery polling interval.
    #[inline]
    #[must_use]
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = Some(interval);
        self
    }

    /// Disables background discovery; use [`Fleet::refresh_ports`] instead.
    #[inline]
    #[must_use]
    pub fn no_discovery(mut self) -> Self {
        self.discovery_interval = None;
        self
    }

    /// Builds the fleet and starts discovery.
    ///
    /// Must be called inside a Tokio runtime when discovery is enabled.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the discovery interval is zero.
    pub fn build(self) -> Result<Fleet> {
        if self.discovery_interval == Some(Duration::ZERO) {
            return Err(Error::config(
                "Discovery interval must be non-zero. Use .no_discovery() to disable it.",
            ));
        }

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(SerialPortProvider::new(self.serial)));

        Ok(Fleet::new(provider, self.discovery_interval))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mock::MockPortProvider;

    #[test]
    fn test_default_builder() {
        let builder = FleetBuilder::new();
        assert!(builder.provider.is_none());
        assert_eq!(builder.serial, SerialOptions::default());
        assert_eq!(builder.discovery_interval, Some(DEFAULT_DISCOVERY_INTERVAL));
    }

    #[test]
    fn test_zero_interval_is_config_error() {
        let err = FleetBuilder::new()
            .discovery_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("no_discovery"));
    }

    #[test]
    fn test_no_discovery_builds_outside_runtime() {
        let fleet = FleetBuilder::new()
            .port_provider(MockPortProvider::default())
            .no_discovery()
            .build()
            .unwrap();
        assert!(fleet.dongles().is_empty());
        assert!(!fleet.is_discovering());
    }

    #[tokio::test]
    async fn test_build_starts_discovery() {
        let fleet = FleetBuilder::new()
            .port_provider(MockPortProvider::new(&["COM3"]))
            .discovery_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        assert!(fleet.is_discovering());
        fleet.shutdown();
    }
}
