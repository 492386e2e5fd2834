//! Background port discovery.
//!
//! Polls the [`PortProvider`] at a fixed interval and republishes the port
//! set on a `watch` channel, only when it changed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::PortId;
use crate::transport::PortProvider;

// ============================================================================
// Constants
// ============================================================================

/// Default polling interval.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// PortWatch
// ============================================================================

/// Port set shared between discovery and readers.
#[derive(Clone)]
pub(crate) struct PortWatch {
    provider: Arc<dyn PortProvider>,
    ports: Arc<watch::Sender<Vec<PortId>>>,
}

impl PortWatch {
    pub(crate) fn new(provider: Arc<dyn PortProvider>) -> Self {
        let (ports, _) = watch::channel(Vec::new());
        Self {
            provider,
            ports: Arc::new(ports),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn PortProvider> {
        &self.provider
    }

    pub(crate) fn current(&self) -> Vec<PortId> {
        self.ports.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Vec<PortId>> {
        self.ports.subscribe()
    }

    /// Lists ports once and publishes the set if it changed.
    ///
    /// Returns `true` if subscribers were notified.
    pub(crate) async fn refresh(&self) -> Result<bool> {
        let mut ports = self.provider.list().await?;
        ports.sort();

        let changed = self.ports.send_if_modified(|current| {
            if *current == ports {
                false
            } else {
                *current = ports;
                true
            }
        });

        if changed {
            debug!(ports = ?self.ports.borrow().as_slice(), "Port set changed");
        }
        Ok(changed)
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Handle to the discovery task. Dropping it stops discovery.
#[derive(Debug)]
pub struct Discovery {
    task: JoinHandle<()>,
}

impl Discovery {
    pub(crate) fn spawn(watch: PortWatch, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = watch.refresh().await {
                    warn!(error = %e, "Port listing failed");
                }
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "Port discovery started");
        Self { task }
    }

    /// Stops discovery.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns `true` once the task has stopped.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
