//! Command service: request correlation and event routing.
//!
//! The service spawns a tokio task that exclusively owns the transport and
//! handles:
//!
//! - Outgoing requests from the dongle layer
//! - Incoming frames from the dongle (responses, notifications, events)
//! - Request/response correlation by target address
//! - Notification waiters for asynchronous peripheral acknowledgements
//! - Event handler callbacks for everything else
//!
//! # Dispatch Order
//!
//! For every decoded frame:
//!
//! 1. A response resolves the pending request for its address.
//! 2. A notification resolves the registered waiter for its address.
//! 3. Anything else is classified by opcode and passed to the event handler.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BtAddress, PortId};
use crate::protocol::{Framer, Inbound, Notification, Opcode, ProtocolEvent, Request, Response};

use super::Transport;

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the dongle to reply to a command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// Time allowed for a peripheral to acknowledge a control command.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size for the transport.
const READ_BUFFER_SIZE: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// An outstanding request.
struct Pending {
    /// Sequence number, guards removal of a stale entry.
    id: u64,
    /// Opcode the response must echo.
    opcode: Opcode,
    /// Response channel.
    response_tx: oneshot::Sender<Result<Response>>,
}

/// A registered notification waiter.
struct Waiter {
    /// Sequence number, guards removal on drop.
    id: u64,
    /// Notification channel.
    notification_tx: oneshot::Sender<Notification>,
}

/// Map of target addresses to outstanding requests.
type CorrelationMap = FxHashMap<BtAddress, Pending>;

/// Map of peripheral addresses to notification waiters.
type WaiterMap = FxHashMap<BtAddress, Waiter>;

/// Event handler callback type.
///
/// Called on the event loop task for each unsolicited event.
pub type EventHandler = Box<dyn Fn(ProtocolEvent) + Send + Sync>;

/// State shared between handles and the event loop.
struct Shared {
    /// Outstanding requests.
    correlation: Mutex<CorrelationMap>,
    /// Registered notification waiters.
    waiters: Mutex<WaiterMap>,
    /// Event handler.
    event_handler: Mutex<Option<EventHandler>>,
    /// Sequence for requests and waiters.
    next_id: AtomicU64,
    /// Set once the event loop has stopped.
    closed: AtomicBool,
}

// ============================================================================
// ServiceCommand
// ============================================================================

/// Internal commands for the event loop.
enum ServiceCommand {
    /// Send a request and wait for its response.
    Send {
        request: Request,
        id: u64,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation { address: BtAddress, id: u64 },
    /// Release the transport.
    Shutdown,
}

// ============================================================================
// CommandService
// ============================================================================

/// Command service for one dongle.
///
/// Correlates outbound commands with inbound responses and notifications,
/// and raises events for unsolicited frames.
///
/// # Thread Safety
///
/// `CommandService` is `Send + Sync` and cheap to clone; clones share the
/// same event loop.
#[derive(Clone)]
pub struct CommandService {
    /// Port this service talks to.
    port: PortId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    /// Correlation tables and handler (shared with event loop).
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService")
            .field("port", &self.port)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl CommandService {
    /// Creates a command service that takes ownership of `transport`.
    ///
    /// Spawns the event loop task internally, so this must be called from
    /// within a tokio runtime.
    pub fn new<T: Transport>(port: PortId, transport: T) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            correlation: Mutex::new(CorrelationMap::default()),
            waiters: Mutex::new(WaiterMap::default()),
            event_handler: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Self::run_event_loop(
            port.clone(),
            transport,
            command_rx,
            Arc::clone(&shared),
        ));

        Self {
            port,
            command_tx,
            shared,
        }
    }

    /// Returns the port this service talks to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortId {
        &self.port
    }

    /// Sets the event handler callback.
    ///
    /// The handler runs on the event loop task; it must not block.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.shared.event_handler.lock() = Some(handler);
    }

    /// Clears the event handler.
    pub fn clear_event_handler(&self) {
        *self.shared.event_handler.lock() = None;
    }

    /// Sends a command and waits for the correlated response.
    ///
    /// The response code is returned as-is; use [`Response::ensure_ok`] to
    /// turn a rejection into an error.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response within [`COMMAND_TIMEOUT`]
    /// - [`Error::RequestPending`] if a request for `address` is outstanding
    /// - [`Error::Transport`] if the write fails
    /// - [`Error::Cancelled`] if the service closes first
    /// - [`Error::ConnectionClosed`] if the service is already closed
    pub async fn send_command(
        &self,
        address: BtAddress,
        opcode: Opcode,
        body: &[u8],
    ) -> Result<Response> {
        self.send(Request::new(opcode, address, body.to_vec())).await
    }

    /// Sends a prepared request and waits for the correlated response.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn send(&self, request: Request) -> Result<Response> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let address = request.address;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ServiceCommand::Send {
                request,
                id,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(COMMAND_TIMEOUT, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ServiceCommand::RemoveCorrelation { address, id });

                Err(Error::request_timeout(
                    address,
                    COMMAND_TIMEOUT.as_millis() as u64,
                ))
            }
        }
    }

    /// Registers a one-shot waiter for the next notification from `address`.
    ///
    /// Register before sending the command that triggers the notification so
    /// a fast acknowledgement cannot be missed.
    ///
    /// # Errors
    ///
    /// - [`Error::WaiterBusy`] if a waiter for `address` is already registered
    /// - [`Error::ConnectionClosed`] if the service is closed
    pub fn register_notification(&self, address: BtAddress) -> Result<NotificationWaiter> {
        let mut waiters = self.shared.waiters.lock();

        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        if waiters.contains_key(&address) {
            return Err(Error::WaiterBusy { address });
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (notification_tx, notification_rx) = oneshot::channel();
        waiters.insert(
            address,
            Waiter {
                id,
                notification_tx,
            },
        );

        trace!(%address, id, "Notification waiter registered");

        Ok(NotificationWaiter {
            address,
            id,
            notification_rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Waits for the next notification from `address`.
    ///
    /// # Errors
    ///
    /// See [`register_notification`](Self::register_notification) and
    /// [`NotificationWaiter::wait`].
    pub async fn wait_for_notification(&self, address: BtAddress) -> Result<Notification> {
        self.register_notification(address)?.wait().await
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.correlation.lock().len()
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Releases the transport.
    ///
    /// Outstanding requests and waiters resolve with [`Error::Cancelled`].
    pub fn close(&self) {
        let _ = self.command_tx.send(ServiceCommand::Shutdown);
    }
}

// ============================================================================
// CommandService - Event Loop
// ============================================================================

impl CommandService {
    /// Event loop that owns the transport.
    async fn run_event_loop<T: Transport>(
        port: PortId,
        transport: T,
        mut command_rx: mpsc::UnboundedReceiver<ServiceCommand>,
        shared: Arc<Shared>,
    ) {
        let (mut reader, mut writer) = tokio::io::split(transport);
        let mut framer = Framer::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        let closed_locally = loop {
            tokio::select! {
                // Bytes from the dongle
                read = reader.read(&mut buffer) => {
                    match read {
                        Ok(0) => {
                            debug!(port = %port, "Transport reached end of stream");
                            break false;
                        }

                        Ok(n) => {
                            for payload in framer.feed(&buffer[..n]) {
                                Self::handle_incoming_frame(&payload, &shared);
                            }
                        }

                        Err(e) => {
                            error!(port = %port, error = %e, "Transport read failed");
                            break false;
                        }
                    }
                }

                // Commands from the dongle layer
                command = command_rx.recv() => {
                    match command {
                        Some(ServiceCommand::Send { request, id, response_tx }) => {
                            let written = Self::handle_send_command(
                                &port,
                                request,
                                id,
                                response_tx,
                                &mut writer,
                                &shared,
                            ).await;

                            if !written {
                                break false;
                            }
                        }

                        Some(ServiceCommand::RemoveCorrelation { address, id }) => {
                            let mut correlation = shared.correlation.lock();
                            if correlation.get(&address).is_some_and(|p| p.id == id) {
                                correlation.remove(&address);
                                debug!(port = %port, %address, "Removed timed-out correlation");
                            }
                        }

                        Some(ServiceCommand::Shutdown) => {
                            debug!(port = %port, "Shutdown command received");
                            let _ = writer.shutdown().await;
                            break true;
                        }

                        None => {
                            debug!(port = %port, "Command channel closed");
                            break true;
                        }
                    }
                }
            }
        };

        Self::cancel_pending(&port, &shared);

        if !closed_locally {
            Self::emit_event(&shared, ProtocolEvent::TransportClosed);
        }

        if framer.dropped_frames() > 0 {
            debug!(port = %port, dropped = framer.dropped_frames(), "Malformed frames dropped");
        }

        debug!(port = %port, "Event loop terminated");
    }

    /// Routes one decoded payload.
    fn handle_incoming_frame(payload: &[u8], shared: &Shared) {
        let Some(inbound) = Inbound::decode(payload) else {
            warn!(len = payload.len(), "Dropped undecodable frame");
            return;
        };

        match inbound {
            Inbound::Response(response) => {
                let pending = {
                    let mut correlation = shared.correlation.lock();
                    let expected = correlation
                        .get(&response.address)
                        .is_some_and(|p| p.opcode == response.opcode);
                    if expected {
                        correlation.remove(&response.address)
                    } else {
                        None
                    }
                };

                match pending {
                    Some(pending) => {
                        let _ = pending.response_tx.send(Ok(response));
                    }
                    None => {
                        warn!(
                            address = %response.address,
                            opcode = ?response.opcode,
                            "Response for unknown request"
                        );
                    }
                }
            }

            Inbound::Notification(notification) => {
                let waiter = shared.waiters.lock().remove(&notification.address);

                match waiter {
                    Some(waiter) => {
                        let _ = waiter.notification_tx.send(notification);
                    }
                    None => {
                        debug!(address = %notification.address, "Notification without waiter");
                    }
                }
            }

            other => {
                if let Some(event) = ProtocolEvent::from_inbound(other) {
                    Self::emit_event(shared, event);
                }
            }
        }
    }

    /// Writes a request. Returns `false` if the transport failed.
    async fn handle_send_command<T: Transport>(
        port: &PortId,
        request: Request,
        id: u64,
        response_tx: oneshot::Sender<Result<Response>>,
        writer: &mut WriteHalf<T>,
        shared: &Shared,
    ) -> bool {
        let address = request.address;

        // Store correlation before sending
        {
            let mut correlation = shared.correlation.lock();
            if correlation.contains_key(&address) {
                let _ = response_tx.send(Err(Error::RequestPending { address }));
                return true;
            }
            correlation.insert(
                address,
                Pending {
                    id,
                    opcode: request.opcode,
                    response_tx,
                },
            );
        }

        let frame = request.to_frame();
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!(port = %port, %address, error = %e, "Transport write failed");
            if let Some(pending) = shared.correlation.lock().remove(&address) {
                let _ = pending
                    .response_tx
                    .send(Err(Error::transport(port.clone(), e.to_string())));
            }
            return false;
        }

        trace!(port = %port, %address, opcode = ?request.opcode, "Request sent");
        true
    }

    /// Calls the event handler, if any.
    fn emit_event(shared: &Shared, event: ProtocolEvent) {
        let handler = shared.event_handler.lock();
        if let Some(ref handler) = *handler {
            handler(event);
        }
    }

    /// Cancels all outstanding requests and waiters.
    fn cancel_pending(port: &PortId, shared: &Shared) {
        let waiters: Vec<_> = {
            let mut waiters = shared.waiters.lock();
            shared.closed.store(true, Ordering::Release);
            waiters.drain().collect()
        };

        let pending: Vec<_> = shared.correlation.lock().drain().collect();
        let count = pending.len() + waiters.len();

        for (_, pending) in pending {
            let _ = pending.response_tx.send(Err(Error::Cancelled));
        }

        // Dropping the senders resolves the waiters with Cancelled.
        drop(waiters);

        if count > 0 {
            debug!(port = %port, count, "Cancelled pending requests on shutdown");
        }
    }
}

// ============================================================================
// NotificationWaiter
// ============================================================================

/// One-shot registration for the next notification from an address.
///
/// Dropping an unresolved waiter releases its slot.
pub struct NotificationWaiter {
    address: BtAddress,
    id: u64,
    notification_rx: oneshot::Receiver<Notification>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NotificationWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationWaiter")
            .field("address", &self.address)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl NotificationWaiter {
    /// Address this waiter listens to.
    #[inline]
    #[must_use]
    pub fn address(&self) -> BtAddress {
        self.address
    }

    /// Waits for the notification.
    ///
    /// # Errors
    ///
    /// - [`Error::AckTimeout`] if nothing arrives within [`ACK_TIMEOUT`]
    /// - [`Error::Cancelled`] if the service closes first
    pub async fn wait(mut self) -> Result<Notification> {
        match timeout(ACK_TIMEOUT, &mut self.notification_rx).await {
            Ok(Ok(notification)) => Ok(notification),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(Error::ack_timeout(
                self.address,
                ACK_TIMEOUT.as_millis() as u64,
            )),
        }
    }
}

impl Drop for NotificationWaiter {
    fn drop(&mut self) {
        let mut waiters = self.shared.waiters.lock();
        if waiters.get(&self.address).is_some_and(|w| w.id == self.id) {
            waiters.remove(&self.address);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
