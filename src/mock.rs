//! In-memory dongle firmware for tests.
//!
//! [`MockDongle`] sits on the far end of a `tokio::io::duplex` pipe and
//! answers framed requests the way the firmware does: a reply for every
//! command, a tag acknowledgement for control writes, link status after
//! connect and disconnect. Behavior can be scripted per address and opcode.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::{BtAddress, PortId};
use crate::protocol::{DongleResponse, Framer, Opcode, Request, framer};
use crate::transport::{BoxedTransport, PortProvider};

// ============================================================================
// Frame Helpers
// ============================================================================

/// Frames a dongle-to-host payload.
pub(crate) fn frame(opcode: Opcode, address: BtAddress, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![opcode.to_byte()];
    payload.extend_from_slice(&address.to_wire());
    payload.extend_from_slice(body);
    framer::encode(&payload)
}

fn parse_request(payload: &[u8]) -> Option<Request> {
    let (&opcode, rest) = payload.split_first()?;
    let opcode = Opcode::from_byte(opcode).filter(|op| op.is_outbound())?;
    let address = BtAddress::from_wire(rest)?;
    Some(Request::new(
        opcode,
        address,
        &rest[BtAddress::WIRE_LEN..],
    ))
}

// ============================================================================
// Script
// ============================================================================

struct Script {
    rejected: FxHashSet<(BtAddress, Opcode)>,
    silent: FxHashSet<Opcode>,
    ack_overrides: FxHashMap<BtAddress, u8>,
    /// Acknowledgement tags kept back until released.
    held_acks: FxHashSet<u8>,
    withheld: Vec<Vec<u8>>,
    measurement: (u32, u32),
    link_status: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            rejected: FxHashSet::default(),
            silent: FxHashSet::default(),
            ack_overrides: FxHashMap::default(),
            held_acks: FxHashSet::default(),
            withheld: Vec::new(),
            measurement: (2000, 4000),
            link_status: true,
        }
    }
}

impl Script {
    fn reply(&mut self, request: &Request) -> Vec<Vec<u8>> {
        if self.silent.contains(&request.opcode) {
            return Vec::new();
        }

        let address = request.address;
        let accepted = !self.rejected.contains(&(address, request.opcode));
        let code = if accepted {
            DongleResponse::CmdOk
        } else {
            DongleResponse::CmdError
        };

        let mut body = vec![request.opcode.to_byte(), code.to_byte()];
        if accepted && request.opcode == Opcode::StopResult {
            body.extend_from_slice(&self.measurement.0.to_le_bytes());
            body.extend_from_slice(&self.measurement.1.to_le_bytes());
        }

        let mut frames = vec![frame(Opcode::Response, address, &body)];
        if !accepted {
            return frames;
        }

        match request.opcode {
            Opcode::WriteCtrl => {
                let tag = self
                    .ack_overrides
                    .get(&address)
                    .copied()
                    .or_else(|| request.body.first().copied());
                if let Some(tag) = tag {
                    let ack = frame(Opcode::Notification, address, &[tag]);
                    if self.held_acks.contains(&tag) {
                        self.withheld.push(ack);
                    } else {
                        frames.push(ack);
                    }
                }
            }
            Opcode::Connect if self.link_status => {
                let status = [DongleResponse::DeviceSubscribed.to_byte()];
                frames.push(frame(Opcode::DeviceStatus, address, &status));
            }
            Opcode::Disconnect if self.link_status => {
                let status = [DongleResponse::DeviceDisconnected.to_byte()];
                frames.push(frame(Opcode::DeviceStatus, address, &status));
            }
            _ => {}
        }

        frames
    }
}

// ============================================================================
// MockDongle
// ============================================================================

enum Control {
    Frame(Vec<u8>),
    HangUp,
}

/// Scriptable firmware on the far end of an in-memory transport.
#[derive(Clone)]
pub(crate) struct MockDongle {
    script: Arc<Mutex<Script>>,
    requests: Arc<Mutex<Vec<Request>>>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl MockDongle {
    /// Spawns the firmware task and returns the host end of the pipe.
    pub(crate) fn spawn() -> (Self, DuplexStream) {
        let (host, firmware) = duplex(4096);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let mock = Self {
            script: Arc::new(Mutex::new(Script::default())),
            requests: Arc::new(Mutex::new(Vec::new())),
            control_tx,
        };

        tokio::spawn(Self::run(
            firmware,
            Arc::clone(&mock.script),
            Arc::clone(&mock.requests),
            control_rx,
        ));

        (mock, host)
    }

    /// Replies `CmdError` to `opcode` for `address`.
    pub(crate) fn reject(&self, address: BtAddress, opcode: Opcode) {
        self.script.lock().rejected.insert((address, opcode));
    }

    /// Never replies to `opcode`.
    pub(crate) fn silence(&self, opcode: Opcode) {
        self.script.lock().silent.insert(opcode);
    }

    /// Acknowledges every control write for `address` with `tag`.
    pub(crate) fn override_ack(&self, address: BtAddress, tag: u8) {
        self.script.lock().ack_overrides.insert(address, tag);
    }

    /// Keeps acknowledgements carrying `tag` back until
    /// [`release_acks`](Self::release_acks). The command reply is still sent.
    pub(crate) fn hold_ack(&self, tag: u8) {
        self.script.lock().held_acks.insert(tag);
    }

    /// Sends every withheld acknowledgement and stops holding.
    pub(crate) fn release_acks(&self) {
        let withheld = {
            let mut script = self.script.lock();
            script.held_acks.clear();
            std::mem::take(&mut script.withheld)
        };
        for ack in withheld {
            self.inject(ack);
        }
    }

    /// Sets the stop-result measurement.
    pub(crate) fn set_measurement(&self, duration_ms: u32, bytes: u32) {
        self.script.lock().measurement = (duration_ms, bytes);
    }

    /// Disables link status frames after connect and disconnect.
    pub(crate) fn without_link_status(&self) {
        self.script.lock().link_status = false;
    }

    /// Writes a raw frame to the host.
    pub(crate) fn inject(&self, frame: Vec<u8>) {
        let _ = self.control_tx.send(Control::Frame(frame));
    }

    /// Reports an advertising peripheral.
    pub(crate) fn inject_scanned(&self, address: BtAddress, serial_info: &[u8]) {
        self.inject(frame(Opcode::DeviceScanned, address, serial_info));
    }

    /// Reports a link status change.
    pub(crate) fn inject_status(
        &self,
        address: BtAddress,
        code: DongleResponse,
        new_address: Option<BtAddress>,
    ) {
        let mut body = vec![code.to_byte()];
        if let Some(new_address) = new_address {
            body.extend_from_slice(&new_address.to_wire());
        }
        self.inject(frame(Opcode::DeviceStatus, address, &body));
    }

    /// Closes the firmware end of the pipe.
    pub(crate) fn hang_up(&self) {
        let _ = self.control_tx.send(Control::HangUp);
    }

    /// Requests received so far.
    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of received requests matching `opcode` and, if given, the
    /// leading body byte.
    pub(crate) fn count(&self, opcode: Opcode, tag: Option<u8>) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.opcode == opcode)
            .filter(|r| tag.is_none() || r.body.first().copied() == tag)
            .count()
    }

    async fn run(
        stream: DuplexStream,
        script: Arc<Mutex<Script>>,
        requests: Arc<Mutex<Vec<Request>>>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut framer = Framer::new();
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };

                    for payload in framer.feed(&buf[..n]) {
                        let Some(request) = parse_request(&payload) else {
                            continue;
                        };
                        let replies = script.lock().reply(&request);
                        requests.lock().push(request);

                        for reply in replies {
                            if writer.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                }

                Some(control) = control_rx.recv() => match control {
                    Control::Frame(frame) => {
                        if writer.write_all(&frame).await.is_err() {
                            return;
                        }
                    }
                    Control::HangUp => return,
                },
            }
        }
    }
}

/// Polls `check` until it holds, panicking after about a second.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// MockPortProvider
// ============================================================================

/// [`PortProvider`] handing out [`MockDongle`] transports.
///
/// Clones share the port list and the opened dongles.
#[derive(Clone, Default)]
pub(crate) struct MockPortProvider {
    ports: Arc<Mutex<Vec<PortId>>>,
    dongles: Arc<Mutex<FxHashMap<PortId, MockDongle>>>,
}

impl MockPortProvider {
    /// Creates a provider listing `ports`.
    pub(crate) fn new(ports: &[&str]) -> Self {
        let provider = Self::default();
        provider.set_ports(ports);
        provider
    }

    /// Replaces the listed ports.
    pub(crate) fn set_ports(&self, ports: &[&str]) {
        *self.ports.lock() = ports.iter().map(|p| PortId::from(*p)).collect();
    }

    /// Firmware behind an opened port.
    pub(crate) fn dongle(&self, port: &str) -> Option<MockDongle> {
        self.dongles.lock().get(&PortId::from(port)).cloned()
    }
}

#[async_trait]
impl PortProvider for MockPortProvider {
    async fn list(&self) -> Result<Vec<PortId>> {
        Ok(self.ports.lock().clone())
    }

    async fn open(&self, port: &PortId) -> Result<BoxedTransport> {
        if !self.ports.lock().contains(port) {
            return Err(Error::transport(port.clone(), "No such port"));
        }

        let (mock, host) = MockDongle::spawn();
        self.dongles.lock().insert(port.clone(), mock);
        Ok(Box::new(host))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::AddressType;

    #[test]
    fn test_parse_request_ignores_inbound_opcodes() {
        let address = BtAddress::new([1; 6], AddressType::Public);
        let request = Request::new(Opcode::Connect, address, Vec::new());
        assert_eq!(parse_request(&request.encode()), Some(request));

        let mut inbound = vec![Opcode::Response.to_byte()];
        inbound.extend_from_slice(&address.to_wire());
        assert_eq!(parse_request(&inbound), None);
    }
}
