//! Per-peripheral command sequences.
//!
//! Control commands are two-phase: the dongle replies to the `WriteCtrl`
//! request, then the peripheral acknowledges with a notification whose first
//! byte echoes the command tag. The waiter is registered before the request
//! is sent so an acknowledgement arriving right behind the reply is not lost.
//!
//! | Step | Request | Acknowledgement |
//! |------|---------|-----------------|
//! | enter | `WriteCtrl FA 11 22 33 44 55 66` | `FA` |
//! | select | `WriteCtrl FC <mode> [<frame size>]` | `FC` |
//! | exit | `WriteCtrl FE` | `FE` |
//! | start result | `StartResult <type>` | - |
//! | stop result | `StopResult` | reply data: duration, bytes |
//! | start write | `WriteData <frame size> <type>` | - |
//! | stop write | `StopData` | - |

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::BtAddress;
use crate::protocol::{
    ControlCommand, DataWriteType, Opcode, ResultCollectionType, Response, TestMode,
};
use crate::transport::CommandService;

use super::model::throughput_bps;

// ============================================================================
// Measurement
// ============================================================================

/// Raw stop-result measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Test duration in milliseconds.
    pub duration_ms: u32,
    /// Bytes transferred.
    pub bytes: u32,
}

impl Measurement {
    /// Throughput in bytes per second, see [`throughput_bps`].
    #[inline]
    #[must_use]
    pub fn throughput_bps(&self) -> u32 {
        throughput_bps(self.duration_ms, self.bytes)
    }
}

// ============================================================================
// TestSequencer
// ============================================================================

/// Runs test commands against one peripheral through a command service.
#[derive(Debug)]
pub struct TestSequencer<'a> {
    commands: &'a CommandService,
    address: BtAddress,
}

impl<'a> TestSequencer<'a> {
    /// Creates a sequencer for `address`.
    #[inline]
    #[must_use]
    pub fn new(commands: &'a CommandService, address: BtAddress) -> Self {
        Self { commands, address }
    }

    /// Peripheral address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> BtAddress {
        self.address
    }

    /// Puts the peripheral into RF test mode.
    ///
    /// # Errors
    ///
    /// The command error, [`Error::AckTimeout`] without an acknowledgement,
    /// [`Error::ProtocolDesync`] if the acknowledgement carries another tag.
    pub async fn enter_test_mode(&self) -> Result<()> {
        self.control(ControlCommand::EnterTestMode).await
    }

    /// Selects the test sub-mode.
    ///
    /// # Errors
    ///
    /// The command error, [`Error::AckTimeout`] without an acknowledgement,
    /// [`Error::ProtocolDesync`] if the acknowledgement carries another tag.
    pub async fn select_mode(&self, mode: TestMode, frame_size: u8) -> Result<()> {
        self.control(ControlCommand::SelectMode { mode, frame_size })
            .await
    }

    /// Takes the peripheral out of RF test mode.
    ///
    /// # Errors
    ///
    /// The command error, [`Error::AckTimeout`] without an acknowledgement,
    /// [`Error::ProtocolDesync`] if the acknowledgement carries another tag.
    pub async fn exit_test_mode(&self) -> Result<()> {
        self.control(ControlCommand::ExitTestMode).await
    }

    /// Starts measuring on the dongle.
    ///
    /// # Errors
    ///
    /// The command error or a rejection from the dongle.
    pub async fn start_result_collection(&self, kind: ResultCollectionType) -> Result<()> {
        self.command(Opcode::StartResult, &[kind.to_byte()]).await?;
        Ok(())
    }

    /// Stops measuring and returns the measurement.
    ///
    /// # Errors
    ///
    /// The command error, or [`Error::Protocol`] if the measurement is
    /// truncated.
    pub async fn stop_result_collection(&self) -> Result<Measurement> {
        let response = self.command(Opcode::StopResult, &[]).await?;
        let (duration_ms, bytes) = response.result_measurement()?;

        debug!(
            address = %self.address,
            duration_ms,
            bytes,
            "Measurement received"
        );

        Ok(Measurement { duration_ms, bytes })
    }

    /// Starts streaming test data to the peripheral.
    ///
    /// # Errors
    ///
    /// The command error or a rejection from the dongle.
    pub async fn start_data_write(&self, frame_size: u8, kind: DataWriteType) -> Result<()> {
        self.command(Opcode::WriteData, &[frame_size, kind.to_byte()])
            .await?;
        Ok(())
    }

    /// Stops streaming test data.
    ///
    /// # Errors
    ///
    /// The command error or a rejection from the dongle.
    pub async fn stop_data_write(&self) -> Result<()> {
        self.command(Opcode::StopData, &[]).await?;
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    async fn command(&self, opcode: Opcode, body: &[u8]) -> Result<Response> {
        self.commands
            .send_command(self.address, opcode, body)
            .await?
            .ensure_ok()
    }

    async fn control(&self, command: ControlCommand) -> Result<()> {
        let expected = command.tag();
        let waiter = self.commands.register_notification(self.address)?;

        self.command(Opcode::WriteCtrl, &command.encode()).await?;

        let ack = waiter.wait().await?;
        match ack.tag() {
            Some(tag) if tag == expected => {
                trace!(address = %self.address, tag, "Control acknowledged");
                Ok(())
            }
            Some(tag) => Err(Error::protocol_desync(
                self.address,
                expected,
                format!("0x{tag:02X}"),
            )),
            None => Err(Error::protocol_desync(
                self.address,
                expected,
                "empty acknowledgement",
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::{AddressType, PortId};
    use crate::mock::MockDongle;

    fn device() -> BtAddress {
        BtAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01], AddressType::Random)
    }

    fn service() -> (MockDongle, CommandService) {
        let (mock, host) = MockDongle::spawn();
        (mock, CommandService::new(PortId::new("mock"), host))
    }

    #[test]
    fn test_measurement_throughput() {
        let measurement = Measurement {
            duration_ms: 2000,
            bytes: 4000,
        };
        assert_eq!(measurement.throughput_bps(), 2000);
    }

    #[tokio::test]
    async fn test_enter_test_mode_sends_placeholder_and_waits_for_ack() {
        let (mock, commands) = service();
        let sequencer = TestSequencer::new(&commands, device());

        sequencer.enter_test_mode().await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].opcode, Opcode::WriteCtrl);
        assert_eq!(requests[0].address, device());
        assert_eq!(
            requests[0].body,
            vec![0xFA, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]
        );
    }

    #[tokio::test]
    async fn test_select_mode_bodies() {
        let (mock, commands) = service();
        let sequencer = TestSequencer::new(&commands, device());

        sequencer.select_mode(TestMode::Uplink, 100).await.unwrap();
        sequencer.select_mode(TestMode::Downlink, 100).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].body, vec![0xFC, 0x00]);
        assert_eq!(requests[1].body, vec![0xFC, 0x02, 100]);
    }

    #[tokio::test]
    async fn test_mismatched_ack_is_desync() {
        let (mock, commands) = service();
        mock.override_ack(device(), 0xFC);
        let sequencer = TestSequencer::new(&commands, device());

        let err = sequencer.exit_test_mode().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolDesync {
                expected: 0xFE,
                ..
            }
        ));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_rejected_control_does_not_wait_for_ack() {
        let (mock, commands) = service();
        mock.reject(device(), Opcode::WriteCtrl);
        let sequencer = TestSequencer::new(&commands, device());

        let err = sequencer.enter_test_mode().await.unwrap_err();
        assert!(matches!(err, Error::CommandRejected { .. }));

        // Waiter slot was released with the failed step.
        assert!(commands.register_notification(device()).is_ok());
    }

    #[tokio::test]
    async fn test_stop_result_collection_parses_measurement() {
        let (mock, commands) = service();
        mock.set_measurement(3000, 9000);
        let sequencer = TestSequencer::new(&commands, device());

        sequencer
            .start_result_collection(ResultCollectionType::Rx)
            .await
            .unwrap();
        let measurement = sequencer.stop_result_collection().await.unwrap();

        assert_eq!(measurement.duration_ms, 3000);
        assert_eq!(measurement.bytes, 9000);
        assert_eq!(measurement.throughput_bps(), 3000);

        let requests = mock.requests();
        assert_eq!(requests[0].opcode, Opcode::StartResult);
        assert_eq!(requests[0].body, vec![0x01]);
        assert_eq!(requests[1].opcode, Opcode::StopResult);
    }

    #[tokio::test]
    async fn test_data_write_body() {
        let (mock, commands) = service();
        let sequencer = TestSequencer::new(&commands, device());

        sequencer
            .start_data_write(64, DataWriteType::Bidirectional)
            .await
            .unwrap();
        sequencer.stop_data_write().await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].opcode, Opcode::WriteData);
        assert_eq!(requests[0].body, vec![64, 0x01]);
        assert_eq!(requests[1].opcode, Opcode::StopData);
        assert!(requests[1].body.is_empty());
    }
}
