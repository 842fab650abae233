//! Defines PDUs, procedures and functionality used by the LE L2CAP signaling channel (`0x0005`).
//!
//! As a peripheral-only stack, this implementation never needs to *answer* a Connection Parameter
//! Update Request (that's the central's job); it only needs to make sense of whatever the central
//! sends back on this channel, and to reject anything it doesn't understand the way the
//! specification requires.

use super::*;

enum_with_unknown! {
    /// Opcodes allowed on the LE Signaling Channel (CID `0x0005`).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Code(u8) {
        CommandReject = 0x01,
        DisconnectionRequest = 0x06,
        DisconnectionResponse = 0x07,
        ConnectionParameterUpdateRequest = 0x12,
        ConnectionParameterUpdateResponse = 0x13,
        CreditBasedConnectionRequest = 0x14,
        CreditBasedConnectionResponse = 0x15,
        FlowControlCredit = 0x16,
    }
}

/// Reason code carried by a `Command Reject` response.
#[derive(Debug, Copy, Clone)]
enum RejectReason {
    CommandNotUnderstood,
    SignalingMtuExceeded,
    InvalidCid,
}

impl RejectReason {
    fn as_u16(&self) -> u16 {
        match self {
            RejectReason::CommandNotUnderstood => 0x0000,
            RejectReason::SignalingMtuExceeded => 0x0001,
            RejectReason::InvalidCid => 0x0002,
        }
    }
}

struct SignalingPacketHeader {
    code: Code,
    identifier: u8,
    length: u16,
}

impl<'a> FromBytes<'a> for SignalingPacketHeader {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Self {
            code: Code::from(bytes.read_u8()?),
            identifier: bytes.read_u8()?,
            length: bytes.read_u16_le()?,
        })
    }
}

/// Result field of a `Connection Parameter Update Response`, as defined in the Core Spec.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum UpdateResult {
    Accepted,
    Rejected,
}

impl From<u16> for UpdateResult {
    fn from(raw: u16) -> Self {
        if raw == 0 {
            UpdateResult::Accepted
        } else {
            UpdateResult::Rejected
        }
    }
}

/// Signaling channel state.
///
/// This stack never has an outstanding Connection Parameter Update Request of its own to
/// correlate a response against (connection parameter renegotiation is left to the application
/// driving the Link Layer directly), so this only needs to recognize and gracefully reject
/// messages rather than run any multi-step procedure.
#[derive(Debug, Default)]
pub struct SignalingState {}

impl SignalingState {
    pub fn new() -> Self {
        Self {}
    }
}

impl Protocol for SignalingState {
    const RSP_PDU_SIZE: u8 = 10;
}

impl ProtocolObj for SignalingState {
    fn process_message(&mut self, message: &[u8], mut responder: Sender<'_>) -> Result<(), Error> {
        let mut reader = ByteReader::new(message);
        let header = SignalingPacketHeader::from_bytes(&mut reader)?;
        let payload = reader.read_slice(usize::from(header.length))?;

        match header.code {
            Code::ConnectionParameterUpdateResponse => {
                if payload.len() < 2 {
                    return Err(Error::InvalidLength);
                }
                let result = UpdateResult::from(u16::from_le_bytes([payload[0], payload[1]]));
                info!("connection parameter update {:?}", result);
                Ok(())
            }
            Code::CommandReject => {
                info!("signaling command rejected by peer: {:?}", HexSlice(payload));
                Ok(())
            }
            Code::DisconnectionResponse => {
                // Classic Bluetooth only; LE never opens connection-oriented channels this stack
                // would need to tear down.
                Ok(())
            }
            _ => {
                // We don't support receiving any signaling *requests* (this stack never accepts
                // dynamic or credit-based channels, and never needs to answer a connection
                // parameter update request since that's always initiated by the central), so
                // reject whatever comes in with the identifier it was sent with.
                responder.send(CommandRejectRsp {
                    identifier: header.identifier,
                    reason: RejectReason::CommandNotUnderstood,
                })
            }
        }
    }
}

struct CommandRejectRsp {
    identifier: u8,
    reason: RejectReason,
}

impl ToBytes for CommandRejectRsp {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(Code::CommandReject.into())?;
        writer.write_u8(self.identifier)?;
        writer.write_u16_le(2)?; // data length: just the reason field
        writer.write_u16_le(self.reason.as_u16())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_result_from_raw() {
        assert_eq!(UpdateResult::from(0x0000), UpdateResult::Accepted);
        assert_eq!(UpdateResult::from(0x0001), UpdateResult::Rejected);
    }
}
