//! Defines packet structures used by the Link Layer Control Protocol.

use crate::bytes::{self, *};
use crate::link::{channel_map::ChannelMap, comp_id::CompanyId, features::FeatureSet};
use crate::{time::Duration, utils::Hex, Error};
use core::cmp;
use zerocopy::{AsBytes, FromBytes, Unaligned};

enum_with_unknown! {
    /// Enumeration of all known LL Control PDU opcodes (not all of which might be supported).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum ControlOpcode(u8) {
        ConnectionUpdateReq = 0x00,
        ChannelMapReq = 0x01,
        TerminateInd = 0x02,
        EncReq = 0x03,
        EncRsp = 0x04,
        StartEncReq = 0x05,
        StartEncRsp = 0x06,
        UnknownRsp = 0x07,
        FeatureReq = 0x08,
        FeatureRsp = 0x09,
        PauseEncReq = 0x0A,
        PauseEncRsp = 0x0B,
        VersionInd = 0x0C,
        RejectInd = 0x0D,
        SlaveFeatureReq = 0x0E,
        ConnectionParamReq = 0x0F,
        ConnectionParamRsp = 0x10,
        RejectIndExt = 0x11,
        PingReq = 0x12,
        PingRsp = 0x13,
        LengthReq = 0x14,
        LengthRsp = 0x15,
    }
}

enum_with_unknown! {
    /// Enumeration of all possible `VersNr` for `LL_VERSION_IND` PDUs.
    ///
    /// According to https://www.bluetooth.com/specifications/assigned-numbers/link-layer
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum VersionNumber(u8) {
        V4_0 = 6,
        V4_1 = 7,
        V4_2 = 8,
        V5_0 = 9,
        V5_1 = 10,
    }
}

/// `LL_CONNECTION_UPDATE_REQ` - Update connection parameters.
#[derive(Debug, Copy, Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C, packed)]
pub struct ConnectionUpdateReq {
    win_size: u8,
    win_offset: u16,
    interval: u16,
    latency: u16,
    timeout: u16,
    instant: u16,
}

/// The payload of an `LL_CONNECTION_UPDATE_REQ`.
///
/// Named differently from the raw wire struct since it's embedded in [`ControlPdu`] and accessed
/// through its accessor methods rather than its raw fields.
pub type ConnectionUpdateData = ConnectionUpdateReq;

impl ConnectionUpdateReq {
    /// Returns the size of the transmit window for the first PDU of the connection.
    pub fn win_size(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_size) * 1_250)
    }

    /// Returns the offset of the transmit window, as a duration since the `instant`.
    pub fn win_offset(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_offset) * 1_250)
    }

    /// Returns the duration between connection events.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(u32::from(self.interval) * 1_250)
    }

    /// Returns the slave latency.
    pub fn latency(&self) -> u16 {
        self.latency
    }

    /// Returns the connection supervision timeout (`connSupervisionTimeout`).
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(u32::from(self.timeout) * 10_000)
    }

    /// Returns the instant at which these changes should take effect.
    pub fn instant(&self) -> u16 {
        self.instant
    }
}

/// `LL_CONNECTION_PARAM_REQ` - A connection parameter update request.
#[derive(Debug, Copy, Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C, packed)]
pub struct ConnectionParamReq {
    interval_min: u16,
    interval_max: u16,
    slave_latency: u16,
    supervision_timeout: u16,
    /// `connInterval` is preferred to be a multiple of this value (in 1.25 ms steps).
    preferred_periodicity: u8,
    reference_conn_event_count: u16,
    offsets: [u16; 6],
}

impl ConnectionParamReq {
    /// Creates a new connection update request structure filled with default values.
    ///
    /// The returned structure will use conservative (maximally permissive) default values that will
    /// not usually result in a change in connection parameters, so users of this function likely
    /// want to call a setter afterwards.
    pub fn new() -> Self {
        Self {
            interval_min: 6,    // 7.5ms
            interval_max: 3200, // 4s
            slave_latency: 0,
            supervision_timeout: 100,      // FIXME (unsure; 1s)
            preferred_periodicity: 0,      // not valid
            reference_conn_event_count: 0, // irrelevant
            offsets: [0xFFFF; 6],          // none valid
        }
    }

    /// Sets the minimum and maximum requested connection interval.
    ///
    /// # Parameters
    ///
    /// * `min`: Minimum connection interval to request.
    /// * `max`: Maximum connection interval to request.
    ///
    /// Both `min` and `max` must be in range 7.5ms to 4s, or they will be constrained to lie in
    /// that range.
    ///
    /// Both `min` and `max` will be rounded down to units of 1.25 ms.
    ///
    /// # Panics
    ///
    /// This will panic if `min > max`.
    pub fn set_conn_interval(&mut self, min: Duration, max: Duration) {
        assert!(min <= max);

        // Convert and round to units of 1.25 ms.
        let max = max.as_micros() / 1_250;
        let min = min.as_micros() / 1_250;

        // Clamp to valid range of 6..=3200
        let min = cmp::min(cmp::max(min, 6), 3200);
        let max = cmp::min(cmp::max(max, 6), 3200);
        debug_assert!(min <= max);
        self.interval_min = min as u16;
        self.interval_max = max as u16;
    }

    /// Returns the minimum requested connection interval.
    pub fn min_conn_interval(&self) -> Duration {
        Duration::from_micros(u32::from(self.interval_min) * 1_250)
    }

    /// Returns the maximum requested connection interval.
    pub fn max_conn_interval(&self) -> Duration {
        Duration::from_micros(u32::from(self.interval_max) * 1_250)
    }

    /// Returns the slave latency in number of connection events.
    pub fn slave_latency(&self) -> u16 {
        self.slave_latency
    }

    /// Returns the supervision timeout.
    pub fn supervision_timeout(&self) -> Duration {
        Duration::from_millis(self.supervision_timeout * 10)
    }
}

impl Default for ConnectionParamReq {
    fn default() -> Self {
        Self::new()
    }
}

/// `LL_CONNECTION_PARAM_RSP`
pub type ConnectionParamRsp = ConnectionParamReq;

/// `LL_LENGTH_REQ` / `LL_LENGTH_RSP` payload.
#[derive(Debug, Copy, Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C, packed)]
pub struct LengthData {
    max_rx_octets: u16,
    max_rx_time: u16,
    max_tx_octets: u16,
    max_tx_time: u16,
}

impl LengthData {
    pub fn new(max_rx_octets: u16, max_rx_time: u16, max_tx_octets: u16, max_tx_time: u16) -> Self {
        Self {
            max_rx_octets,
            max_rx_time,
            max_tx_octets,
            max_tx_time,
        }
    }

    pub fn max_rx_octets(&self) -> u16 {
        self.max_rx_octets
    }

    pub fn max_tx_octets(&self) -> u16 {
        self.max_tx_octets
    }

    pub fn max_rx_time(&self) -> u16 {
        self.max_rx_time
    }

    pub fn max_tx_time(&self) -> u16 {
        self.max_tx_time
    }
}

/// Structured representation of an LL Control PDU (an LLCPDU).
///
/// This is the payload carried by data channel PDUs with `LLID` set to `Control` (see
/// [`Llid::Control`][crate::link::data::Llid::Control]).
#[derive(Debug, Copy, Clone)]
pub enum ControlPdu {
    /// `LL_CONNECTION_UPDATE_REQ` - master-initiated connection parameter update.
    ConnectionUpdateReq(ConnectionUpdateData),
    /// `LL_CHANNEL_MAP_REQ` - master-initiated channel map update.
    ChannelMapReq {
        map: ChannelMap,
        instant: u16,
    },
    /// `LL_TERMINATE_IND` - the connection is being closed.
    TerminateInd {
        error_code: u8,
    },
    /// `LL_ENC_REQ` - master requests the connection be encrypted, using the `EDIV`/`Rand` pair
    /// to look up a previously bonded key.
    EncReq {
        rand: [u8; 8],
        ediv: u16,
        skdm: [u8; 8],
        ivm: [u8; 4],
    },
    /// `LL_ENC_RSP` - slave's half of the session key diversifier exchange.
    EncRsp {
        skds: [u8; 8],
        ivs: [u8; 4],
    },
    /// `LL_START_ENC_REQ` - sent by both sides once link encryption is active, to hand control
    /// back to the LL Control procedure that requested it.
    StartEncReq,
    /// `LL_START_ENC_RSP`
    StartEncRsp,
    /// `LL_UNKNOWN_RSP` - sent in response to an LLCPDU this peer does not support.
    UnknownRsp {
        unknown_type: ControlOpcode,
    },
    /// `LL_FEATURE_REQ`
    FeatureReq {
        features_master: FeatureSet,
    },
    /// `LL_FEATURE_RSP`
    FeatureRsp {
        features_used: FeatureSet,
    },
    /// `LL_PAUSE_ENC_REQ`
    PauseEncReq,
    /// `LL_PAUSE_ENC_RSP`
    PauseEncRsp,
    /// `LL_VERSION_IND`
    VersionInd {
        vers_nr: VersionNumber,
        comp_id: CompanyId,
        sub_vers_nr: Hex<u16>,
    },
    /// `LL_REJECT_IND` - a previous LL Control procedure request is rejected.
    RejectInd {
        error_code: u8,
    },
    /// `LL_SLAVE_FEATURE_REQ` - slave-initiated feature exchange.
    SlaveFeatureReq {
        features_slave: FeatureSet,
    },
    /// `LL_CONNECTION_PARAM_REQ`
    ConnectionParamReq(ConnectionParamReq),
    /// `LL_CONNECTION_PARAM_RSP`
    ConnectionParamRsp(ConnectionParamRsp),
    /// `LL_REJECT_IND_EXT` - like `RejectInd`, but also names the rejected opcode.
    RejectIndExt {
        reject_opcode: ControlOpcode,
        error_code: u8,
    },
    /// `LL_PING_REQ`
    PingReq,
    /// `LL_PING_RSP`
    PingRsp,
    /// `LL_LENGTH_REQ`
    LengthReq(LengthData),
    /// `LL_LENGTH_RSP`
    LengthRsp(LengthData),
}

impl ControlPdu {
    /// Returns the opcode identifying this PDU's type.
    pub fn opcode(&self) -> ControlOpcode {
        match self {
            ControlPdu::ConnectionUpdateReq(_) => ControlOpcode::ConnectionUpdateReq,
            ControlPdu::ChannelMapReq { .. } => ControlOpcode::ChannelMapReq,
            ControlPdu::TerminateInd { .. } => ControlOpcode::TerminateInd,
            ControlPdu::EncReq { .. } => ControlOpcode::EncReq,
            ControlPdu::EncRsp { .. } => ControlOpcode::EncRsp,
            ControlPdu::StartEncReq => ControlOpcode::StartEncReq,
            ControlPdu::StartEncRsp => ControlOpcode::StartEncRsp,
            ControlPdu::UnknownRsp { .. } => ControlOpcode::UnknownRsp,
            ControlPdu::FeatureReq { .. } => ControlOpcode::FeatureReq,
            ControlPdu::FeatureRsp { .. } => ControlOpcode::FeatureRsp,
            ControlPdu::PauseEncReq => ControlOpcode::PauseEncReq,
            ControlPdu::PauseEncRsp => ControlOpcode::PauseEncRsp,
            ControlPdu::VersionInd { .. } => ControlOpcode::VersionInd,
            ControlPdu::RejectInd { .. } => ControlOpcode::RejectInd,
            ControlPdu::SlaveFeatureReq { .. } => ControlOpcode::SlaveFeatureReq,
            ControlPdu::ConnectionParamReq(_) => ControlOpcode::ConnectionParamReq,
            ControlPdu::ConnectionParamRsp(_) => ControlOpcode::ConnectionParamRsp,
            ControlPdu::RejectIndExt { .. } => ControlOpcode::RejectIndExt,
            ControlPdu::PingReq => ControlOpcode::PingReq,
            ControlPdu::PingRsp => ControlOpcode::PingRsp,
            ControlPdu::LengthReq(_) => ControlOpcode::LengthReq,
            ControlPdu::LengthRsp(_) => ControlOpcode::LengthRsp,
        }
    }

    /// Returns the number of bytes `self` will occupy once encoded, including the opcode byte.
    pub fn encoded_size(&self) -> u8 {
        let payload = match self {
            ControlPdu::ConnectionUpdateReq(_) => 11,
            ControlPdu::ChannelMapReq { .. } => 7,
            ControlPdu::TerminateInd { .. } => 1,
            ControlPdu::EncReq { .. } => 22,
            ControlPdu::EncRsp { .. } => 12,
            ControlPdu::StartEncReq | ControlPdu::StartEncRsp => 0,
            ControlPdu::UnknownRsp { .. } => 1,
            ControlPdu::FeatureReq { .. } | ControlPdu::FeatureRsp { .. } => 8,
            ControlPdu::PauseEncReq | ControlPdu::PauseEncRsp => 0,
            ControlPdu::VersionInd { .. } => 5,
            ControlPdu::RejectInd { .. } => 1,
            ControlPdu::SlaveFeatureReq { .. } => 8,
            ControlPdu::ConnectionParamReq(_) | ControlPdu::ConnectionParamRsp(_) => 23,
            ControlPdu::RejectIndExt { .. } => 2,
            ControlPdu::PingReq | ControlPdu::PingRsp => 0,
            ControlPdu::LengthReq(_) | ControlPdu::LengthRsp(_) => 8,
        };
        1 + payload
    }
}

impl<'a> bytes::FromBytes<'a> for ControlPdu {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let opcode = ControlOpcode::from(bytes.read_u8()?);
        Ok(match opcode {
            ControlOpcode::ConnectionUpdateReq => {
                ControlPdu::ConnectionUpdateReq(*bytes.read_obj::<ConnectionUpdateReq>()?)
            }
            ControlOpcode::ChannelMapReq => ControlPdu::ChannelMapReq {
                map: ChannelMap::from_raw(bytes.read_array()?),
                instant: bytes.read_u16_le()?,
            },
            ControlOpcode::TerminateInd => ControlPdu::TerminateInd {
                error_code: bytes.read_u8()?,
            },
            ControlOpcode::EncReq => ControlPdu::EncReq {
                rand: bytes.read_array()?,
                ediv: bytes.read_u16_le()?,
                skdm: bytes.read_array()?,
                ivm: bytes.read_array()?,
            },
            ControlOpcode::EncRsp => ControlPdu::EncRsp {
                skds: bytes.read_array()?,
                ivs: bytes.read_array()?,
            },
            ControlOpcode::StartEncReq => ControlPdu::StartEncReq,
            ControlOpcode::StartEncRsp => ControlPdu::StartEncRsp,
            ControlOpcode::UnknownRsp => ControlPdu::UnknownRsp {
                unknown_type: ControlOpcode::from(bytes.read_u8()?),
            },
            ControlOpcode::FeatureReq => ControlPdu::FeatureReq {
                features_master: FeatureSet::from_bits_truncate(bytes.read_u64_le()?),
            },
            ControlOpcode::FeatureRsp => ControlPdu::FeatureRsp {
                features_used: FeatureSet::from_bits_truncate(bytes.read_u64_le()?),
            },
            ControlOpcode::PauseEncReq => ControlPdu::PauseEncReq,
            ControlOpcode::PauseEncRsp => ControlPdu::PauseEncRsp,
            ControlOpcode::VersionInd => ControlPdu::VersionInd {
                vers_nr: VersionNumber::from(bytes.read_u8()?),
                comp_id: CompanyId::from_raw(bytes.read_u16_le()?),
                sub_vers_nr: Hex(bytes.read_u16_le()?),
            },
            ControlOpcode::RejectInd => ControlPdu::RejectInd {
                error_code: bytes.read_u8()?,
            },
            ControlOpcode::SlaveFeatureReq => ControlPdu::SlaveFeatureReq {
                features_slave: FeatureSet::from_bits_truncate(bytes.read_u64_le()?),
            },
            ControlOpcode::ConnectionParamReq => {
                ControlPdu::ConnectionParamReq(*bytes.read_obj::<ConnectionParamReq>()?)
            }
            ControlOpcode::ConnectionParamRsp => {
                ControlPdu::ConnectionParamRsp(*bytes.read_obj::<ConnectionParamRsp>()?)
            }
            ControlOpcode::RejectIndExt => ControlPdu::RejectIndExt {
                reject_opcode: ControlOpcode::from(bytes.read_u8()?),
                error_code: bytes.read_u8()?,
            },
            ControlOpcode::PingReq => ControlPdu::PingReq,
            ControlOpcode::PingRsp => ControlPdu::PingRsp,
            ControlOpcode::LengthReq => ControlPdu::LengthReq(*bytes.read_obj::<LengthData>()?),
            ControlOpcode::LengthRsp => ControlPdu::LengthRsp(*bytes.read_obj::<LengthData>()?),
            ControlOpcode::Unknown(_) => return Err(Error::InvalidValue),
        })
    }
}

impl ToBytes for ControlPdu {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.opcode().into())?;
        match *self {
            ControlPdu::ConnectionUpdateReq(data) => writer.write_obj(&data)?,
            ControlPdu::ChannelMapReq { map, instant } => {
                writer.write_slice(&map.to_raw())?;
                writer.write_u16_le(instant)?;
            }
            ControlPdu::TerminateInd { error_code } => writer.write_u8(error_code)?,
            ControlPdu::EncReq {
                rand,
                ediv,
                skdm,
                ivm,
            } => {
                writer.write_slice(&rand)?;
                writer.write_u16_le(ediv)?;
                writer.write_slice(&skdm)?;
                writer.write_slice(&ivm)?;
            }
            ControlPdu::EncRsp { skds, ivs } => {
                writer.write_slice(&skds)?;
                writer.write_slice(&ivs)?;
            }
            ControlPdu::StartEncReq | ControlPdu::StartEncRsp => {}
            ControlPdu::UnknownRsp { unknown_type } => writer.write_u8(unknown_type.into())?,
            ControlPdu::FeatureReq { features_master } => {
                writer.write_u64_le(features_master.bits())?
            }
            ControlPdu::FeatureRsp { features_used } => writer.write_u64_le(features_used.bits())?,
            ControlPdu::PauseEncReq | ControlPdu::PauseEncRsp => {}
            ControlPdu::VersionInd {
                vers_nr,
                comp_id,
                sub_vers_nr,
            } => {
                writer.write_u8(vers_nr.into())?;
                writer.write_u16_le(comp_id.as_u16())?;
                writer.write_u16_le(sub_vers_nr.0)?;
            }
            ControlPdu::RejectInd { error_code } => writer.write_u8(error_code)?,
            ControlPdu::SlaveFeatureReq { features_slave } => {
                writer.write_u64_le(features_slave.bits())?
            }
            ControlPdu::ConnectionParamReq(data) => writer.write_obj(&data)?,
            ControlPdu::ConnectionParamRsp(data) => writer.write_obj(&data)?,
            ControlPdu::RejectIndExt {
                reject_opcode,
                error_code,
            } => {
                writer.write_u8(reject_opcode.into())?;
                writer.write_u8(error_code)?;
            }
            ControlPdu::PingReq | ControlPdu::PingRsp => {}
            ControlPdu::LengthReq(data) => writer.write_obj(&data)?,
            ControlPdu::LengthRsp(data) => writer.write_obj(&data)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_req_set_conn_interval() {
        fn set(min: Duration, max: Duration) -> (Duration, Duration) {
            let mut req = ConnectionParamReq::new();
            req.set_conn_interval(min, max);

            (req.min_conn_interval(), req.max_conn_interval())
        }

        fn same(min: Duration, max: Duration) {
            let (min2, max2) = set(min, max);
            assert_eq!(min2, min);
            assert_eq!(max2, max);
        }

        same(Duration::from_secs(1), Duration::from_secs(1));
        same(Duration::from_micros(7_500), Duration::from_micros(7_500));
        same(Duration::from_micros(7_500), Duration::from_secs(4));
        same(Duration::from_secs(4), Duration::from_secs(4));

        let (min, max) = set(Duration::from_secs(8), Duration::from_secs(8));
        assert_eq!(min, Duration::from_secs(4));
        assert_eq!(max, Duration::from_secs(4));

        let (min, max) = set(Duration::from_secs(0), Duration::from_secs(8));
        assert_eq!(min, Duration::from_micros(7_500));
        assert_eq!(max, Duration::from_secs(4));

        let (min, max) = set(Duration::from_micros(7_501), Duration::from_micros(7_502));
        assert_eq!(min, Duration::from_micros(7_500));
        assert_eq!(max, Duration::from_micros(7_500));
    }

    #[test]
    #[should_panic(expected = "min <= max")]
    fn update_req_set_conn_interval_minmax() {
        let mut req = ConnectionParamReq::new();
        req.set_conn_interval(Duration::from_secs(8), Duration::from_secs(7));
    }

    #[test]
    fn control_pdu_round_trip() {
        let pdus = [
            ControlPdu::PingReq,
            ControlPdu::PingRsp,
            ControlPdu::TerminateInd { error_code: 0x13 },
            ControlPdu::RejectInd { error_code: 0x06 },
            ControlPdu::UnknownRsp {
                unknown_type: ControlOpcode::EncReq,
            },
            ControlPdu::EncReq {
                rand: [1, 2, 3, 4, 5, 6, 7, 8],
                ediv: 0xABCD,
                skdm: [8, 7, 6, 5, 4, 3, 2, 1],
                ivm: [9, 8, 7, 6],
            },
        ];

        for pdu in &pdus {
            let mut buf = [0; 32];
            let mut writer = ByteWriter::new(&mut buf);
            pdu.to_bytes(&mut writer).unwrap();
            let used = 32 - writer.space_left();
            assert_eq!(used, usize::from(pdu.encoded_size()));

            let decoded = ControlPdu::from_bytes(&mut ByteReader::new(&buf[..used])).unwrap();
            assert_eq!(decoded.opcode(), pdu.opcode());
        }
    }
}
