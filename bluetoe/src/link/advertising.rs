//! Advertising-channel PDU format.
//!
//! This module only implements as much of the advertising PDU format as the core connection
//! engine needs to accept connections: decoding the `Header` that precedes every advertising
//! channel PDU, building the handful of PDUs a peripheral replies with (`ADV_IND`, `SCAN_RSP`),
//! and parsing the `LLData` field carried by `CONNECT_IND` ([`ConnectRequestData`]).
//!
//! Generating the full range of advertising/scanning PDUs (`ADV_DIRECT_IND`, `ADV_SCAN_IND`, ...)
//! and running an advertiser or scanner state machine beyond a basic connectable/discoverable
//! beacon is left to the application, which drives the radio through the `ScheduledRadio`
//! interface.

use {
    crate::{
        bytes::*,
        link::{ad_structure::AdStructure, channel_map::ChannelMap, device_address::*},
        time::Duration,
        utils::HexSlice,
        Error,
    },
    core::fmt,
};

/// Maximum advertising PDU payload size in Bytes (6 Byte address + 31 Byte AD data).
pub const MAX_PAYLOAD_SIZE: u8 = 37;

enum_with_unknown! {
    /// The 4-bit PDU Type field carried in every advertising channel PDU header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum PduType(u8) {
        /// Connectable and scannable undirected advertising.
        AdvInd = 0b0000,
        /// Connectable directed advertising.
        AdvDirectInd = 0b0001,
        /// Non-connectable, non-scannable undirected advertising.
        AdvNonconnInd = 0b0010,
        /// Scan Request.
        ScanReq = 0b0011,
        /// Scan Response.
        ScanRsp = 0b0100,
        /// Connect Request.
        ConnectInd = 0b0101,
        /// Scannable undirected advertising.
        AdvScanInd = 0b0110,
    }
}

impl PduType {
    /// Returns whether this PDU type can be received and processed by a beacon/scanner (ie. it
    /// is not a Connect Request).
    pub fn is_beacon(&self) -> bool {
        !matches!(self, PduType::ConnectInd)
    }
}

/// Header preceding the payload of every advertising channel PDU.
///
/// Layout (16 bits, little endian):
///
/// ```notrust
/// LSB                                                            MSB
/// +------------+-----+-------+-------+------------+--------------+
/// |  PDU Type  | RFU | TxAdd | RxAdd |   Length   |      RFU      |
/// |  (4 bits)  |(2be)|(1 bit)|(1 bit)|  (6 bits)  |    (2 bits)   |
/// +------------+-----+-------+-------+------------+--------------+
/// ```
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pdu_type: PduType,
    tx_add: bool,
    rx_add: bool,
    payload_length: u8,
}

impl Header {
    /// Creates a new Header for a PDU with the given type and no address flags set.
    pub fn new(pdu_type: PduType) -> Self {
        Self {
            pdu_type,
            tx_add: false,
            rx_add: false,
            payload_length: 0,
        }
    }

    /// Returns the PDU Type stored in this Header.
    pub fn type_(&self) -> PduType {
        self.pdu_type
    }

    /// Returns the value of the `TxAdd` field.
    ///
    /// The meaning of this field depends on the PDU type, but it is generally used to indicate
    /// whether the advertiser's address is random (`true`) or public (`false`).
    pub fn tx_add(&self) -> bool {
        self.tx_add
    }

    /// Sets the value of the `TxAdd` field.
    pub fn set_tx_add(&mut self, value: bool) {
        self.tx_add = value;
    }

    /// Returns the value of the `RxAdd` field.
    pub fn rx_add(&self) -> bool {
        self.rx_add
    }

    /// Sets the value of the `RxAdd` field.
    pub fn set_rx_add(&mut self, value: bool) {
        self.rx_add = value;
    }

    /// Returns the payload length stored in the header, *not* including the header itself.
    pub fn payload_length(&self) -> u8 {
        self.payload_length
    }

    /// Sets the payload length stored in the header.
    pub fn set_payload_length(&mut self, len: u8) {
        self.payload_length = len;
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.pdu_type)
            .field("tx_add", &self.tx_add)
            .field("rx_add", &self.rx_add)
            .field("payload_length", &self.payload_length)
            .finish()
    }
}

impl FromBytes<'_> for Header {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        let raw = bytes.read_u16_le()?;
        Ok(Self {
            pdu_type: PduType::from(raw as u8 & 0b1111),
            tx_add: raw & (1 << 6) != 0,
            rx_add: raw & (1 << 7) != 0,
            payload_length: (raw >> 8) as u8 & 0b0011_1111,
        })
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        let mut raw = u8::from(self.pdu_type) as u16 & 0b1111;
        if self.tx_add {
            raw |= 1 << 6;
        }
        if self.rx_add {
            raw |= 1 << 7;
        }
        raw |= (self.payload_length as u16 & 0b0011_1111) << 8;
        writer.write_u16_le(raw)
    }
}

/// A parsed advertising channel PDU, borrowing from the payload it was decoded from.
#[derive(Debug)]
pub enum Pdu<'a> {
    /// `ADV_IND`, `ADV_NONCONN_IND` or `ADV_SCAN_IND`: undirected advertisement.
    Beacon {
        address: DeviceAddress,
        data: HexSlice<&'a [u8]>,
    },
    /// `SCAN_REQ`: sent by a scanner to request a `SCAN_RSP`.
    ScanRequest {
        scanner_addr: DeviceAddress,
        adv_addr: DeviceAddress,
    },
    /// `SCAN_RSP`: response to a Scan Request, carries additional advertising data.
    ScanResponse {
        address: DeviceAddress,
        data: HexSlice<&'a [u8]>,
    },
    /// `CONNECT_IND`: sent by an initiator to establish a connection.
    ConnectRequest {
        initiator: DeviceAddress,
        receiver: DeviceAddress,
        lldata: ConnectRequestData,
    },
}

impl<'a> Pdu<'a> {
    /// Parses a `Pdu` from a `Header` and the raw payload bytes following it.
    pub fn from_header_and_payload(
        header: Header,
        payload: &mut ByteReader<'a>,
    ) -> Result<Self, Error> {
        let addr_kind = |add: bool| {
            if add {
                AddressKind::Random
            } else {
                AddressKind::Public
            }
        };

        match header.type_() {
            PduType::AdvInd | PduType::AdvNonconnInd | PduType::AdvScanInd => {
                let raw: [u8; 6] = payload.read_array()?;
                let address = DeviceAddress::new(raw, addr_kind(header.tx_add()));
                let data = HexSlice(payload.read_rest());
                Ok(Pdu::Beacon { address, data })
            }
            PduType::AdvDirectInd => {
                let raw: [u8; 6] = payload.read_array()?;
                let address = DeviceAddress::new(raw, addr_kind(header.tx_add()));
                let data = HexSlice(&[][..]);
                Ok(Pdu::Beacon { address, data })
            }
            PduType::ScanReq => {
                let scanner: [u8; 6] = payload.read_array()?;
                let adv: [u8; 6] = payload.read_array()?;
                Ok(Pdu::ScanRequest {
                    scanner_addr: DeviceAddress::new(scanner, addr_kind(header.tx_add())),
                    adv_addr: DeviceAddress::new(adv, addr_kind(header.rx_add())),
                })
            }
            PduType::ScanRsp => {
                let raw: [u8; 6] = payload.read_array()?;
                let address = DeviceAddress::new(raw, addr_kind(header.tx_add()));
                let data = HexSlice(payload.read_rest());
                Ok(Pdu::ScanResponse { address, data })
            }
            PduType::ConnectInd => {
                let initiator: [u8; 6] = payload.read_array()?;
                let receiver: [u8; 6] = payload.read_array()?;
                let lldata = ConnectRequestData::from_bytes(payload)?;
                Ok(Pdu::ConnectRequest {
                    initiator: DeviceAddress::new(initiator, addr_kind(header.tx_add())),
                    receiver: DeviceAddress::new(receiver, addr_kind(header.rx_add())),
                    lldata,
                })
            }
            PduType::Unknown(_) => Err(Error::InvalidValue),
        }
    }

    /// Returns the address of the device that sent this PDU, if applicable.
    pub fn sender(&self) -> Option<&DeviceAddress> {
        match self {
            Pdu::Beacon { address, .. } => Some(address),
            Pdu::ScanRequest { scanner_addr, .. } => Some(scanner_addr),
            Pdu::ScanResponse { address, .. } => Some(address),
            Pdu::ConnectRequest { initiator, .. } => Some(initiator),
        }
    }

    /// Returns the address this PDU was addressed to, if it was directed at a specific peer.
    pub fn receiver(&self) -> Option<&DeviceAddress> {
        match self {
            Pdu::ScanRequest { adv_addr, .. } => Some(adv_addr),
            Pdu::ConnectRequest { receiver, .. } => Some(receiver),
            Pdu::Beacon { .. } | Pdu::ScanResponse { .. } => None,
        }
    }

    /// Returns the raw Advertising Data bytes carried by this PDU, if any.
    pub fn advertising_data(&self) -> Option<&'a [u8]> {
        match self {
            Pdu::Beacon { data, .. } | Pdu::ScanResponse { data, .. } => Some(data.0),
            Pdu::ScanRequest { .. } | Pdu::ConnectRequest { .. } => None,
        }
    }
}

/// Maximum size of a fully assembled advertising channel PDU (Header + payload).
const MAX_PDU_SIZE: usize = 2 + 6 + 31;

/// An owned, ready-to-transmit advertising channel PDU.
#[derive(Clone)]
pub struct PduBuf {
    buf: [u8; MAX_PDU_SIZE],
    header: Header,
    payload_len: usize,
}

impl fmt::Debug for PduBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PduBuf")
            .field("header", &self.header)
            .field("payload", &HexSlice(self.payload()))
            .finish()
    }
}

impl PduBuf {
    fn build(
        pdu_type: PduType,
        address: DeviceAddress,
        data: &[AdStructure<'_>],
    ) -> Result<Self, Error> {
        let mut buf = [0; MAX_PDU_SIZE];
        let payload_len = {
            let mut writer = ByteWriter::new(&mut buf[2..]);
            writer.write_slice(address.raw())?;
            for ad in data {
                ad.to_bytes(&mut writer)?;
            }
            MAX_PDU_SIZE - 2 - writer.space_left()
        };

        let mut header = Header::new(pdu_type);
        header.set_tx_add(address.is_random());
        header.set_payload_length(payload_len as u8);
        header.to_bytes(&mut ByteWriter::new(&mut buf[..2]))?;

        Ok(Self {
            buf,
            header,
            payload_len,
        })
    }

    /// Builds a connectable and scannable `ADV_IND` PDU carrying `data`.
    pub fn discoverable(address: DeviceAddress, data: &[AdStructure<'_>]) -> Result<Self, Error> {
        Self::build(PduType::AdvInd, address, data)
    }

    /// Builds a `SCAN_RSP` PDU replying to a Scan Request, carrying additional `data`.
    pub fn scan_response(address: DeviceAddress, data: &[AdStructure<'_>]) -> Result<Self, Error> {
        Self::build(PduType::ScanRsp, address, data)
    }

    /// Builds a non-connectable `ADV_NONCONN_IND` PDU for a pure broadcaster.
    pub fn beacon(address: DeviceAddress, data: &[AdStructure<'_>]) -> Result<Self, Error> {
        Self::build(PduType::AdvNonconnInd, address, data)
    }

    /// Returns the header to be transmitted before this PDU's payload.
    pub fn header(&self) -> Header {
        self.header
    }

    /// Returns the raw payload bytes following the header.
    pub fn payload(&self) -> &[u8] {
        &self.buf[2..2 + self.payload_len]
    }
}

/// Maps a raw `ChM` bit pattern onto a `ChannelMap`, as carried in `CONNECT_IND`'s `LLData`.
///
/// Parsed contents of the `LLData` field of a `CONNECT_IND` PDU.
///
/// This is the information an initiator sends a peripheral in order to establish a connection:
/// the access address and CRC seed to use, the data channel hopping parameters, and the initial
/// connection event timing.
#[derive(Debug, Copy, Clone)]
pub struct ConnectRequestData {
    access_address: u32,
    crc_init: u32,
    win_size: u8,
    win_offset: Duration,
    interval: Duration,
    latency: u16,
    timeout: Duration,
    channel_map: ChannelMap,
    hop: u8,
    sca: u8,
}

impl ConnectRequestData {
    /// Returns the Access Address to be used for all data channel packets of this connection.
    pub fn access_address(&self) -> u32 {
        self.access_address
    }

    /// Returns the CRC initialization value to use for this connection.
    pub fn crc_init(&self) -> u32 {
        self.crc_init
    }

    /// Returns the size of the transmit window following `win_offset`.
    pub fn win_size(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_size) * 1250)
    }

    /// Returns the offset from the end of the `CONNECT_IND` PDU to the start of the transmit
    /// window.
    pub fn win_offset(&self) -> Duration {
        self.win_offset
    }

    /// Returns the timestamp (relative to the end of `CONNECT_IND`) at which the initial transmit
    /// window closes.
    pub fn end_of_tx_window(&self) -> Duration {
        self.win_offset + self.win_size()
    }

    /// Returns the connection event interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the slave latency (number of connection events the peripheral may skip).
    pub fn latency(&self) -> u16 {
        self.latency
    }

    /// Returns the supervision timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the initial data channel map.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    /// Returns the hop increment used to select the data channel for each connection event.
    pub fn hop(&self) -> u8 {
        self.hop
    }

    /// Returns the Sleep Clock Accuracy field reported by the initiator (3-bit raw value).
    pub fn sleep_clock_accuracy(&self) -> u8 {
        self.sca
    }

    /// Validates the `LLData` values against the ranges mandated by the Link Layer specification.
    ///
    /// A `CONNECT_IND` carrying out-of-range values must be ignored by the peripheral rather than
    /// accepted as a connection.
    pub fn check(&self) -> Result<(), Error> {
        if self.win_size == 0 || self.win_offset() + self.win_size() > self.interval {
            return Err(Error::InvalidValue);
        }
        let interval_us = self.interval.as_micros();
        if !(7_500..=4_000_000).contains(&interval_us) {
            return Err(Error::InvalidValue);
        }
        if self.latency > 499 {
            return Err(Error::InvalidValue);
        }
        let timeout_us = self.timeout.as_micros();
        if !(100_000..=32_000_000).contains(&timeout_us) {
            return Err(Error::InvalidValue);
        }
        // timeout must be > (1 + latency) * interval * 2, per the Link Layer spec
        if self.timeout <= self.interval * 2 * u32::from(self.latency + 1) {
            return Err(Error::InvalidValue);
        }
        if self.channel_map.num_used_channels() < 2 {
            return Err(Error::InvalidValue);
        }
        if !(5..=16).contains(&self.hop) {
            return Err(Error::InvalidValue);
        }
        Ok(())
    }
}

impl FromBytes<'_> for ConnectRequestData {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        let access_address = bytes.read_u32_le()?;
        let crc_init_raw: [u8; 4] = bytes.read_array()?;
        let crc_init = u32::from(crc_init_raw[0])
            | u32::from(crc_init_raw[1]) << 8
            | u32::from(crc_init_raw[2]) << 16;
        let win_size = bytes.read_u8()?;
        let win_offset = Duration::from_micros(u32::from(bytes.read_u16_le()?) * 1250);
        let interval = Duration::from_micros(u32::from(bytes.read_u16_le()?) * 1250);
        let latency = bytes.read_u16_le()?;
        let timeout = Duration::from_micros(u32::from(bytes.read_u16_le()?) * 10_000);
        let map_raw: [u8; 5] = bytes.read_array()?;
        let channel_map = ChannelMap::from_raw(map_raw);
        let hop_and_sca = bytes.read_u8()?;

        Ok(Self {
            access_address,
            crc_init,
            win_size,
            win_offset,
            interval,
            latency,
            timeout,
            channel_map,
            hop: hop_and_sca & 0b1_1111,
            sca: hop_and_sca >> 5,
        })
    }
}

impl ToBytes for ConnectRequestData {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u32_le(self.access_address)?;
        let crc = self.crc_init.to_le_bytes();
        writer.write_slice(&crc[..3])?;
        writer.write_u8(self.win_size)?;
        writer.write_u16_le((self.win_offset.as_micros() / 1250) as u16)?;
        writer.write_u16_le((self.interval.as_micros() / 1250) as u16)?;
        writer.write_u16_le(self.latency)?;
        writer.write_u16_le((self.timeout.as_micros() / 10_000) as u16)?;
        writer.write_slice(&self.channel_map.to_raw())?;
        writer.write_u8((self.sca << 5) | (self.hop & 0b1_1111))?;
        Ok(())
    }
}
