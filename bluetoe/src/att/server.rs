//! ATT server implementation.

use super::{
    pdus::{AttPdu, ByGroupAttData, ByTypeAttData, ErrorCode, Opcode},
    AttError, Attribute, AttributeProvider, AttUuid, ConnectionSecurity, Handle, HandleRange,
    Operation,
};
use crate::bytes::{ByteReader, FromBytes, ToBytes};
use crate::l2cap::{Protocol, ProtocolObj, Sender};
use crate::uuid::Uuid16;
use crate::Error;
use heapless::{consts::U4, Vec as HVec};

/// Maximum size of a value fragment accepted in a single *Prepare Write Request*.
///
/// Bounded by `RSP_PDU_SIZE` (the fixed ATT_MTU this server negotiates): a Prepare Write Request
/// PDU has a 5 byte header (opcode, handle, offset), leaving at most `RSP_PDU_SIZE - 5` bytes of
/// value per fragment.
const PREPARE_VALUE_CAP: usize = 18;

/// Size of the scratch buffer used to read an attribute's current value while splicing a
/// *Prepare Write* fragment into it; must be at least as large as any attribute value this
/// server hosts.
const PREPARE_COMMIT_CAP: usize = 64;

type PrepareValue = HVec<u8, heapless::consts::U18>;

struct PrepareEntry {
    handle: Handle,
    offset: u16,
    value: PrepareValue,
}

/// The server's queue of pending *Prepare Write Request* fragments.
///
/// Bluetoe supports a single, server-wide queue (rather than one queue per client), which matches
/// its single-connection, peripheral-only design.
struct PrepareQueue {
    entries: HVec<PrepareEntry, U4>,
}

impl PrepareQueue {
    fn new() -> Self {
        PrepareQueue {
            entries: HVec::new(),
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn push(&mut self, handle: Handle, offset: u16, value: &[u8]) -> Result<(), ErrorCode> {
        if value.len() > PREPARE_VALUE_CAP {
            return Err(ErrorCode::InvalidAttributeValueLength);
        }

        let mut buf = PrepareValue::new();
        buf.extend_from_slice(value)
            .map_err(|()| ErrorCode::InvalidAttributeValueLength)?;

        self.entries
            .push(PrepareEntry {
                handle,
                offset,
                value: buf,
            })
            .map_err(|_| ErrorCode::PrepareQueueFull)
    }
}

/// An Attribute Protocol server providing read and write access to stored attributes.
pub struct AttributeServer<A: AttributeProvider> {
    attrs: A,
    mtu: u16,
    security: ConnectionSecurity,
    prepare_queue: PrepareQueue,
    indication_pending: bool,
}

/// Error code for a single-handle request that addressed no attribute.
///
/// `Handle::NULL` (`0x0000`) is never assigned to a real attribute, so it always reports
/// `InvalidHandle`; any other missing handle reports `AttributeNotFound`, reserving
/// `InvalidHandle` strictly for the null handle.
fn no_such_handle(handle: Handle) -> ErrorCode {
    if handle == Handle::NULL {
        ErrorCode::InvalidHandle
    } else {
        ErrorCode::AttributeNotFound
    }
}

impl<A: AttributeProvider> AttributeServer<A> {
    /// Creates an `AttributeServer` hosting attributes from an `AttributeProvider`.
    pub fn new(attrs: A) -> Self {
        Self {
            attrs,
            mtu: u16::from(Self::RSP_PDU_SIZE),
            security: ConnectionSecurity::NONE,
            prepare_queue: PrepareQueue::new(),
            indication_pending: false,
        }
    }

    /// Prepares for performing a server-initiated action (eg. sending a notification/indication).
    ///
    /// The caller must ensure that `sender` has at least `RSP_PDU_SIZE` bytes of free space
    /// available.
    ///
    /// It is usually not necessary to use this function. Instead, call `L2CAPStateTx::att`.
    pub fn with_sender<'a>(&'a mut self, sender: Sender<'a>) -> AttributeServerTx<'a, A> {
        AttributeServerTx {
            server: self,
            sender,
        }
    }

    /// Provides mutable access to the underlying `AttributeProvider`.
    pub fn provider(&mut self) -> &mut A {
        &mut self.attrs
    }

    /// Updates the security properties of the underlying connection.
    ///
    /// Called by the Link-Layer connection engine after a change in encryption state (eg. once
    /// `LL_START_ENC_RSP` has been exchanged).
    pub fn set_security(&mut self, security: ConnectionSecurity) {
        self.security = security;
    }

    /// Drains one queued notification/indication from the underlying `AttributeProvider`, if any,
    /// and sends it.
    ///
    /// Returns `true` if something was sent. The caller (typically the Link-Layer's idle-time
    /// driver, whenever a connection event leaves transmit buffer space free) should call this
    /// opportunistically rather than only in response to incoming ATT requests, so that queued
    /// notifications/indications go out promptly instead of waiting for the next client request.
    pub fn send_pending_notification(&mut self, sender: Sender<'_>) -> bool {
        if self.indication_pending {
            return false;
        }
        let (is_indication, handle) = match self.attrs.next_notification() {
            Some(v) => v,
            None => return false,
        };
        let mut buf = [0u8; Self::RSP_PDU_SIZE as usize];
        let len = self.attrs.read_attr(handle, &mut buf).unwrap_or(0);

        let tx = self.with_sender(sender);
        if is_indication {
            tx.indicate_raw(handle, &buf[..len]);
        } else {
            tx.notify_raw(handle, &buf[..len]);
        }
        true
    }

    /// Whether the server is still waiting for a confirmation of a previously sent indication.
    ///
    /// While this is `true`, the higher-level notification/indication queue must not send another
    /// indication; only one indication may be outstanding per connection at a time.
    pub fn indication_pending(&self) -> bool {
        self.indication_pending
    }

    /// Returns the `ATT_MTU` value, the maximum size of an ATT PDU that can be processed and sent
    /// out by the server.
    fn att_mtu(&self) -> u16 {
        self.mtu
    }

    /// Process an incoming request (or command) PDU and return a response.
    ///
    /// This may return an `AttError`, which the caller will then send as a response. In the success
    /// case, this method will send the response (if any).
    fn process_request(
        &mut self,
        msg: &AttPdu<'_>,
        responder: &mut Sender<'_>,
    ) -> Result<(), AttError> {
        /// Error returned when an ATT error should be sent back.
        ///
        /// Returning this from inside `responder.send_with` will not send the response and
        /// instead bail out of the closure.
        struct RspError(AttError);

        impl From<Error> for RspError {
            fn from(e: Error) -> Self {
                panic!("unexpected error: {}", e);
            }
        }

        impl From<AttError> for RspError {
            fn from(att: AttError) -> Self {
                RspError(att)
            }
        }

        match msg {
            AttPdu::ExchangeMtuReq { mtu } => {
                self.mtu = (*mtu).min(u16::from(Self::RSP_PDU_SIZE));

                responder
                    .send(AttPdu::ExchangeMtuRsp {
                        mtu: u16::from(Self::RSP_PDU_SIZE),
                    })
                    .unwrap();
                Ok(())
            }

            AttPdu::FindInformationReq { handle_range } => {
                let range = handle_range.check()?;

                let result = responder.send_with(|writer| {
                    writer.write_u8(Opcode::FindInformationRsp.into())?;
                    let format = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut chosen: Option<u8> = None;
                    let mut wrote_any = false;
                    self.attrs.for_attrs_in_range(range, |_provider, attr| {
                        let (this_format, entry_len) = match attr.att_type {
                            AttUuid::Uuid16(_) => (1u8, 2 + 2usize),
                            AttUuid::Uuid128(_) => (2u8, 2 + 16usize),
                        };

                        if *chosen.get_or_insert(this_format) != this_format {
                            return Ok(());
                        }
                        if writer.space_left() < entry_len {
                            return Ok(());
                        }

                        writer.write_u16_le(attr.handle.as_u16())?;
                        attr.att_type.to_bytes(writer)?;
                        wrote_any = true;
                        Ok(())
                    })?;

                    if wrote_any {
                        *format = chosen.unwrap();
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::FindByTypeValueReq {
                handle_range,
                attribute_type,
                attribute_value,
            } => {
                let range = handle_range.check()?;
                let type_uuid = AttUuid::from(Uuid16(*attribute_type));

                // Only service-group lookups ("Discover Primary Service by Service UUID") are
                // supported, matching how this opcode is used by GATT in practice.
                if !self.attrs.is_grouping_attr(type_uuid) {
                    return Err(AttError::new(ErrorCode::UnsupportedGroupType, range.start()));
                }

                let result = responder.send_with(|writer| {
                    writer.write_u8(Opcode::FindByTypeValueRsp.into())?;

                    let mut wrote_any = false;
                    self.attrs.for_attrs_in_range(range, |provider, attr| {
                        if attr.att_type == type_uuid
                            && attr.value.as_slice() == attribute_value.as_slice()
                        {
                            if writer.space_left() < 4 {
                                return Ok(());
                            }

                            let end = provider.group_end(attr.handle).unwrap_or(attr.handle);

                            writer.write_u16_le(attr.handle.as_u16())?;
                            writer.write_u16_le(end.as_u16())?;
                            wrote_any = true;
                        }
                        Ok(())
                    })?;

                    if wrote_any {
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadByTypeReq {
                handle_range,
                attribute_type,
            } => {
                let range = handle_range.check()?;

                let result = responder.send_with(|writer| {
                    // If no attributes match request, return `AttributeNotFound` error, else send
                    // `ReadByTypeResponse` with at least one entry

                    writer.write_u8(Opcode::ReadByTypeRsp.into())?;
                    let length = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut size = None;
                    let mut perm_err = None;
                    let security = self.security;
                    let att_mtu = self.mtu as u8;
                    self.attrs
                        .for_attrs_in_range(range, |_provider, attr| {
                            if attr.att_type == *attribute_type {
                                if let Err(e) = attr.check(Operation::Read, security) {
                                    perm_err.get_or_insert(e);
                                    return Ok(());
                                }

                                let data =
                                    ByTypeAttData::new(att_mtu, attr.handle, attr.value.as_slice());
                                if size == Some(data.encoded_size()) || size.is_none() {
                                    // Can try to encode `data`. If we run out of space, end the list.
                                    data.to_bytes(writer)?;
                                    size = Some(data.encoded_size());
                                }
                            }

                            Ok(())
                        })
                        .ok();

                    if let Some(size) = size {
                        // At least one attr
                        *length = size;
                        Ok(())
                    } else if let Some(e) = perm_err {
                        Err(e.into())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadByGroupReq {
                handle_range,
                group_type,
            } => {
                let range = handle_range.check()?;

                // Reject if `group_type` is not a grouping attribute
                if !self.attrs.is_grouping_attr(*group_type) {
                    return Err(AttError::new(
                        ErrorCode::UnsupportedGroupType,
                        range.start(),
                    ));
                }

                let result = responder.send_with(|writer| {
                    // If no attributes match request, return `AttributeNotFound` error, else send
                    // response with at least one entry.

                    writer.write_u8(Opcode::ReadByGroupRsp.into())?;
                    let length = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut size = None;
                    let att_mtu = self.mtu as u8;
                    self.attrs
                        .for_attrs_in_range(range, |provider, attr| {
                            if attr.att_type == *group_type {
                                let data = ByGroupAttData::new(
                                    att_mtu,
                                    attr.handle,
                                    provider.group_end(attr.handle).unwrap(),
                                    attr.value.as_slice(),
                                );
                                if size == Some(data.encoded_size()) || size.is_none() {
                                    // Can try to encode `data`. If we run out of space, end the list.
                                    data.to_bytes(writer)?;
                                    size = Some(data.encoded_size());
                                }
                            }

                            Ok(())
                        })
                        .ok();

                    if let Some(size) = size {
                        // At least one attr
                        *length = size;
                        debug!(
                            "ATT->ReadByGroupRsp (size={}, left={})",
                            size,
                            writer.space_left()
                        );
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadReq { handle } => {
                let security = self.security;
                let mut found = false;
                let mut perm_err = None;

                let result = responder.send_with(|writer| -> Result<(), Error> {
                    writer.write_u8(Opcode::ReadRsp.into())?;

                    self.attrs.for_attrs_in_range(
                        HandleRange::new(*handle, *handle),
                        |_provider, attr| {
                            found = true;
                            if let Err(e) = attr.check(Operation::Read, security) {
                                perm_err = Some(e);
                                return Ok(());
                            }

                            let value = if writer.space_left() < attr.value.as_slice().len() {
                                &attr.value.as_slice()[..writer.space_left()]
                            } else {
                                attr.value.as_slice()
                            };
                            writer.write_slice(value)
                        },
                    )?;

                    Ok(())
                });

                if let Some(e) = perm_err {
                    return Err(e);
                }
                if !found {
                    return Err(AttError::new(no_such_handle(*handle), *handle));
                }

                result.map_err(|RspError(e)| e)?;
                Ok(())
            }

            AttPdu::ReadBlobReq { handle, offset } => {
                let security = self.security;
                let mut found = false;
                let mut perm_err = None;
                let mut off_err = false;

                let result = responder.send_with(|writer| -> Result<(), Error> {
                    writer.write_u8(Opcode::ReadBlobRsp.into())?;

                    self.attrs.for_attrs_in_range(
                        HandleRange::new(*handle, *handle),
                        |_provider, attr| {
                            found = true;
                            if let Err(e) = attr.check(Operation::Read, security) {
                                perm_err = Some(e);
                                return Ok(());
                            }

                            let full = attr.value.as_slice();
                            if usize::from(*offset) > full.len() {
                                off_err = true;
                                return Ok(());
                            }

                            let rest = &full[usize::from(*offset)..];
                            let value = if writer.space_left() < rest.len() {
                                &rest[..writer.space_left()]
                            } else {
                                rest
                            };
                            writer.write_slice(value)
                        },
                    )?;

                    Ok(())
                });

                if let Some(e) = perm_err {
                    return Err(e);
                }
                if !found {
                    return Err(AttError::new(no_such_handle(*handle), *handle));
                }
                if off_err {
                    return Err(AttError::new(ErrorCode::InvalidOffset, *handle));
                }

                result.map_err(|RspError(e)| e)?;
                Ok(())
            }

            AttPdu::ReadMultipleReq { handles } => {
                let raw = handles.as_slice();
                if raw.len() < 4 || raw.len() % 2 != 0 {
                    // Fewer than 2 handles (2 bytes each) were supplied.
                    return Err(AttError::new(ErrorCode::InvalidPdu, Handle::NULL));
                }

                let security = self.security;

                let result = responder.send_with(|writer| -> Result<(), Error> {
                    writer.write_u8(Opcode::ReadMultipleRsp.into())?;

                    for chunk in raw.chunks(2) {
                        let handle = Handle::from_raw(u16::from(chunk[0]) | (u16::from(chunk[1]) << 8));

                        let mut found = false;
                        let mut perm_err = None;
                        self.attrs.for_attrs_in_range(
                            HandleRange::new(handle, handle),
                            |_provider, attr| {
                                found = true;
                                if let Err(e) = attr.check(Operation::Read, security) {
                                    perm_err = Some(e);
                                    return Ok(());
                                }

                                let rest = attr.value.as_slice();
                                let value = if writer.space_left() < rest.len() {
                                    &rest[..writer.space_left()]
                                } else {
                                    rest
                                };
                                writer.write_slice(value)
                            },
                        )?;

                        if !found {
                            return Err(AttError::new(no_such_handle(handle), handle).into());
                        }
                        if let Some(e) = perm_err {
                            return Err(AttError::new(e, handle).into());
                        }
                    }

                    Ok(())
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::WriteReq { handle, value } => {
                self.write_attribute(*handle, value.as_slice())?;

                responder
                    .send_with(|writer| -> Result<(), Error> {
                        writer.write_u8(Opcode::WriteRsp.into())?;
                        Ok(())
                    })
                    .unwrap();
                Ok(())
            }

            AttPdu::WriteCommand { handle, value } => {
                // Errors are silently discarded, per the ATT spec's rules for Command PDUs.
                let _ = self.write_attribute(*handle, value.as_slice());
                Ok(())
            }

            AttPdu::SignedWriteCommand { .. } => {
                // Authenticated Signed Write requires CSRK-based signature verification, which is
                // not implemented. Silently ignored, like any other unsupported command.
                Ok(())
            }

            AttPdu::PrepareWriteReq {
                handle,
                offset,
                value,
            } => {
                let handle = *handle;
                let offset = *offset;

                match self
                    .prepare_queue
                    .push(handle, offset, value.as_slice())
                {
                    Ok(()) => {
                        responder
                            .send(AttPdu::PrepareWriteRsp {
                                handle,
                                offset,
                                value: *value,
                            })
                            .unwrap();
                        Ok(())
                    }
                    Err(code) => Err(AttError::new(code, handle)),
                }
            }

            AttPdu::ExecuteWriteReq { flags } => match *flags {
                0x00 => {
                    self.prepare_queue.clear();
                    responder.send(AttPdu::ExecuteWriteRsp).unwrap();
                    Ok(())
                }
                0x01 => match self.commit_prepared_writes() {
                    Ok(()) => {
                        responder.send(AttPdu::ExecuteWriteRsp).unwrap();
                        Ok(())
                    }
                    Err(e) => {
                        self.prepare_queue.clear();
                        Err(e)
                    }
                },
                _ => Err(AttError::new(ErrorCode::InvalidPdu, Handle::NULL)),
            },

            AttPdu::HandleValueConfirmation => {
                // A confirmation with no outstanding indication is tolerated rather than treated
                // as a protocol error, since some clients re-confirm after a reconnect.
                self.indication_pending = false;
                self.attrs.notification_confirmed();
                Ok(())
            }

            // Responses are always invalid here
            AttPdu::ErrorRsp { .. }
            | AttPdu::ExchangeMtuRsp { .. }
            | AttPdu::FindInformationRsp { .. }
            | AttPdu::FindByTypeValueRsp { .. }
            | AttPdu::ReadByTypeRsp { .. }
            | AttPdu::ReadRsp { .. }
            | AttPdu::ReadBlobRsp { .. }
            | AttPdu::ReadMultipleRsp { .. }
            | AttPdu::ReadByGroupRsp { .. }
            | AttPdu::WriteRsp { .. }
            | AttPdu::PrepareWriteRsp { .. }
            | AttPdu::ExecuteWriteRsp { .. }
            | AttPdu::HandleValueNotification { .. }
            | AttPdu::HandleValueIndication { .. } => {
                Err(AttError::new(ErrorCode::InvalidPdu, Handle::NULL))
            }

            // Unknown (undecoded) requests and commands.
            AttPdu::Unknown { .. } => {
                if msg.opcode().is_command() {
                    Ok(())
                } else {
                    Err(AttError::new(ErrorCode::RequestNotSupported, Handle::NULL))
                }
            }
        }
    }

    /// Validates permissions and performs a single attribute write.
    fn write_attribute(&mut self, handle: Handle, value: &[u8]) -> Result<(), AttError> {
        let security = self.security;
        let mut found = false;
        let mut perm_err = None;

        self.attrs
            .for_attrs_in_range(HandleRange::new(handle, handle), |_provider, attr| {
                found = true;
                if let Err(e) = attr.check(Operation::Write, security) {
                    perm_err = Some(e);
                }
                Ok(())
            })
            .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))?;

        if !found {
            return Err(AttError::new(no_such_handle(handle), handle));
        }
        if let Some(e) = perm_err {
            return Err(e);
        }

        self.attrs.write_attr(handle, value).map_err(|e| {
            let code = match e {
                Error::BufferTooSmall | Error::InvalidLength => {
                    ErrorCode::InvalidAttributeValueLength
                }
                _ => ErrorCode::UnlikelyError,
            };
            AttError::new(code, handle)
        })
    }

    /// Applies every queued *Prepare Write Request* fragment, one at a time, in the exact order
    /// the fragments were queued.
    ///
    /// Each fragment is spliced into its attribute's *current* stored value at the fragment's
    /// own offset - bytes outside `offset..offset + fragment.len()` are left untouched, so two
    /// fragments queued for the same handle at disjoint, non-contiguous offsets (eg. offset 0 and
    /// offset 8 into a 16-byte value) both apply without clobbering the bytes between or after
    /// them. Fragments are validated and applied fragment-by-fragment rather than grouped and
    /// validated up front: if fragment N fails, every fragment `0..N-1` (including earlier
    /// fragments for the same handle) stays applied, fragment N and everything after it is not
    /// applied, and the returned error identifies fragment N's handle - "at-most-once on success,
    /// at-least-zero on the first failure", not all-or-nothing.
    fn commit_prepared_writes(&mut self) -> Result<(), AttError> {
        for i in 0..self.prepare_queue.entries.len() {
            let handle = self.prepare_queue.entries[i].handle;
            let offset = usize::from(self.prepare_queue.entries[i].offset);
            let mut fragment = PrepareValue::new();
            fragment
                .extend_from_slice(&self.prepare_queue.entries[i].value)
                .unwrap_or_else(|()| unreachable!("fragment already fit in the queue"));

            let security = self.security;
            let mut found = false;
            let mut perm_err = None;
            self.attrs
                .for_attrs_in_range(HandleRange::new(handle, handle), |_provider, attr| {
                    found = true;
                    if let Err(e) = attr.check(Operation::Write, security) {
                        perm_err = Some(e);
                    }
                    Ok(())
                })
                .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))?;

            if !found {
                return Err(AttError::new(no_such_handle(handle), handle));
            }
            if let Some(e) = perm_err {
                return Err(e);
            }

            // Read the attribute's current value so the fragment can be spliced into it rather
            // than replacing the whole thing.
            let mut current = [0u8; PREPARE_COMMIT_CAP];
            let current_len = self
                .attrs
                .read_attr(handle, &mut current)
                .ok_or_else(|| AttError::new(no_such_handle(handle), handle))?;

            if offset > current_len {
                return Err(AttError::new(ErrorCode::InvalidOffset, handle));
            }
            let end = offset
                .checked_add(fragment.len())
                .filter(|&end| end <= current_len)
                .ok_or_else(|| AttError::new(ErrorCode::InvalidAttributeValueLength, handle))?;

            current[offset..end].copy_from_slice(&fragment);

            self.attrs
                .write_attr(handle, &current[..current_len])
                .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))?;
        }

        self.prepare_queue.clear();
        Ok(())
    }
}

impl<A: AttributeProvider> ProtocolObj for AttributeServer<A> {
    fn process_message(&mut self, message: &[u8], mut responder: Sender<'_>) -> Result<(), Error> {
        let pdu = &AttPdu::from_bytes(&mut ByteReader::new(message))?;
        let opcode = pdu.opcode();
        debug!("ATT<- {:?}", pdu);

        match self.process_request(pdu, &mut responder) {
            Ok(()) => Ok(()),
            Err(att_error) => {
                debug!("ATT-> {:?}", att_error);

                responder.send(AttPdu::ErrorRsp {
                    opcode,
                    handle: att_error.handle(),
                    error_code: att_error.error_code(),
                })
            }
        }
    }
}

impl<A: AttributeProvider> Protocol for AttributeServer<A> {
    const RSP_PDU_SIZE: u8 = 23;
}

/// An ATT server handle that can send packets and initiate actions.
///
/// This type is needed for any server-initiated procedure, where the server sends out a packet on
/// its own instead of reacting to a client packet.
pub struct AttributeServerTx<'a, A: AttributeProvider> {
    server: &'a mut AttributeServer<A>,

    sender: Sender<'a>,
}

impl<'a, A: AttributeProvider> AttributeServerTx<'a, A> {
    /// Sends an attribute value notification to the connected client.
    ///
    /// Notifications are not acknowledged by the client.
    ///
    /// If `value` is too large to be transmitted in a single `ATT_MTU`, it will be truncated to
    /// fit. A client may fetch the rest of the truncated value by using a *Read Blob Request*.
    /// If this is unwanted, only notify with a `value` of 19 Bytes or less.
    pub fn notify_raw(mut self, handle: Handle, value: &[u8]) {
        // This cannot fail. The `self` guarantees that there's `RSP_PDU_SIZE` bytes free in
        // `sender`, and is consumed by this method. `AttPdu`s encoder will truncate `value` to fit
        // and doesn't error.
        self.sender
            .send(AttPdu::HandleValueNotification {
                handle,
                value: crate::utils::HexSlice(value),
            })
            .unwrap()
    }

    /// Sends an attribute value indication to the connected client.
    ///
    /// Unlike notifications, indications are acknowledged by the client via a *Handle Value
    /// Confirmation*. Only one indication may be outstanding at a time; callers should check
    /// [`AttributeServer::indication_pending`] first.
    ///
    /// [`AttributeServer::indication_pending`]: struct.AttributeServer.html#method.indication_pending
    pub fn indicate_raw(mut self, handle: Handle, value: &[u8]) {
        self.server.indication_pending = true;
        self.sender
            .send(AttPdu::HandleValueIndication {
                handle,
                value: crate::utils::HexSlice(value),
            })
            .unwrap()
    }
}
