//! Implementation of the Generic Attribute Profile (GATT).
//!
//! GATT layers *Services* and *Characteristics* on top of the Attribute Protocol. A service is a
//! group of attributes starting with a *Primary* or *Secondary Service* declaration and ending
//! right before the next service declaration (or the end of the database); a characteristic is
//! three or four consecutive attributes within that group: a *Characteristic Declaration*, the
//! value itself, and optionally a *Client Characteristic Configuration Descriptor* (CCCD) and/or
//! a *Characteristic User Description*.
//!
//! [`ServiceListBuilder`] assembles these attributes into a flat, handle-ordered table at server
//! construction time; the resulting [`GattServer`] implements [`AttributeProvider`] and can be
//! handed directly to an `AttributeServer`.

pub mod characteristic;
pub mod notification;

use self::characteristic::Properties;
pub use self::notification::NotifyKind;
use self::notification::NotificationQueue;
use crate::{
    att::{AttUuid, Attribute, AttributePermissions, AttributeProvider, Handle, HandleRange},
    bytes::{ByteWriter, ToBytes},
    utils::HexSlice,
    uuid::Uuid16,
    Error,
};
use heapless::{consts::U32, Vec as HVec};

/// Maximum number of notify-/indicate-capable characteristics a single [`GattServer`] can host.
pub const MAX_NOTIFY: usize = notification::MAX_NOTIFY_SLOTS;

/// Maximum number of attributes a single [`GattServer`] can host.
pub const MAX_ATTRIBUTES: usize = 32;

/// Maximum size, in bytes, of a single attribute's value.
///
/// Chosen to comfortably fit a Characteristic Declaration (up to 19 bytes, for a 128-bit UUID)
/// as well as typical sensor-reading or user-description values.
pub const MAX_VALUE_LEN: usize = 32;

type ValueBuf = HVec<u8, U32>;

const PRIMARY_SERVICE: AttUuid = AttUuid::Uuid16(Uuid16(0x2800));
const SECONDARY_SERVICE: AttUuid = AttUuid::Uuid16(Uuid16(0x2801));
const CHARACTERISTIC: AttUuid = AttUuid::Uuid16(Uuid16(0x2803));
const CCCD: AttUuid = AttUuid::Uuid16(Uuid16(0x2902));
const USER_DESCRIPTION: AttUuid = AttUuid::Uuid16(Uuid16(0x2901));

/// Device Name characteristic (GAP service), 0x2A00.
const DEVICE_NAME: AttUuid = AttUuid::Uuid16(Uuid16(0x2A00));
/// Appearance characteristic (GAP service), 0x2A01.
const APPEARANCE: AttUuid = AttUuid::Uuid16(Uuid16(0x2A01));
/// Generic Access service, 0x1800.
const GAP_SERVICE: AttUuid = AttUuid::Uuid16(Uuid16(0x1800));

const DEFAULT_DEVICE_NAME: &[u8] = b"Bluetoe-Server";

struct Slot {
    att_type: AttUuid,
    handle: Handle,
    permissions: AttributePermissions,
    is_service_decl: bool,
    value: ValueBuf,
    /// `Some(index)` on a characteristic's *value* attribute slot when that characteristic has
    /// `NOTIFY` or `INDICATE` set; `index` is its slot in the server's [`NotificationQueue`].
    notify_index: Option<u8>,
}

/// Encodes a UUID into its over-the-wire representation, for embedding in a Characteristic
/// Declaration.
fn encode_uuid(uuid: AttUuid, out: &mut ValueBuf) {
    let mut buf = [0u8; 16];
    let used = {
        let mut writer = ByteWriter::new(&mut buf);
        uuid.to_bytes(&mut writer).expect("UUID too large to encode");
        16 - writer.space_left()
    };
    out.extend_from_slice(&buf[..used])
        .expect("characteristic declaration value exceeds MAX_VALUE_LEN");
}

/// Builds a [`GattServer`]'s attribute table out of services and characteristics.
///
/// Handles are assigned densely, starting at `0x0001`, in the order attributes are added.
pub struct ServiceListBuilder {
    slots: HVec<Slot, U32>,
    next_handle: u16,
    /// Number of notify-/indicate-capable characteristics seen so far; also the next free
    /// [`NotificationQueue`] slot index.
    next_notify_index: u8,
    /// Priorities assigned via [`notify_priority`](Self::notify_priority), applied to the
    /// [`NotificationQueue`] at [`build`](Self::build) time.
    notify_priorities: HVec<(u8, u8), U32>,
    /// The notify index of the characteristic most recently added by [`characteristic`](Self::characteristic),
    /// consulted by [`notify_priority`](Self::notify_priority).
    last_notify_index: Option<u8>,
}

impl ServiceListBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            slots: HVec::new(),
            next_handle: 1,
            next_notify_index: 0,
            notify_priorities: HVec::new(),
            last_notify_index: None,
        }
    }

    fn push(
        &mut self,
        att_type: AttUuid,
        permissions: AttributePermissions,
        value: &[u8],
        is_service_decl: bool,
        notify_index: Option<u8>,
    ) -> Handle {
        let handle = Handle::from_raw(self.next_handle);
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .expect("attribute handle space exhausted");

        let mut buf = ValueBuf::new();
        buf.extend_from_slice(value)
            .expect("attribute value exceeds MAX_VALUE_LEN");

        self.slots
            .push(Slot {
                att_type,
                handle,
                permissions,
                is_service_decl,
                value: buf,
                notify_index,
            })
            .unwrap_or_else(|_| panic!("attribute table exceeds MAX_ATTRIBUTES"));

        handle
    }

    /// Starts a new Primary Service.
    pub fn primary_service(mut self, uuid: AttUuid) -> Self {
        let mut encoded = ValueBuf::new();
        encode_uuid(uuid, &mut encoded);
        self.push(
            PRIMARY_SERVICE,
            AttributePermissions::READABLE,
            &encoded,
            true,
            None,
        );
        self
    }

    /// Starts a new Secondary Service.
    pub fn secondary_service(mut self, uuid: AttUuid) -> Self {
        let mut encoded = ValueBuf::new();
        encode_uuid(uuid, &mut encoded);
        self.push(
            SECONDARY_SERVICE,
            AttributePermissions::READABLE,
            &encoded,
            true,
            None,
        );
        self
    }

    /// Adds a characteristic (a Characteristic Declaration followed by its value) to the
    /// currently open service.
    ///
    /// If `properties` includes `NOTIFY` or `INDICATE`, the characteristic is assigned a slot in
    /// the server's [`notification::NotificationQueue`]; follow this call with [`cccd`](Self::cccd)
    /// to give the client a way to subscribe, and optionally [`notify_priority`](Self::notify_priority)
    /// to change the slot's priority from the default of 0.
    pub fn characteristic(
        mut self,
        uuid: AttUuid,
        properties: Properties,
        value: &[u8],
        permissions: AttributePermissions,
    ) -> Self {
        // The value attribute directly follows the declaration, so its handle is known up front.
        let value_handle = self
            .next_handle
            .checked_add(1)
            .expect("attribute handle space exhausted");

        let mut decl = ValueBuf::new();
        decl.push(properties.bits()).unwrap();
        decl.extend_from_slice(&value_handle.to_le_bytes()).unwrap();
        encode_uuid(uuid, &mut decl);

        self.push(CHARACTERISTIC, AttributePermissions::READABLE, &decl, false, None);

        let notify_index = if properties
            .intersects(Properties::NOTIFY | Properties::INDICATE)
        {
            let index = self.next_notify_index;
            self.next_notify_index = self
                .next_notify_index
                .checked_add(1)
                .expect("notification queue slots exhausted");
            Some(index)
        } else {
            None
        };
        self.last_notify_index = notify_index;

        self.push(uuid, permissions, value, false, notify_index);
        self
    }

    /// Adds a Client Characteristic Configuration Descriptor to the characteristic that was just
    /// added, initialized with notifications and indications disabled.
    ///
    /// Panics (at server-construction time) if the preceding [`characteristic`](Self::characteristic)
    /// call didn't set `NOTIFY` or `INDICATE`.
    pub fn cccd(mut self) -> Self {
        assert!(
            self.last_notify_index.is_some(),
            "cccd() must directly follow a characteristic() with NOTIFY or INDICATE set"
        );
        self.push(
            CCCD,
            AttributePermissions::READABLE | AttributePermissions::WRITEABLE,
            &[0x00, 0x00],
            false,
            None,
        );
        self
    }

    /// Overrides the outgoing priority of the characteristic that was just added (must directly
    /// follow a [`characteristic`](Self::characteristic) call that set `NOTIFY` or `INDICATE`).
    ///
    /// Higher numbers are serviced first by the notification queue when multiple characteristics
    /// have pending notifications/indications at once; the default priority is 0.
    pub fn notify_priority(mut self, priority: u8) -> Self {
        let index = self
            .last_notify_index
            .expect("notify_priority() must directly follow a characteristic() with NOTIFY or INDICATE set");
        self.notify_priorities
            .push((index, priority))
            .unwrap_or_else(|_| panic!("too many notify_priority() overrides"));
        self
    }

    /// Adds a Characteristic User Description descriptor to the characteristic that was just
    /// added.
    pub fn user_description(mut self, text: &[u8]) -> Self {
        self.push(
            USER_DESCRIPTION,
            AttributePermissions::READABLE,
            text,
            false,
            None,
        );
        self
    }

    /// Adds the mandatory GAP service (Generic Access, UUID `0x1800`), exposing the server's
    /// Device Name and Appearance characteristics.
    ///
    /// Every GATT server hosts this service unless the application opts out; see
    /// `no_gap_service_for_gatt_servers` in the Non-goals.
    pub fn gap_service(self, device_name: &[u8], appearance: u16) -> Self {
        self.primary_service(GAP_SERVICE)
            .characteristic(
                DEVICE_NAME,
                Properties::READ,
                device_name,
                AttributePermissions::READABLE,
            )
            .characteristic(
                APPEARANCE,
                Properties::READ,
                &appearance.to_le_bytes(),
                AttributePermissions::READABLE,
            )
    }

    /// Adds the mandatory GAP service with the default device name (`"Bluetoe-Server"`) and
    /// appearance (`Unknown`, `0x0000`).
    pub fn default_gap_service(self) -> Self {
        self.gap_service(DEFAULT_DEVICE_NAME, 0x0000)
    }

    /// Finishes the attribute table.
    pub fn build(self) -> GattServer {
        let mut notify_queue = NotificationQueue::new(self.next_notify_index as usize);
        for (index, priority) in self.notify_priorities.iter() {
            notify_queue.set_priority(*index as usize, *priority);
        }

        GattServer {
            slots: self.slots,
            notify_queue,
        }
    }
}

impl Default for ServiceListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A GATT server, hosting a flattened table of services and characteristics built by a
/// [`ServiceListBuilder`].
///
/// Implements [`AttributeProvider`] and can be wrapped directly in an `AttributeServer`.
pub struct GattServer {
    slots: HVec<Slot, U32>,
    notify_queue: NotificationQueue,
}

impl GattServer {
    fn index_of(&self, handle: Handle) -> Option<usize> {
        self.slots.iter().position(|slot| slot.handle == handle)
    }

    fn notify_slot_index(&self, notify_index: u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.notify_index == Some(notify_index))
    }

    /// Returns `(notifications_enabled, indications_enabled)` for the characteristic whose value
    /// attribute carries `notify_index`, read from its CCCD attribute (the slot directly
    /// following the value attribute).
    fn cccd_state(&self, notify_index: u8) -> (bool, bool) {
        let value_index = match self.notify_slot_index(notify_index) {
            Some(i) => i,
            None => return (false, false),
        };
        match self.slots.get(value_index + 1) {
            Some(slot) if slot.att_type == CCCD => {
                let bits = slot.value.get(0).copied().unwrap_or(0);
                (bits & 0x01 != 0, bits & 0x02 != 0)
            }
            _ => (false, false),
        }
    }

    /// Queues a notification for the characteristic whose value attribute has `handle`.
    ///
    /// Returns `Ok(true)` if this created new work, `Ok(false)` if the client hasn't enabled
    /// notifications for this characteristic (or an identical notification was already queued),
    /// `Err` if `handle` isn't a notify-/indicate-capable characteristic's value handle at all.
    pub fn queue_notification(&mut self, handle: Handle) -> Result<bool, Error> {
        let index = self
            .slots
            .iter()
            .find(|slot| slot.handle == handle)
            .and_then(|slot| slot.notify_index)
            .ok_or(Error::InvalidValue)?;

        let (notify_enabled, _) = self.cccd_state(index);
        if !notify_enabled {
            return Ok(false);
        }
        Ok(self.notify_queue.queue(index as usize, NotifyKind::Notification))
    }

    /// Queues an indication for the characteristic whose value attribute has `handle`. See
    /// [`queue_notification`](Self::queue_notification) for the return value's meaning.
    pub fn queue_indication(&mut self, handle: Handle) -> Result<bool, Error> {
        let index = self
            .slots
            .iter()
            .find(|slot| slot.handle == handle)
            .and_then(|slot| slot.notify_index)
            .ok_or(Error::InvalidValue)?;

        let (_, indicate_enabled) = self.cccd_state(index);
        if !indicate_enabled {
            return Ok(false);
        }
        Ok(self.notify_queue.queue(index as usize, NotifyKind::Indication))
    }

    /// Picks the next pending notification/indication, if any, and returns the handle it targets.
    ///
    /// The caller (typically the Link-Layer's idle-time driver, once transmit buffer space opens
    /// up) is expected to turn this into an actual `notify_raw`/`indicate_raw` call against the
    /// `AttributeServer` wrapping this provider.
    pub fn dequeue_pending(&mut self) -> Option<(NotifyKind, Handle)> {
        let (kind, index) = self.notify_queue.dequeue()?;
        let slot_index = self.notify_slot_index(index as u8)?;
        Some((kind, self.slots[slot_index].handle))
    }

    /// Clears the "awaiting confirmation" gate after a *Handle Value Confirmation* is received.
    pub fn indication_confirmed(&mut self) {
        self.notify_queue.confirmed();
    }

    /// Resets all notification/indication queue state. Call this when the connection ends.
    pub fn reset_notifications(&mut self) {
        self.notify_queue.reset();
    }
}

impl AttributeProvider for GattServer {
    fn for_attrs_in_range(
        &mut self,
        range: HandleRange,
        mut f: impl FnMut(&Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        // Reborrow immutably: attribute values are constructed on the fly from owned storage, so
        // `f` never needs mutable access to `self`.
        let this: &Self = self;
        for slot in this.slots.iter() {
            if !range.contains(slot.handle) {
                continue;
            }

            let attr = Attribute {
                att_type: slot.att_type,
                handle: slot.handle,
                value: HexSlice(slot.value.as_slice()),
                permissions: slot.permissions,
            };
            f(this, &attr)?;
        }
        Ok(())
    }

    fn is_grouping_attr(&self, uuid: AttUuid) -> bool {
        uuid == PRIMARY_SERVICE || uuid == SECONDARY_SERVICE
    }

    fn group_end(&self, handle: Handle) -> Option<Handle> {
        let start = self.index_of(handle)?;
        if !self.slots[start].is_service_decl {
            return None;
        }

        // `position` searches the slice starting at `start + 1`; a match at offset `k` there is
        // the *next* service declaration, so the current group ends one slot earlier.
        let end = self.slots[start + 1..]
            .iter()
            .position(|slot| slot.is_service_decl)
            .map(|offset| start + offset)
            .unwrap_or(self.slots.len() - 1);

        Some(self.slots[end].handle)
    }

    fn write_attr(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error> {
        let index = self.index_of(handle).ok_or(Error::InvalidValue)?;
        let slot = &mut self.slots[index];

        // The CCCD is a fixed 2-byte bitmap (bit 0 = notifications, bit 1 = indications); writes
        // longer than that are rejected rather than silently truncated.
        if slot.att_type == CCCD && value.len() > 2 {
            return Err(Error::InvalidLength);
        }

        slot.value.clear();
        slot.value
            .extend_from_slice(value)
            .map_err(|()| Error::BufferTooSmall)
    }

    fn notification_confirmed(&mut self) {
        self.notify_queue.confirmed();
    }

    fn next_notification(&mut self) -> Option<(bool, Handle)> {
        let (kind, handle) = self.dequeue_pending()?;
        Some((kind == NotifyKind::Indication, handle))
    }

    fn read_attr(&self, handle: Handle, buf: &mut [u8]) -> Option<usize> {
        let slot = self.slots.iter().find(|slot| slot.handle == handle)?;
        let len = slot.value.len().min(buf.len());
        buf[..len].copy_from_slice(&slot.value[..len]);
        Some(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> GattServer {
        ServiceListBuilder::new()
            .primary_service(AttUuid::Uuid16(Uuid16(0x1234)))
            .characteristic(
                AttUuid::Uuid16(Uuid16(0xABCD)),
                Properties::READ | Properties::WRITE | Properties::NOTIFY,
                &[0x11, 0x22],
                AttributePermissions::READABLE | AttributePermissions::WRITEABLE,
            )
            .cccd()
            .user_description(b"thing")
            .secondary_service(AttUuid::Uuid16(Uuid16(0x5678)))
            .characteristic(
                AttUuid::Uuid16(Uuid16(0xEF01)),
                Properties::READ,
                &[0x00],
                AttributePermissions::READABLE,
            )
            .build()
    }

    #[test]
    fn handles_are_dense_ascending_and_start_at_one() {
        let mut gatt = table();
        let mut handles = HVec::<u16, U32>::new();
        gatt.for_each_attr(|_, attr| {
            handles.push(attr.handle.as_u16()).unwrap();
            Ok(())
        })
        .unwrap();

        assert_eq!(handles.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn group_end_spans_exactly_one_service() {
        let gatt = table();
        // First service: decl(1) + characteristic decl(2) + value(3) + cccd(4) + user desc(5).
        assert_eq!(gatt.group_end(Handle::from_raw(1)), Some(Handle::from_raw(5)));
        // Second service: decl(6) + characteristic decl(7) + value(8).
        assert_eq!(gatt.group_end(Handle::from_raw(6)), Some(Handle::from_raw(8)));
        // A non-grouping attribute has no group end.
        assert_eq!(gatt.group_end(Handle::from_raw(3)), None);
    }

    #[test]
    fn read_is_idempotent() {
        let gatt = table();
        let mut buf1 = [0u8; 8];
        let mut buf2 = [0u8; 8];
        let len1 = gatt.read_attr(Handle::from_raw(3), &mut buf1).unwrap();
        let len2 = gatt.read_attr(Handle::from_raw(3), &mut buf2).unwrap();
        assert_eq!(len1, len2);
        assert_eq!(buf1[..len1], buf2[..len2]);
        assert_eq!(&buf1[..len1], &[0x11, 0x22]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut gatt = table();
        gatt.write_attr(Handle::from_raw(3), &[0xAA, 0xBB, 0xCC])
            .unwrap();

        let mut buf = [0u8; 8];
        let len = gatt.read_attr(Handle::from_raw(3), &mut buf).unwrap();
        assert_eq!(&buf[..len], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn notification_requires_cccd_to_be_enabled_first() {
        let mut gatt = table();
        // Notifications disabled by default (cccd() initializes to 0x0000).
        assert_eq!(gatt.queue_notification(Handle::from_raw(3)).unwrap(), false);

        gatt.write_attr(Handle::from_raw(4), &[0x01, 0x00]).unwrap();
        assert_eq!(gatt.queue_notification(Handle::from_raw(3)).unwrap(), true);

        let (kind, handle) = gatt.dequeue_pending().unwrap();
        assert_eq!(kind, NotifyKind::Notification);
        assert_eq!(handle, Handle::from_raw(3));
        assert!(gatt.dequeue_pending().is_none());
    }

    #[test]
    fn queue_notification_on_non_notifying_handle_errors() {
        let mut gatt = table();
        // Handle 8 is a plain READ-only characteristic value with no NOTIFY/INDICATE property.
        assert!(gatt.queue_notification(Handle::from_raw(8)).is_err());
    }

    #[test]
    fn for_attrs_in_range_respects_bounds() {
        let mut gatt = table();
        let mut seen = HVec::<u16, U32>::new();
        gatt.for_attrs_in_range(
            HandleRange::new(Handle::from_raw(6), Handle::from_raw(8)),
            |_, attr| {
                seen.push(attr.handle.as_u16()).unwrap();
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(seen.as_slice(), &[6, 7, 8]);
    }
}
