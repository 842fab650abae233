//! Implementation of the Attribute Protocol (ATT).
//!
//! ATT always runs over L2CAP channel `0x0004`, which is connected by default as soon as the
//! Link-Layer connection is established.
//!
//! ATT is used by GATT, the *Generic Attribute Profile*, which introduces the concept of *Services*
//! and *Characteristics* which can all be accessed and discovered over the Attribute Protocol.
//!
//! # Attributes
//!
//! The ATT server hosts a list of *Attributes*, which consist of the following:
//!
//! * A 16-bit *Attribute Handle* ([`Handle`]) uniquely identifying the attribute.
//! * A 16- or 128-bit UUID identifying the attribute type. This provides information about how to
//!   interpret the attribute's value (eg. as a little-endian 32-bit integer).
//! * The attribute's *value*, consisting of a dynamically-sized byte array of up to 512 Bytes.
//! * A set of *permissions* ([`AttributePermissions`]), restricting the operations that can be
//!   performed on the attribute and whether the underlying Link-Layer connection must be
//!   encrypted or authenticated to perform them.
//!
//! ## Attribute Grouping
//!
//! Some attribute types (eg. *Primary Service* and *Secondary Service*) act as the start of a
//! *group* of attributes that semantically belong together (a service's declaration and its
//! characteristics). *Read By Group Type* requests return, for every matching attribute, both its
//! handle and the handle of the last attribute in its group, so a client can discover the
//! boundaries of every service without fetching each attribute individually.
//!
//! [`Handle`]: struct.Handle.html
//! [`AttributePermissions`]: struct.AttributePermissions.html

mod handle;
mod pdus;
mod server;
mod uuid;

use {
    self::{handle::*, pdus::*},
    crate::{utils::HexSlice, Error},
    bitflags::bitflags,
};

pub use self::handle::{Handle, HandleRange, RawHandleRange};
pub use self::pdus::{AttError, ErrorCode};
pub use self::server::{AttributeServer, AttributeServerTx};
pub use self::uuid::AttUuid;

bitflags! {
    /// Access restrictions placed on an [`Attribute`].
    ///
    /// These gate which ATT operations the server will perform on the attribute, and whether the
    /// underlying Link-Layer connection must be encrypted or authenticated beforehand.
    ///
    /// [`Attribute`]: struct.Attribute.html
    pub struct AttributePermissions: u8 {
        /// The attribute's value may be read (*Read*, *Read Blob*, *Read By Type*, ...).
        const READABLE = 0b0000_0001;
        /// The attribute's value may be written (*Write Request/Command*, *Prepare/Execute Write*).
        const WRITEABLE = 0b0000_0010;
        /// Reads and writes require an encrypted connection.
        const REQUIRES_ENCRYPTION = 0b0000_0100;
        /// Reads and writes require an authenticated (not just encrypted) connection.
        const REQUIRES_AUTHENTICATION = 0b0000_1000;
    }
}

impl Default for AttributePermissions {
    /// Readable, unencrypted, unauthenticated access. The permission level of most GATT
    /// declaration and descriptor attributes.
    fn default() -> Self {
        AttributePermissions::READABLE
    }
}

/// The security properties of the underlying connection, as seen by the ATT server.
///
/// Updated by the Link-Layer connection engine whenever the encryption state of the connection
/// changes (eg. after a successful `LL_START_ENC_RSP` exchange).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSecurity {
    encrypted: bool,
    authenticated: bool,
}

impl ConnectionSecurity {
    /// A connection with no encryption and no authentication (the default after connecting).
    pub const NONE: Self = ConnectionSecurity {
        encrypted: false,
        authenticated: false,
    };

    /// Creates a `ConnectionSecurity` describing an encrypted connection.
    ///
    /// `authenticated` should be `true` if the encryption key was established via an
    /// authenticated pairing method (eg. Passkey Entry or Numeric Comparison) rather than *Just
    /// Works*.
    pub fn encrypted(authenticated: bool) -> Self {
        ConnectionSecurity {
            encrypted: true,
            authenticated,
        }
    }

    /// Returns whether the connection is encrypted with a Link-Layer encryption key.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns whether the connection was encrypted using an authenticated pairing procedure.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Checks `self` against the permissions required by an attribute, returning the `ErrorCode`
    /// that should be sent back if access must be denied.
    fn check(&self, perms: AttributePermissions, op: Operation) -> Result<(), ErrorCode> {
        let required = match op {
            Operation::Read => AttributePermissions::READABLE,
            Operation::Write => AttributePermissions::WRITEABLE,
        };

        if !perms.contains(required) {
            return Err(match op {
                Operation::Read => ErrorCode::ReadNotPermitted,
                Operation::Write => ErrorCode::WriteNotPermitted,
            });
        }

        if perms.contains(AttributePermissions::REQUIRES_AUTHENTICATION) && !self.authenticated {
            return Err(ErrorCode::InsufficientAuthentication);
        }

        if perms.contains(AttributePermissions::REQUIRES_ENCRYPTION) && !self.encrypted {
            return Err(ErrorCode::InsufficientEncryption);
        }

        Ok(())
    }
}

/// Distinguishes a read access from a write access when checking [`AttributePermissions`].
///
/// [`AttributePermissions`]: struct.AttributePermissions.html
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operation {
    Read,
    Write,
}

/// An ATT server attribute
pub struct Attribute<'a> {
    /// The type of the attribute as a UUID16, EG "Primary Service" or "Anaerobic Heart Rate Lower Limit"
    pub att_type: AttUuid,
    /// Unique server-side identifer for attribute
    pub handle: Handle,
    /// Attribute values can be any fixed length or variable length octet array, which if too large
    /// can be sent across multiple PDUs
    pub value: HexSlice<&'a [u8]>,
    /// Access restrictions for this attribute.
    pub permissions: AttributePermissions,
}

impl<'a> Attribute<'a> {
    /// Creates a readable, unencrypted attribute with the default permission set.
    pub fn new(att_type: AttUuid, handle: Handle, value: &'a [u8]) -> Self {
        Attribute {
            att_type,
            handle,
            value: HexSlice(value),
            permissions: AttributePermissions::default(),
        }
    }

    /// Builder-style setter for the attribute's [`AttributePermissions`].
    ///
    /// [`AttributePermissions`]: struct.AttributePermissions.html
    pub fn with_permissions(mut self, permissions: AttributePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    fn check(&self, op: Operation, security: ConnectionSecurity) -> Result<(), AttError> {
        security
            .check(self.permissions, op)
            .map_err(|code| AttError::new(code, self.handle))
    }
}

/// Trait for attribute sets that can be hosted by an `AttributeServer`.
pub trait AttributeProvider {
    /// Calls a closure `f` with every attribute in `self` whose handle falls in `range`.
    ///
    /// All attributes will have ascending, consecutive handle values starting at `0x0001`.
    ///
    /// If `f` returns an error, this function will stop calling `f` and propagate the error
    /// upwards. If `f` returns `Ok(())`, iteration will continue.
    fn for_attrs_in_range(
        &mut self,
        range: HandleRange,
        f: impl FnMut(&Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error>
    where
        Self: Sized;

    /// Calls a closure `f` with every attribute stored in `self`.
    fn for_each_attr(
        &mut self,
        f: impl FnMut(&Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.for_attrs_in_range(
            HandleRange::new(Handle::from_raw(0x0001), Handle::from_raw(0xFFFF)),
            f,
        )
    }

    /// Returns whether the `filter` closure matches any attribute in `self`.
    fn any(&mut self, mut filter: impl FnMut(&Attribute<'_>) -> bool) -> bool
    where
        Self: Sized,
    {
        match self.for_each_attr(|_provider, att| {
            if filter(att) {
                Err(Error::Eof)
            } else {
                Ok(())
            }
        }) {
            Err(Error::Eof) => true,
            _ => false,
        }
    }

    /// Returns whether `uuid` is a valid grouping attribute that can be used in *Read By Group
    /// Type* requests.
    fn is_grouping_attr(&self, uuid: AttUuid) -> bool;

    /// Queries the handle of the last attribute that is part of the attribute group denoted by
    /// the grouping attribute at `handle`.
    ///
    /// If `handle` does not refer to a grouping attribute, returns `None`.
    fn group_end(&self, handle: Handle) -> Option<Handle>;

    /// Writes `value` to the attribute identified by `handle`.
    ///
    /// Implementors only need to perform the raw write; permission and length checks are already
    /// done by the `AttributeServer` before this is called.
    fn write_attr(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error>;

    /// Called when the `AttributeServer` receives a *Handle Value Confirmation*, i.e. the peer
    /// acknowledged the most recent indication.
    ///
    /// Providers that track their own outstanding-indication state (eg. a per-characteristic
    /// notification/indication priority queue) should clear it here. The default implementation
    /// does nothing, for providers with no such state.
    fn notification_confirmed(&mut self) {}

    /// Picks the next queued notification/indication this provider wants sent, if any.
    ///
    /// Returns `(is_indication, handle)`. `AttributeServer::send_pending_notification` calls this
    /// on every idle-time opportunity, reads the attribute's current value via `read_attr`, and
    /// sends it. The default implementation never queues anything.
    fn next_notification(&mut self) -> Option<(bool, Handle)> {
        None
    }

    /// Copies the current value of the attribute at `handle` into `buf`, returning the number of
    /// bytes written, or `None` if `handle` doesn't exist.
    ///
    /// Used to fetch a characteristic's current value for a notification/indication without
    /// performing a full ATT read (no permission/offset handling; the caller already knows the
    /// handle is valid and readable by construction).
    fn read_attr(&self, handle: Handle, buf: &mut [u8]) -> Option<usize>;
}

/// An empty attribute set.
pub struct NoAttributes;

impl AttributeProvider for NoAttributes {
    fn for_attrs_in_range(
        &mut self,
        _range: HandleRange,
        _f: impl FnMut(&Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn is_grouping_attr(&self, _uuid: AttUuid) -> bool {
        false
    }

    fn group_end(&self, _handle: Handle) -> Option<Handle> {
        None
    }

    fn write_attr(&mut self, _handle: Handle, _value: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn read_attr(&self, _handle: Handle, _buf: &mut [u8]) -> Option<usize> {
        None
    }
}
