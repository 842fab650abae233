//! Bluetooth SIG company identifiers.

use crate::{bytes::*, Error};

/// A company identifier as assigned by the Bluetooth SIG.
///
/// Used in `VERSION_IND` LL Control PDUs and in Manufacturer Specific Data AD structures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompanyId(u16);

impl CompanyId {
    /// Bluetooth SIG company identifier assigned to this implementation.
    pub const THIS_IMPLEMENTATION: Self = CompanyId(0x0269);

    /// Creates a `CompanyId` from its raw 16-bit value.
    pub const fn from_raw(raw: u16) -> Self {
        CompanyId(raw)
    }

    /// Returns the raw 16-bit company identifier.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl From<u16> for CompanyId {
    fn from(raw: u16) -> Self {
        CompanyId(raw)
    }
}

impl ToBytes for CompanyId {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

impl FromBytes<'_> for CompanyId {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(CompanyId(bytes.read_u16_le()?))
    }
}
