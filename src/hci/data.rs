use structbuf::{Pack, StructBuf, Unpacker};

use super::*;

/// ACL data packet header size ([Vol 4] Part E, Section 5.4.2).
pub const ACL_HDR: usize = 4;

/// Synchronous data packet header size ([Vol 4] Part E, Section 5.4.3).
pub const SCO_HDR: usize = 3;

/// ACL data packet boundary flag ([Vol 4] Part E, Section 5.4.2).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Boundary {
    FirstNonFlushable = 0b00,
    Continuing = 0b01,
    FirstFlushable = 0b10,
}

impl Default for Boundary {
    /// Returns the start of a non-automatically-flushable packet, which is
    /// valid for both BR/EDR and LE links.
    #[inline]
    fn default() -> Self {
        Self::FirstNonFlushable
    }
}

/// Data packet header common to ACL and synchronous packets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataHeader {
    pub handle: ConnHandle,
    /// Packet boundary flag. Always [`Boundary::FirstFlushable`] for
    /// synchronous packets.
    pub boundary: Boundary,
    pub len: u16,
}

impl DataHeader {
    /// Unpacks and validates an ACL data packet header, returning the header
    /// and the payload.
    pub fn unpack_acl(raw: &[u8]) -> Result<(Self, &[u8])> {
        let mut p = Unpacker::new(raw);
        let (cn, len) = (p.u16(), p.u16());
        let invalid = || Error::InvalidPacket(Vec::from(raw));
        let handle = ConnHandle::new(cn).ok_or_else(invalid)?;
        #[allow(clippy::cast_possible_truncation)]
        let boundary = Boundary::try_from((cn >> ConnHandle::BITS) as u8 & 0b11)
            .map_err(|_| invalid())?;
        if !p.is_ok() || p.len() != usize::from(len) {
            return Err(invalid());
        }
        Ok((
            Self {
                handle,
                boundary,
                len,
            },
            p.into_inner(),
        ))
    }

    /// Unpacks and validates a synchronous data packet header, returning the
    /// header and the payload.
    pub fn unpack_sco(raw: &[u8]) -> Result<(Self, &[u8])> {
        let mut p = Unpacker::new(raw);
        let (cn, len) = (p.u16(), p.u8());
        let invalid = || Error::InvalidPacket(Vec::from(raw));
        let handle = ConnHandle::new(cn).ok_or_else(invalid)?;
        if !p.is_ok() || p.len() != usize::from(len) {
            return Err(invalid());
        }
        Ok((
            Self {
                handle,
                boundary: Boundary::FirstFlushable,
                len: u16::from(len),
            },
            p.into_inner(),
        ))
    }
}

/// Encodes an ACL data packet.
pub fn acl_packet(handle: ConnHandle, boundary: Boundary, payload: &[u8]) -> Result<StructBuf> {
    let len = u16::try_from(payload.len()).map_err(|_| Error::PayloadTooLong {
        len: payload.len(),
    })?;
    let mut b = StructBuf::new(ACL_HDR + payload.len());
    b.append()
        .u16(u16::from(handle) | u16::from(boundary as u8) << ConnHandle::BITS)
        .u16(len)
        .put(payload);
    Ok(b)
}

/// Encodes a synchronous data packet.
pub fn sco_packet(handle: ConnHandle, payload: &[u8]) -> Result<StructBuf> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::PayloadTooLong {
        len: payload.len(),
    })?;
    let mut b = StructBuf::new(SCO_HDR + payload.len());
    b.append().u16(handle).u8(len).put(payload);
    Ok(b)
}
