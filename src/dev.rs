//! Remote device identity.

use std::fmt::{Debug, Display, Formatter};

/// 48-bit device address stored in little-endian byte order
/// ([Vol 6] Part B, Section 1.3).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Creates an address from little-endian bytes, as they appear in HCI
    /// packets.
    #[inline]
    #[must_use]
    pub const fn from_le_bytes(v: [u8; 6]) -> Self {
        Self(v)
    }

    /// Returns the address in little-endian byte order.
    #[inline]
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [Vol 3] Part C, Section 3.2.1.3
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Reference to a connected device, either by address or by one of its
/// connection handles.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DeviceRef {
    Addr(RawAddr),
    Handle(crate::hci::ConnHandle),
}

impl Display for DeviceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Addr(a) => Display::fmt(&a, f),
            Self::Handle(h) => Display::fmt(&h, f),
        }
    }
}

impl From<RawAddr> for DeviceRef {
    #[inline]
    fn from(a: RawAddr) -> Self {
        Self::Addr(a)
    }
}

impl From<crate::hci::ConnHandle> for DeviceRef {
    #[inline]
    fn from(h: crate::hci::ConnHandle) -> Self {
        Self::Handle(h)
    }
}
