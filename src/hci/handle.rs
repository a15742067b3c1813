use std::fmt::{Debug, Display, Formatter};

use crate::util::name_of;

/// Connection handle ([Vol 4] Part E, Section 5.4.2).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// Number of meaningful bits.
    pub(crate) const BITS: u16 = 12;
    /// Maximum valid connection handle.
    pub const MAX: u16 = 0xEFF;

    /// Wraps a raw connection handle, ignoring the packet boundary and
    /// broadcast flags. Returns `None` if the handle is invalid.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        let v = v & ((1 << Self::BITS) - 1);
        if v <= Self::MAX {
            Some(Self(v))
        } else {
            None
        }
    }
}

impl From<ConnHandle> for u16 {
    #[inline]
    fn from(cn: ConnHandle) -> Self {
        cn.0
    }
}

impl Debug for ConnHandle {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#05X})", name_of!(ConnHandle), self.0)
    }
}

impl Display for ConnHandle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
