use std::fmt::{Display, Formatter};

use smallvec::SmallVec;
use structbuf::Unpacker;

use crate::dev::RawAddr;

use super::*;

/// Event packet header size ([Vol 4] Part E, Section 5.4.4).
pub(crate) const EVT_HDR: usize = 2;

/// HCI event or LE subevent code.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventType {
    Hci(EventCode),
    Le(SubeventCode),
    /// Event or LE subevent without a known parameter format. These events
    /// are only delivered to listeners.
    Unknown { code: u8, subcode: Option<u8> },
}

impl EventType {
    /// Returns whether the event type is either `CommandStatus` or
    /// `CommandComplete`.
    #[inline]
    #[must_use]
    pub const fn is_cmd(self) -> bool {
        matches!(
            self,
            Self::Hci(EventCode::CommandComplete | EventCode::CommandStatus)
        )
    }

    /// Returns the format of the leading event parameters.
    #[inline]
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        match self {
            Self::Hci(c) => c.param_fmt(),
            Self::Le(c) => c.param_fmt(),
            Self::Unknown { .. } => EventFmt::empty(),
        }
    }

    /// Returns the offset of the first event parameter in a raw event packet.
    #[inline]
    #[must_use]
    pub const fn params_off(self) -> usize {
        match self {
            Self::Hci(_) | Self::Unknown { subcode: None, .. } => EVT_HDR,
            Self::Le(_) | Self::Unknown { subcode: Some(_), .. } => EVT_HDR + 1,
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Hci(c) => Display::fmt(&c, f),
            Self::Le(c) => write!(f, "Le{c}"),
            Self::Unknown {
                code,
                subcode: None,
            } => write!(f, "Unknown({code:#04X})"),
            Self::Unknown {
                code,
                subcode: Some(sub),
            } => write!(f, "Unknown({code:#04X}/{sub:#04X})"),
        }
    }
}

impl From<EventCode> for EventType {
    #[inline]
    fn from(c: EventCode) -> Self {
        Self::Hci(c)
    }
}

impl From<SubeventCode> for EventType {
    #[inline]
    fn from(c: SubeventCode) -> Self {
        Self::Le(c)
    }
}

/// Common event header. [`EventType`] determines the validity of other
/// fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventHeader {
    pub typ: EventType,
    /// Event status or [`Status::Success`] for events without one.
    pub status: Status,
    /// `Num_HCI_Command_Packets` from command events.
    pub cmd_quota: Option<u8>,
    /// Command opcode from command events. [`Opcode::NONE`] is used by
    /// command events that only update the command quota and by all other
    /// events.
    pub opcode: Opcode,
    pub handle: Option<ConnHandle>,
    pub addr: Option<RawAddr>,
}

impl EventHeader {
    /// Creates a header for an event of the specified type with no
    /// identifying parameters.
    #[inline]
    #[must_use]
    pub const fn new(typ: EventType) -> Self {
        Self {
            typ,
            status: Status::Success,
            cmd_quota: None,
            opcode: Opcode::NONE,
            handle: None,
            addr: None,
        }
    }

    /// Unpacks and validates the header of a received event, returning the
    /// header and any remaining parameters. For `CommandComplete` events, the
    /// remaining parameters are the command return parameters following the
    /// status.
    pub fn unpack(raw: &[u8]) -> Result<(Self, &[u8])> {
        let mut p = Unpacker::new(raw);
        let (code, len) = (p.u8(), p.u8());
        if p.len() != usize::from(len) || !p.is_ok() {
            return Err(Error::InvalidEvent(Vec::from(raw)));
        }
        let typ = match EventCode::try_from(code) {
            Ok(EventCode::LeMetaEvent) => {
                let subcode = p.u8();
                if !p.is_ok() {
                    return Err(Error::InvalidEvent(Vec::from(raw)));
                }
                SubeventCode::try_from(subcode).map_or(
                    EventType::Unknown {
                        code,
                        subcode: Some(subcode),
                    },
                    EventType::Le,
                )
            }
            Ok(code) => EventType::Hci(code),
            Err(_) => EventType::Unknown {
                code,
                subcode: None,
            },
        };
        let mut hdr = Self::new(typ);
        match typ {
            EventType::Hci(EventCode::CommandComplete) => {
                hdr.cmd_quota = Some(p.u8());
                hdr.opcode = Opcode::from(p.u16());
                if !p.is_empty() {
                    hdr.status = Status::from(p.u8());
                }
            }
            EventType::Hci(EventCode::CommandStatus) => {
                hdr.status = Status::from(p.u8());
                hdr.cmd_quota = Some(p.u8());
                hdr.opcode = Opcode::from(p.u16());
            }
            _ => {
                let pf = typ.param_fmt();
                if pf.contains(EventFmt::STATUS) {
                    hdr.status = Status::from(p.u8());
                }
                if pf.contains(EventFmt::HANDLE) {
                    hdr.handle = ConnHandle::new(p.u16());
                }
                if pf.contains(EventFmt::PEER_TYPE) {
                    let (_role, _peer_type) = (p.u8(), p.u8());
                }
                if pf.contains(EventFmt::ADDR) {
                    hdr.addr = Some(p.addr());
                }
            }
        }
        if p.is_ok() {
            Ok((hdr, p.into_inner()))
        } else {
            Err(Error::InvalidEvent(Vec::from(raw)))
        }
    }

    /// Decodes the remaining event parameters as `T`. Returns [`None`] if the
    /// event is not a `T` event or if the parameters are truncated.
    #[must_use]
    pub fn decode<T: FromEvent>(&self, params: &[u8]) -> Option<T> {
        if !T::matches(self) {
            return None;
        }
        let mut p = Unpacker::new(params);
        let v = T::unpack(self, &mut p)?;
        p.is_ok().then_some(v)
    }
}

/// Event parameters that can be decoded from an [`EventHeader`] and the
/// remaining event parameters.
pub trait FromEvent: Sized {
    /// Returns whether the event contains `Self`.
    fn matches(hdr: &EventHeader) -> bool;

    /// Unpacks the event parameters following the header.
    fn unpack(hdr: &EventHeader, p: &mut Unpacker) -> Option<Self>;
}

/// `HCI_Connection_Complete` and `HCI_Synchronous_Connection_Complete` event
/// parameters ([Vol 4] Part E, Sections 7.7.3 and 7.7.35).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub addr: RawAddr,
    pub link_type: LinkType,
}

impl FromEvent for ConnectionComplete {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        matches!(
            hdr.typ,
            EventType::Hci(
                EventCode::ConnectionComplete | EventCode::SynchronousConnectionComplete
            )
        )
    }

    fn unpack(hdr: &EventHeader, p: &mut Unpacker) -> Option<Self> {
        Some(Self {
            status: hdr.status,
            handle: hdr.handle?,
            addr: hdr.addr?,
            link_type: LinkType::try_from(p.u8()).ok()?,
        })
    }
}

/// `HCI_LE_Connection_Complete` and `HCI_LE_Enhanced_Connection_Complete`
/// event parameters ([Vol 4] Part E, Sections 7.7.65.1 and 7.7.65.10).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeConnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub peer_addr: RawAddr,
}

impl FromEvent for LeConnectionComplete {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        matches!(
            hdr.typ,
            EventType::Le(
                SubeventCode::ConnectionComplete | SubeventCode::EnhancedConnectionComplete
            )
        )
    }

    #[inline]
    fn unpack(hdr: &EventHeader, _: &mut Unpacker) -> Option<Self> {
        Some(Self {
            status: hdr.status,
            handle: hdr.handle?,
            peer_addr: hdr.addr?,
        })
    }
}

/// `HCI_Disconnection_Complete` event parameters
/// ([Vol 4] Part E, Section 7.7.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DisconnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub reason: Status,
}

impl FromEvent for DisconnectionComplete {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        matches!(hdr.typ, EventType::Hci(EventCode::DisconnectionComplete))
    }

    fn unpack(hdr: &EventHeader, p: &mut Unpacker) -> Option<Self> {
        Some(Self {
            status: hdr.status,
            handle: hdr.handle?,
            reason: Status::from(p.u8()),
        })
    }
}

/// `HCI_Number_Of_Completed_Packets` event parameters
/// ([Vol 4] Part E, Section 7.7.19).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct NumberOfCompletedPackets(SmallVec<[(ConnHandle, u16); 4]>);

impl FromEvent for NumberOfCompletedPackets {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        matches!(hdr.typ, EventType::Hci(EventCode::NumberOfCompletedPackets))
    }

    fn unpack(_: &EventHeader, p: &mut Unpacker) -> Option<Self> {
        let n = usize::from(p.u8());
        let mut v = SmallVec::with_capacity(n);
        for _ in 0..n {
            if let (Some(cn), n) = (ConnHandle::new(p.u16()), p.u16()) {
                v.push((cn, n));
            }
        }
        Some(Self(v))
    }
}

impl AsRef<[(ConnHandle, u16)]> for NumberOfCompletedPackets {
    #[inline]
    fn as_ref(&self) -> &[(ConnHandle, u16)] {
        self.0.as_ref()
    }
}

/// `HCI_Read_Buffer_Size` return parameters ([Vol 4] Part E, Section 7.4.5).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BufferSize {
    pub acl_data_len: u16,
    pub acl_num_pkts: u16,
    pub sco_data_len: u8,
    pub sco_num_pkts: u16,
}

impl FromEvent for BufferSize {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        hdr.typ == EventType::Hci(EventCode::CommandComplete)
            && hdr.opcode == Opcode::READ_BUFFER_SIZE
            && hdr.status.is_ok()
    }

    fn unpack(_: &EventHeader, p: &mut Unpacker) -> Option<Self> {
        let acl_data_len = p.u16();
        let sco_data_len = p.u8();
        Some(Self {
            acl_data_len,
            acl_num_pkts: p.u16(),
            sco_data_len,
            sco_num_pkts: p.u16(),
        })
    }
}

/// `HCI_LE_Read_Buffer_Size [v1]` return parameters
/// ([Vol 4] Part E, Section 7.8.2).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LeBufferSize {
    pub acl_data_len: u16,
    pub acl_num_pkts: u8,
}

impl FromEvent for LeBufferSize {
    #[inline]
    fn matches(hdr: &EventHeader) -> bool {
        hdr.typ == EventType::Hci(EventCode::CommandComplete)
            && hdr.opcode == Opcode::LE_READ_BUFFER_SIZE
            && hdr.status.is_ok()
    }

    fn unpack(_: &EventHeader, p: &mut Unpacker) -> Option<Self> {
        Some(Self {
            acl_data_len: p.u16(),
            acl_num_pkts: p.u8(),
        })
    }
}

/// Event parameter unpacker extensions.
trait EventUnpacker {
    /// Unpacks a device address.
    fn addr(&mut self) -> RawAddr;
}

impl EventUnpacker for Unpacker<'_> {
    #[inline]
    fn addr(&mut self) -> RawAddr {
        let mut a = [0; 6];
        for b in &mut a {
            *b = self.u8();
        }
        RawAddr::from_le_bytes(a)
    }
}
