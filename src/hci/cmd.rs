use smallvec::SmallVec;
use structbuf::{Pack, StructBuf};

use crate::dev::RawAddr;

use super::*;

/// Command packet header size ([Vol 4] Part E, Section 5.4.1).
pub(crate) const CMD_HDR: usize = 3;

/// Maximum command parameter length.
pub(crate) const CMD_MAX_PARAMS: usize = u8::MAX as usize;

/// Commands that can be submitted to the controller. Each variant determines
/// its opcode, target device, expected events, and parameter encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Command {
    /// `HCI_Reset` ([Vol 4] Part E, Section 7.3.2).
    Reset,
    /// `HCI_Set_Event_Mask` ([Vol 4] Part E, Section 7.3.1).
    SetEventMask(u64),
    /// `HCI_Read_Buffer_Size` ([Vol 4] Part E, Section 7.4.5).
    ReadBufferSize,
    /// `HCI_LE_Read_Buffer_Size [v1]` ([Vol 4] Part E, Section 7.8.2).
    LeReadBufferSize,
    /// `HCI_Read_BD_ADDR` ([Vol 4] Part E, Section 7.4.6).
    ReadBdAddr,
    /// `HCI_Read_Local_Version_Information` ([Vol 4] Part E, Section 7.4.1).
    ReadLocalVersionInformation,
    /// `HCI_Write_Scan_Enable` ([Vol 4] Part E, Section 7.3.18).
    WriteScanEnable { inquiry: bool, page: bool },
    /// `HCI_Inquiry` ([Vol 4] Part E, Section 7.1.1).
    Inquiry {
        lap: u32,
        len: u8,
        max_responses: u8,
    },
    /// `HCI_Inquiry_Cancel` ([Vol 4] Part E, Section 7.1.2).
    InquiryCancel,
    /// `HCI_Create_Connection` ([Vol 4] Part E, Section 7.1.5).
    CreateConnection {
        addr: RawAddr,
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: bool,
    },
    /// `HCI_Accept_Connection_Request` ([Vol 4] Part E, Section 7.1.8).
    AcceptConnectionRequest { addr: RawAddr, become_central: bool },
    /// `HCI_Reject_Connection_Request` ([Vol 4] Part E, Section 7.1.9).
    RejectConnectionRequest { addr: RawAddr, reason: Status },
    /// `HCI_Disconnect` ([Vol 4] Part E, Section 7.1.6).
    Disconnect { handle: ConnHandle, reason: Status },
    /// `HCI_Remote_Name_Request` ([Vol 4] Part E, Section 7.1.19).
    RemoteNameRequest {
        addr: RawAddr,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
    },
    /// `HCI_Authentication_Requested` ([Vol 4] Part E, Section 7.1.15).
    AuthenticationRequested { handle: ConnHandle },
    /// `HCI_Set_Connection_Encryption` ([Vol 4] Part E, Section 7.1.16).
    SetConnectionEncryption { handle: ConnHandle, enable: bool },
    /// `HCI_Read_Remote_Version_Information`
    /// ([Vol 4] Part E, Section 7.1.23).
    ReadRemoteVersionInformation { handle: ConnHandle },
    /// `HCI_Setup_Synchronous_Connection` ([Vol 4] Part E, Section 7.1.26).
    /// `handle` is the ACL connection and `addr`, when known, is the peer
    /// that the resulting SCO connection is correlated by.
    SetupSynchronousConnection {
        handle: ConnHandle,
        addr: Option<RawAddr>,
        params: SyncParams,
    },
    /// `HCI_LE_Create_Connection` ([Vol 4] Part E, Section 7.8.12).
    LeCreateConnection {
        peer_addr: RawAddr,
        peer_random: bool,
        params: LeConnParams,
    },
    /// Vendor-specific command with caller-supplied parameters and expected
    /// events.
    Vendor {
        ocf: u16,
        params: Vec<u8>,
        expect: Expect,
    },
}

impl Command {
    /// Returns the command opcode.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        use Command::*;
        match *self {
            Reset => Opcode::RESET,
            SetEventMask(_) => Opcode::SET_EVENT_MASK,
            ReadBufferSize => Opcode::READ_BUFFER_SIZE,
            LeReadBufferSize => Opcode::LE_READ_BUFFER_SIZE,
            ReadBdAddr => Opcode::READ_BD_ADDR,
            ReadLocalVersionInformation => Opcode::READ_LOCAL_VERSION_INFORMATION,
            WriteScanEnable { .. } => Opcode::WRITE_SCAN_ENABLE,
            Inquiry { .. } => Opcode::INQUIRY,
            InquiryCancel => Opcode::INQUIRY_CANCEL,
            CreateConnection { .. } => Opcode::CREATE_CONNECTION,
            AcceptConnectionRequest { .. } => Opcode::ACCEPT_CONNECTION_REQUEST,
            RejectConnectionRequest { .. } => Opcode::REJECT_CONNECTION_REQUEST,
            Disconnect { .. } => Opcode::DISCONNECT,
            RemoteNameRequest { .. } => Opcode::REMOTE_NAME_REQUEST,
            AuthenticationRequested { .. } => Opcode::AUTHENTICATION_REQUESTED,
            SetConnectionEncryption { .. } => Opcode::SET_CONNECTION_ENCRYPTION,
            ReadRemoteVersionInformation { .. } => Opcode::READ_REMOTE_VERSION_INFORMATION,
            SetupSynchronousConnection { .. } => Opcode::SETUP_SYNCHRONOUS_CONNECTION,
            LeCreateConnection { .. } => Opcode::LE_CREATE_CONNECTION,
            Vendor { ocf, .. } => Opcode::vendor(ocf),
        }
    }

    /// Returns the device address and connection handle that the command
    /// targets.
    #[must_use]
    pub const fn target(&self) -> (Option<RawAddr>, Option<ConnHandle>) {
        use Command::*;
        match *self {
            CreateConnection { addr, .. }
            | AcceptConnectionRequest { addr, .. }
            | RejectConnectionRequest { addr, .. }
            | RemoteNameRequest { addr, .. } => (Some(addr), None),
            LeCreateConnection { peer_addr, .. } => (Some(peer_addr), None),
            Disconnect { handle, .. }
            | AuthenticationRequested { handle }
            | SetConnectionEncryption { handle, .. }
            | ReadRemoteVersionInformation { handle } => (None, Some(handle)),
            SetupSynchronousConnection { handle, addr, .. } => (addr, Some(handle)),
            Reset
            | SetEventMask(_)
            | ReadBufferSize
            | LeReadBufferSize
            | ReadBdAddr
            | ReadLocalVersionInformation
            | WriteScanEnable { .. }
            | Inquiry { .. }
            | InquiryCancel
            | Vendor { .. } => (None, None),
        }
    }

    /// Returns the events that complete the command.
    #[must_use]
    pub fn expect(&self) -> Expect {
        use Command::*;
        match *self {
            Reset
            | SetEventMask(_)
            | ReadBufferSize
            | LeReadBufferSize
            | ReadBdAddr
            | ReadLocalVersionInformation
            | WriteScanEnable { .. }
            | InquiryCancel => Expect::command_complete(),
            Inquiry { .. } => Expect::event(EventCode::InquiryComplete, MatchBy::Any).with(&[
                EventType::Hci(EventCode::InquiryResult),
                EventType::Hci(EventCode::InquiryResultWithRssi),
                EventType::Hci(EventCode::ExtendedInquiryResult),
            ]),
            CreateConnection { .. } | RejectConnectionRequest { .. } => {
                Expect::event(EventCode::ConnectionComplete, MatchBy::Addr)
            }
            // The request being accepted may be for a synchronous link
            AcceptConnectionRequest { .. } => {
                Expect::event(EventCode::ConnectionComplete, MatchBy::Addr)
                    .or(EventCode::SynchronousConnectionComplete)
            }
            Disconnect { .. } => Expect::event(EventCode::DisconnectionComplete, MatchBy::Handle),
            RemoteNameRequest { .. } => {
                Expect::event(EventCode::RemoteNameRequestComplete, MatchBy::Addr)
            }
            AuthenticationRequested { .. } => {
                Expect::event(EventCode::AuthenticationComplete, MatchBy::Handle)
            }
            SetConnectionEncryption { .. } => {
                Expect::event(EventCode::EncryptionChangeV1, MatchBy::Handle)
            }
            ReadRemoteVersionInformation { .. } => Expect::event(
                EventCode::ReadRemoteVersionInformationComplete,
                MatchBy::Handle,
            ),
            // The SCO connection gets a new handle, so the peer address is the
            // only link to the request.
            SetupSynchronousConnection { addr, .. } => Expect::event(
                EventCode::SynchronousConnectionComplete,
                if addr.is_some() {
                    MatchBy::Addr
                } else {
                    MatchBy::Any
                },
            ),
            LeCreateConnection { .. } => {
                Expect::event(SubeventCode::ConnectionComplete, MatchBy::Addr)
                    .or(SubeventCode::EnhancedConnectionComplete)
            }
            Vendor { ref expect, .. } => expect.clone(),
        }
    }

    /// Encodes the command packet ([Vol 4] Part E, Section 5.4.1).
    pub fn encode(&self) -> Result<StructBuf> {
        use Command::*;
        let opcode = self.opcode();
        let mut b = StructBuf::new(CMD_HDR + CMD_MAX_PARAMS);
        b.append().u16(opcode).u8(0); // Final length is set below
        let mut p = b.append();
        match *self {
            Reset
            | ReadBufferSize
            | LeReadBufferSize
            | ReadBdAddr
            | ReadLocalVersionInformation
            | InquiryCancel => {}
            SetEventMask(mask) => {
                p.u64(mask);
            }
            WriteScanEnable { inquiry, page } => {
                p.u8(u8::from(inquiry) | u8::from(page) << 1);
            }
            Inquiry {
                lap,
                len,
                max_responses,
            } => {
                p.put(&lap.to_le_bytes()[..3]).u8(len).u8(max_responses);
            }
            CreateConnection {
                addr,
                packet_type,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                p.put(&addr.to_le_bytes())
                    .u16(packet_type)
                    .u8(page_scan_repetition_mode)
                    .u8(0) // Reserved
                    .u16(clock_offset)
                    .u8(u8::from(allow_role_switch));
            }
            AcceptConnectionRequest {
                addr,
                become_central,
            } => {
                p.put(&addr.to_le_bytes()).u8(u8::from(!become_central));
            }
            RejectConnectionRequest { addr, reason } => {
                p.put(&addr.to_le_bytes()).u8(u8::from(reason));
            }
            Disconnect { handle, reason } => {
                p.u16(handle).u8(u8::from(reason));
            }
            RemoteNameRequest {
                addr,
                page_scan_repetition_mode,
                clock_offset,
            } => {
                p.put(&addr.to_le_bytes())
                    .u8(page_scan_repetition_mode)
                    .u8(0) // Reserved
                    .u16(clock_offset);
            }
            AuthenticationRequested { handle } | ReadRemoteVersionInformation { handle } => {
                p.u16(handle);
            }
            SetConnectionEncryption { handle, enable } => {
                p.u16(handle).u8(u8::from(enable));
            }
            SetupSynchronousConnection { handle, params, .. } => {
                p.u16(handle)
                    .u32(params.tx_bandwidth)
                    .u32(params.rx_bandwidth)
                    .u16(params.max_latency)
                    .u16(params.voice_setting)
                    .u8(params.retransmission_effort)
                    .u16(params.packet_type);
            }
            LeCreateConnection {
                peer_addr,
                peer_random,
                params,
            } => {
                p.u16(params.scan_interval)
                    .u16(params.scan_window)
                    .u8(0) // Filter accept list not used
                    .u8(u8::from(peer_random))
                    .put(&peer_addr.to_le_bytes())
                    .u8(0) // Own public address
                    .u16(params.conn_interval_min)
                    .u16(params.conn_interval_max)
                    .u16(params.max_latency)
                    .u16(params.supervision_timeout)
                    .u16(0_u16) // Min CE length
                    .u16(0_u16); // Max CE length
            }
            Vendor { ref params, .. } => {
                if params.len() > CMD_MAX_PARAMS {
                    return Err(Error::CommandTooLong {
                        opcode,
                        len: params.len(),
                    });
                }
                p.put(params);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let n = (b.len() - CMD_HDR) as u8;
        b.at(CMD_HDR - 1).u8(n);
        Ok(b)
    }
}

/// `HCI_Setup_Synchronous_Connection` parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncParams {
    pub tx_bandwidth: u32,
    pub rx_bandwidth: u32,
    pub max_latency: u16,
    pub voice_setting: u16,
    pub retransmission_effort: u8,
    pub packet_type: u16,
}

impl Default for SyncParams {
    /// Returns CVSD parameters for a 64 kb/s voice link
    /// ([HFP] Section 5.7.1, S1 settings).
    fn default() -> Self {
        Self {
            tx_bandwidth: 8000,
            rx_bandwidth: 8000,
            max_latency: 0x0007,
            voice_setting: 0x0060,
            retransmission_effort: 0x01,
            packet_type: 0x03BF,
        }
    }
}

/// `HCI_LE_Create_Connection` timing parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeConnParams {
    pub scan_interval: u16,
    pub scan_window: u16,
    pub conn_interval_min: u16,
    pub conn_interval_max: u16,
    pub max_latency: u16,
    pub supervision_timeout: u16,
}

impl Default for LeConnParams {
    fn default() -> Self {
        Self {
            scan_interval: 0x0060,
            scan_window: 0x0030,
            conn_interval_min: 0x0018,
            conn_interval_max: 0x0028,
            max_latency: 0,
            supervision_timeout: 0x01F4,
        }
    }
}

/// Criteria used to match a connection-oriented event to a pending command.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MatchBy {
    /// Any event of the expected type.
    Any,
    /// Event device address must equal the command target address.
    Addr,
    /// Event connection handle must equal the command target handle.
    Handle,
}

/// Events that complete a command. Commands completed by `CommandComplete`
/// are matched by opcode. All others are acknowledged by `CommandStatus` and
/// completed by `complete` or `alt`, which are matched according to `by`.
/// Intermediate events are counted and, when `max_intermediate` is set,
/// complete the command once that many have been received.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Expect {
    pub complete: EventType,
    /// Alternative completion event.
    pub alt: Option<EventType>,
    pub by: MatchBy,
    pub intermediate: SmallVec<[EventType; 3]>,
    pub max_intermediate: Option<u16>,
}

impl Expect {
    /// Returns the expectation of a command completed by `CommandComplete`.
    #[inline]
    #[must_use]
    pub fn command_complete() -> Self {
        Self::event(EventCode::CommandComplete, MatchBy::Any)
    }

    /// Returns the expectation of a command completed by the specified event.
    #[inline]
    #[must_use]
    pub fn event(complete: impl Into<EventType>, by: MatchBy) -> Self {
        Self {
            complete: complete.into(),
            alt: None,
            by,
            intermediate: SmallVec::new(),
            max_intermediate: None,
        }
    }

    /// Sets an alternative completion event.
    #[inline]
    #[must_use]
    pub fn or(mut self, alt: impl Into<EventType>) -> Self {
        self.alt = Some(alt.into());
        self
    }

    /// Returns whether an event of type `typ` completes the command.
    #[inline]
    #[must_use]
    pub fn completes(&self, typ: EventType) -> bool {
        self.complete == typ || self.alt == Some(typ)
    }

    /// Adds intermediate events.
    #[inline]
    #[must_use]
    pub fn with(mut self, intermediate: &[EventType]) -> Self {
        self.intermediate.extend_from_slice(intermediate);
        self
    }

    /// Returns whether the command is completed by `CommandComplete`.
    #[inline]
    #[must_use]
    pub fn is_command_complete(&self) -> bool {
        self.complete == EventType::Hci(EventCode::CommandComplete)
    }

    /// Returns whether the command is completed by `CommandStatus`.
    #[inline]
    #[must_use]
    pub fn is_command_status(&self) -> bool {
        self.complete == EventType::Hci(EventCode::CommandStatus)
    }
}

impl Default for Expect {
    #[inline]
    fn default() -> Self {
        Self::command_complete()
    }
}
