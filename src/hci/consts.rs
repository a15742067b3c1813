#![allow(clippy::use_self)]

use std::fmt::{Debug, Display, Formatter};

use bitflags::bitflags;

/// HCI command opcode ([Vol 4] Part E, Section 5.4.1).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Opcode(u16);

impl Opcode {
    /// Opcode 0x0000 is used to update `Num_HCI_Command_Packets`
    /// ([Vol 4] Part E, Section 7.7.14).
    pub const NONE: Self = Self(0x0000);

    // Link Control commands ([Vol 4] Part E, Section 7.1)
    pub const INQUIRY: Self = Ogf::LinkControl.ocf(0x0001);
    pub const INQUIRY_CANCEL: Self = Ogf::LinkControl.ocf(0x0002);
    pub const CREATE_CONNECTION: Self = Ogf::LinkControl.ocf(0x0005);
    pub const DISCONNECT: Self = Ogf::LinkControl.ocf(0x0006);
    pub const ACCEPT_CONNECTION_REQUEST: Self = Ogf::LinkControl.ocf(0x0009);
    pub const REJECT_CONNECTION_REQUEST: Self = Ogf::LinkControl.ocf(0x000A);
    pub const AUTHENTICATION_REQUESTED: Self = Ogf::LinkControl.ocf(0x0011);
    pub const SET_CONNECTION_ENCRYPTION: Self = Ogf::LinkControl.ocf(0x0013);
    pub const REMOTE_NAME_REQUEST: Self = Ogf::LinkControl.ocf(0x0019);
    pub const READ_REMOTE_VERSION_INFORMATION: Self = Ogf::LinkControl.ocf(0x001D);
    pub const SETUP_SYNCHRONOUS_CONNECTION: Self = Ogf::LinkControl.ocf(0x0028);

    // HCI Control and Baseband commands ([Vol 4] Part E, Section 7.3)
    pub const SET_EVENT_MASK: Self = Ogf::HciControl.ocf(0x0001);
    pub const RESET: Self = Ogf::HciControl.ocf(0x0003);
    pub const WRITE_SCAN_ENABLE: Self = Ogf::HciControl.ocf(0x001A);

    // Informational parameters commands ([Vol 4] Part E, Section 7.4)
    pub const READ_LOCAL_VERSION_INFORMATION: Self = Ogf::InfoParams.ocf(0x0001);
    pub const READ_BUFFER_SIZE: Self = Ogf::InfoParams.ocf(0x0005);
    pub const READ_BD_ADDR: Self = Ogf::InfoParams.ocf(0x0009);

    // LE Controller commands ([Vol 4] Part E, Section 7.8)
    pub const LE_READ_BUFFER_SIZE: Self = Ogf::Le.ocf(0x0002);
    pub const LE_CREATE_CONNECTION: Self = Ogf::Le.ocf(0x000D);

    /// Creates a vendor-specific opcode.
    #[inline]
    #[must_use]
    pub const fn vendor(ocf: u16) -> Self {
        Ogf::Vendor.ocf(ocf)
    }

    /// Returns the Opcode Group Field.
    #[inline(always)]
    #[must_use]
    pub const fn ogf(self) -> u16 {
        self.0 >> 10
    }

    /// Returns the Opcode Command Field.
    #[inline(always)]
    #[must_use]
    pub const fn ocf(self) -> u16 {
        self.0 & 0x03FF
    }

    /// Returns whether the opcode is [`Opcode::NONE`].
    #[inline(always)]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    /// Returns whether the opcode belongs to the vendor-specific group.
    #[inline]
    #[must_use]
    pub const fn is_vendor(self) -> bool {
        self.ogf() == Ogf::Vendor as u16
    }

    /// Returns the command name for known opcodes.
    const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::NONE => "None",
            Self::INQUIRY => "Inquiry",
            Self::INQUIRY_CANCEL => "InquiryCancel",
            Self::CREATE_CONNECTION => "CreateConnection",
            Self::DISCONNECT => "Disconnect",
            Self::ACCEPT_CONNECTION_REQUEST => "AcceptConnectionRequest",
            Self::REJECT_CONNECTION_REQUEST => "RejectConnectionRequest",
            Self::AUTHENTICATION_REQUESTED => "AuthenticationRequested",
            Self::SET_CONNECTION_ENCRYPTION => "SetConnectionEncryption",
            Self::REMOTE_NAME_REQUEST => "RemoteNameRequest",
            Self::READ_REMOTE_VERSION_INFORMATION => "ReadRemoteVersionInformation",
            Self::SETUP_SYNCHRONOUS_CONNECTION => "SetupSynchronousConnection",
            Self::SET_EVENT_MASK => "SetEventMask",
            Self::RESET => "Reset",
            Self::WRITE_SCAN_ENABLE => "WriteScanEnable",
            Self::READ_LOCAL_VERSION_INFORMATION => "ReadLocalVersionInformation",
            Self::READ_BUFFER_SIZE => "ReadBufferSize",
            Self::READ_BD_ADDR => "ReadBdAddr",
            Self::LE_READ_BUFFER_SIZE => "LeReadBufferSize",
            Self::LE_CREATE_CONNECTION => "LeCreateConnection",
            _ => return None,
        })
    }
}

impl From<u16> for Opcode {
    #[inline(always)]
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl From<Opcode> for u16 {
    #[inline(always)]
    fn from(op: Opcode) -> Self {
        op.0
    }
}

impl Debug for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({:#06X})", self.0),
            None => write!(f, "Opcode({:#06X})", self.0),
        }
    }
}

impl Display for Opcode {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

// Opcode group field definitions.
#[derive(Clone, Copy)]
#[repr(u16)]
enum Ogf {
    LinkControl = 0x01,
    HciControl = 0x03,
    InfoParams = 0x04,
    Le = 0x08,
    Vendor = 0x3F, // [Vol 4] Part E, Section 5.4.1
}

impl Ogf {
    /// Combines OGF with OCF to create a full opcode.
    #[inline]
    const fn ocf(self, ocf: u16) -> Opcode {
        Opcode((self as u16) << 10 | (ocf & 0x03FF))
    }
}

/// HCI event codes ([Vol 4] Part E, Section 7.7).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, num_enum::TryFromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum EventCode {
    InquiryComplete = 0x01,
    InquiryResult = 0x02,
    ConnectionComplete = 0x03,
    ConnectionRequest = 0x04,
    DisconnectionComplete = 0x05,
    AuthenticationComplete = 0x06,
    RemoteNameRequestComplete = 0x07,
    EncryptionChangeV1 = 0x08,
    ChangeConnectionLinkKeyComplete = 0x09,
    ReadRemoteSupportedFeaturesComplete = 0x0B,
    ReadRemoteVersionInformationComplete = 0x0C,
    CommandComplete = 0x0E,
    CommandStatus = 0x0F,
    HardwareError = 0x10,
    FlushOccurred = 0x11,
    RoleChange = 0x12,
    NumberOfCompletedPackets = 0x13,
    ModeChange = 0x14,
    PinCodeRequest = 0x16,
    LinkKeyRequest = 0x17,
    LinkKeyNotification = 0x18,
    DataBufferOverflow = 0x1A,
    MaxSlotsChange = 0x1B,
    ConnectionPacketTypeChanged = 0x1D,
    InquiryResultWithRssi = 0x22,
    ReadRemoteExtendedFeaturesComplete = 0x23,
    SynchronousConnectionComplete = 0x2C,
    SynchronousConnectionChanged = 0x2D,
    ExtendedInquiryResult = 0x2F,
    EncryptionKeyRefreshComplete = 0x30,
    IoCapabilityRequest = 0x31,
    IoCapabilityResponse = 0x32,
    UserConfirmationRequest = 0x33,
    UserPasskeyRequest = 0x34,
    SimplePairingComplete = 0x36,
    LinkSupervisionTimeoutChanged = 0x38,
    LeMetaEvent = 0x3E,
    EncryptionChangeV2 = 0x59,
    Vendor = 0xFF, // [Vol 4] Part E, Section 5.4.4
}

impl EventCode {
    /// Returns the format of the leading event parameters.
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        use EventCode::*;
        const S: EventFmt = EventFmt::STATUS;
        const SH: EventFmt = EventFmt::STATUS.union(EventFmt::HANDLE);
        const SA: EventFmt = EventFmt::STATUS.union(EventFmt::ADDR);
        const SHA: EventFmt = SH.union(EventFmt::ADDR);
        const H: EventFmt = EventFmt::HANDLE;
        const A: EventFmt = EventFmt::ADDR;
        #[allow(clippy::match_same_arms)]
        match self {
            InquiryComplete => S,
            ConnectionComplete | SynchronousConnectionComplete => SHA,
            ConnectionRequest => A,
            DisconnectionComplete
            | AuthenticationComplete
            | EncryptionChangeV1
            | EncryptionChangeV2
            | ChangeConnectionLinkKeyComplete
            | ReadRemoteSupportedFeaturesComplete
            | ReadRemoteVersionInformationComplete
            | ModeChange
            | ConnectionPacketTypeChanged
            | ReadRemoteExtendedFeaturesComplete
            | SynchronousConnectionChanged
            | EncryptionKeyRefreshComplete => SH,
            RemoteNameRequestComplete | RoleChange | SimplePairingComplete => SA,
            FlushOccurred | MaxSlotsChange | LinkSupervisionTimeoutChanged => H,
            PinCodeRequest
            | LinkKeyRequest
            | LinkKeyNotification
            | IoCapabilityRequest
            | IoCapabilityResponse
            | UserConfirmationRequest
            | UserPasskeyRequest => A,
            // Command events are decoded separately
            CommandComplete | CommandStatus => EventFmt::empty(),
            InquiryResult
            | HardwareError
            | NumberOfCompletedPackets
            | DataBufferOverflow
            | InquiryResultWithRssi
            | ExtendedInquiryResult
            | LeMetaEvent
            | Vendor => EventFmt::empty(),
        }
    }
}

/// HCI LE subevent codes ([Vol 4] Part E, Section 7.7.65).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, num_enum::TryFromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum SubeventCode {
    ConnectionComplete = 0x01,
    AdvertisingReport = 0x02,
    ConnectionUpdateComplete = 0x03,
    ReadRemoteFeaturesComplete = 0x04,
    LongTermKeyRequest = 0x05,
    RemoteConnectionParameterRequest = 0x06,
    DataLengthChange = 0x07,
    EnhancedConnectionComplete = 0x0A,
    PhyUpdateComplete = 0x0C,
    ExtendedAdvertisingReport = 0x0D,
    AdvertisingSetTerminated = 0x12,
    ChannelSelectionAlgorithm = 0x14,
}

impl SubeventCode {
    /// Returns the format of the leading subevent parameters.
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        use SubeventCode::*;
        #[allow(clippy::match_same_arms)]
        match self {
            ConnectionComplete | EnhancedConnectionComplete => EventFmt::STATUS
                .union(EventFmt::HANDLE)
                .union(EventFmt::PEER_TYPE)
                .union(EventFmt::ADDR),
            ConnectionUpdateComplete | ReadRemoteFeaturesComplete | PhyUpdateComplete => {
                EventFmt::STATUS.union(EventFmt::HANDLE)
            }
            LongTermKeyRequest
            | RemoteConnectionParameterRequest
            | DataLengthChange
            | ChannelSelectionAlgorithm => EventFmt::HANDLE,
            AdvertisingReport | ExtendedAdvertisingReport | AdvertisingSetTerminated => {
                EventFmt::empty()
            }
        }
    }
}

bitflags! {
    /// Leading event parameters that identify the command, connection, or
    /// device that an event refers to. Parameters are decoded in flag order.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct EventFmt: u8 {
        /// `Status` parameter.
        const STATUS = 1 << 0;
        /// `Connection_Handle` parameter.
        const HANDLE = 1 << 1;
        /// `Role` and `Peer_Address_Type` precede the address
        /// ([Vol 4] Part E, Section 7.7.65.1).
        const PEER_TYPE = 1 << 2;
        /// `BD_ADDR` or `Peer_Address` parameter.
        const ADDR = 1 << 3;
    }
}

/// Link type reported by connection events ([Vol 4] Part E, Section 7.7.3).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, num_enum::TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum LinkType {
    Sco = 0x00,
    Acl = 0x01,
    Esco = 0x02,
}

impl LinkType {
    /// Returns whether the link carries synchronous traffic.
    #[inline]
    #[must_use]
    pub const fn is_sync(self) -> bool {
        matches!(self, Self::Sco | Self::Esco)
    }
}

/// HCI status codes ([Vol 1] Part F, Section 1.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::FromPrimitive,
    num_enum::IntoPrimitive,
    strum::Display,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    UnknownCommand = 0x01,
    UnknownConnectionIdentifier = 0x02,
    HardwareFailure = 0x03,
    PageTimeout = 0x04,
    AuthenticationFailure = 0x05,
    PinOrKeyMissing = 0x06,
    MemoryCapacityExceeded = 0x07,
    ConnectionTimeout = 0x08,
    ConnectionLimitExceeded = 0x09,
    SynchronousConnectionLimitToADeviceExceeded = 0x0A,
    ConnectionAlreadyExists = 0x0B,
    CommandDisallowed = 0x0C,
    ConnectionRejectedDueToLimitedResources = 0x0D,
    ConnectionRejectedDueToSecurityReasons = 0x0E,
    ConnectionRejectedDueToUnacceptableBdAddr = 0x0F,
    ConnectionAcceptTimeoutExceeded = 0x10,
    UnsupportedFeatureOrParameterValue = 0x11,
    InvalidCommandParameters = 0x12,
    RemoteUserTerminatedConnection = 0x13,
    RemoteDeviceTerminatedConnectionDueToLowResources = 0x14,
    RemoteDeviceTerminatedConnectionDueToPowerOff = 0x15,
    ConnectionTerminatedByLocalHost = 0x16,
    RepeatedAttempts = 0x17,
    PairingNotAllowed = 0x18,
    UnknownLmpPdu = 0x19,
    UnsupportedRemoteFeature = 0x1A,
    ScoOffsetRejected = 0x1B,
    ScoIntervalRejected = 0x1C,
    ScoAirModeRejected = 0x1D,
    InvalidLmpLlParameters = 0x1E,
    #[num_enum(default)] // [Vol 4] Part E, Section 1.2
    UnspecifiedError = 0x1F,
    UnsupportedLmpLlParameterValue = 0x20,
    RoleChangeNotAllowed = 0x21,
    LmpLlResponseTimeout = 0x22,
    LmpLlErrorTransactionCollision = 0x23,
    LmpPduNotAllowed = 0x24,
    EncryptionModeNotAcceptable = 0x25,
    LinkKeyCannotBeChanged = 0x26,
    RequestedQosNotSupported = 0x27,
    InstantPassed = 0x28,
    PairingWithUnitKeyNotSupported = 0x29,
    DifferentTransactionCollision = 0x2A,
    QosUnacceptableParameter = 0x2C,
    QosRejected = 0x2D,
    ChannelClassificationNotSupported = 0x2E,
    InsufficientSecurity = 0x2F,
    ParameterOutOfMandatoryRange = 0x30,
    RoleSwitchPending = 0x32,
    ReservedSlotViolation = 0x34,
    RoleSwitchFailed = 0x35,
    ExtendedInquiryResponseTooLarge = 0x36,
    SecureSimplePairingNotSupportedByHost = 0x37,
    HostBusyPairing = 0x38,
    ConnectionRejectedDueToNoSuitableChannelFound = 0x39,
    ControllerBusy = 0x3A,
    UnacceptableConnectionParameters = 0x3B,
    AdvertisingTimeout = 0x3C,
    ConnectionTerminatedDueToMicFailure = 0x3D,
    ConnectionFailedToBeEstablished = 0x3E,
    CoarseClockAdjustmentRejected = 0x40,
    Type0SubmapNotDefined = 0x41,
    UnknownAdvertisingIdentifier = 0x42,
    LimitReached = 0x43,
    OperationCancelledByHost = 0x44,
    PacketTooLong = 0x45,
}

impl Status {
    /// Returns whether status is `Success`.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl Default for Status {
    #[inline]
    fn default() -> Self {
        Self::Success
    }
}
