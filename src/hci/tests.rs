use matches::assert_matches;

use crate::dev::RawAddr;
use crate::hci::*;

const ADDR: RawAddr = RawAddr::from_le_bytes([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

#[test]
fn hci() {
    let pkt = [EventCode::InquiryComplete as u8, 2, 3, 4];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(
        e,
        EventHeader {
            status: Status::HardwareFailure,
            ..EventHeader::new(EventType::Hci(EventCode::InquiryComplete))
        }
    );
    assert_eq!(p, &pkt[3..]);
}

#[test]
fn le() {
    let pkt = [EventCode::LeMetaEvent as u8, 2, 2, 4];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(
        e,
        EventHeader::new(EventType::Le(SubeventCode::AdvertisingReport))
    );
    assert_eq!(p, &pkt[3..]);
}

#[test]
fn cmd_complete() {
    let mut pkt = vec![EventCode::CommandComplete as u8, 3, 3, 0x01, 0x10];
    let (e, _) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(
        e,
        EventHeader {
            cmd_quota: Some(3),
            opcode: Opcode::READ_LOCAL_VERSION_INFORMATION,
            ..EventHeader::new(EventType::Hci(EventCode::CommandComplete))
        }
    );

    pkt[1] += 1;
    pkt.push(Status::UnknownCommand as _);
    let (e, _) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(e.status, Status::UnknownCommand);

    pkt[1] += 1;
    pkt.push(6);
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(e.cmd_quota, Some(3));
    assert_eq!(e.opcode, Opcode::READ_LOCAL_VERSION_INFORMATION);
    assert_eq!(e.status, Status::UnknownCommand);
    assert_eq!(p, &[6]);
}

#[test]
fn cmd_status() {
    let pkt = [EventCode::CommandStatus as u8, 4, 0xff, 3, 0x01, 0x10];
    let (e, _) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(
        e,
        EventHeader {
            status: Status::UnspecifiedError,
            cmd_quota: Some(3),
            opcode: Opcode::READ_LOCAL_VERSION_INFORMATION,
            ..EventHeader::new(EventType::Hci(EventCode::CommandStatus))
        }
    );
    assert!(e.typ.is_cmd());
}

#[test]
fn error() {
    let event = |b: &[u8]| EventHeader::unpack(b).unwrap_err();
    assert_matches!(event(&[]), Error::InvalidEvent(_));
    assert_matches!(
        event(&[EventCode::InquiryComplete as u8, 1]),
        Error::InvalidEvent(_)
    );
    assert_matches!(
        event(&[EventCode::DisconnectionComplete as u8, 2, 0, 1]),
        Error::InvalidEvent(_)
    );
}

#[test]
fn unknown() {
    let pkt = [0x3D, 2, 1, 2];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    let typ = EventType::Unknown {
        code: 0x3D,
        subcode: None,
    };
    assert_eq!(e, EventHeader::new(typ));
    assert_eq!((p, typ.params_off()), (&pkt[2..], 2));

    let pkt = [EventCode::LeMetaEvent as u8, 2, 0xff, 7];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    let typ = EventType::Unknown {
        code: 0x3E,
        subcode: Some(0xff),
    };
    assert_eq!(e, EventHeader::new(typ));
    assert_eq!((p, typ.params_off()), (&pkt[3..], 3));
    assert_eq!(typ.to_string(), "Unknown(0x3E/0xFF)");
}

#[test]
fn connection_complete() {
    let mut pkt = vec![EventCode::ConnectionComplete as u8, 11, 0x00, 0x40, 0x00];
    pkt.extend_from_slice(&ADDR.to_le_bytes());
    pkt.extend_from_slice(&[LinkType::Acl as u8, 0]);
    let (e, p) = EventHeader::unpack(&pkt).unwrap();
    let h = ConnHandle::new(0x40);
    assert_eq!((e.opcode, e.addr, e.handle), (Opcode::NONE, Some(ADDR), h));
    assert_eq!(
        e.decode::<ConnectionComplete>(p),
        Some(ConnectionComplete {
            status: Status::Success,
            handle: h.unwrap(),
            addr: ADDR,
            link_type: LinkType::Acl,
        })
    );
    assert_eq!(e.decode::<DisconnectionComplete>(p), None);
    assert_eq!(format!("{ADDR}"), "66:55:44:33:22:11");
}

#[test]
fn le_connection_complete() {
    let mut pkt = vec![
        EventCode::LeMetaEvent as u8,
        19,
        SubeventCode::ConnectionComplete as u8,
        0x00,
        0x01,
        0x00,
        0x00, // Role
        0x00, // Peer_Address_Type
    ];
    pkt.extend_from_slice(&ADDR.to_le_bytes());
    pkt.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0xF4, 0x01, 0x00]);
    let (e, p) = EventHeader::unpack(&pkt).unwrap();
    assert_eq!(e.addr, Some(ADDR));
    assert_eq!(
        e.decode::<LeConnectionComplete>(p).map(|c| c.peer_addr),
        Some(ADDR)
    );
    assert_eq!(e.typ.params_off(), 3);
}

#[test]
fn num_completed() {
    let pkt = [
        EventCode::NumberOfCompletedPackets as u8,
        9,
        2,
        0x01,
        0x00,
        0x03,
        0x00,
        0x02,
        0x00,
        0x01,
        0x00,
    ];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    let n = e.decode::<NumberOfCompletedPackets>(p).unwrap();
    assert_eq!(
        n.as_ref(),
        &[
            (ConnHandle::new(1).unwrap(), 3),
            (ConnHandle::new(2).unwrap(), 1)
        ]
    );
    assert_eq!(e.decode::<NumberOfCompletedPackets>(&p[..4]), None);
}

#[test]
fn buffer_size() {
    let pkt = [
        EventCode::CommandComplete as u8,
        11,
        1,
        0x05,
        0x10,
        0x00,
        0xFD,
        0x03,
        0x40,
        0x08,
        0x00,
        0x0C,
        0x00,
    ];
    let (e, p) = EventHeader::unpack(pkt.as_ref()).unwrap();
    assert_eq!(
        e.decode::<BufferSize>(p),
        Some(BufferSize {
            acl_data_len: 1021,
            acl_num_pkts: 8,
            sco_data_len: 64,
            sco_num_pkts: 12,
        })
    );
    assert_eq!(e.decode::<LeBufferSize>(p), None);
}

#[test]
fn command_encode() {
    assert_eq!(Command::Reset.encode().unwrap().as_ref(), &[0x03, 0x0C, 0]);
    let cmd = Command::Disconnect {
        handle: ConnHandle::new(0x0102).unwrap(),
        reason: Status::RemoteUserTerminatedConnection,
    };
    assert_eq!(
        cmd.encode().unwrap().as_ref(),
        &[0x06, 0x04, 3, 0x02, 0x01, 0x13]
    );
    assert_eq!(cmd.target(), (None, ConnHandle::new(0x0102)));
    assert_eq!(
        cmd.expect().complete,
        EventType::Hci(EventCode::DisconnectionComplete)
    );
    assert_eq!(cmd.expect().by, MatchBy::Handle);

    let cmd = Command::CreateConnection {
        addr: ADDR,
        packet_type: 0xCC18,
        page_scan_repetition_mode: 1,
        clock_offset: 0,
        allow_role_switch: true,
    };
    let b = cmd.encode().unwrap();
    assert_eq!(b.as_ref().len(), CMD_HDR + 13);
    assert_eq!(&b.as_ref()[3..9], &ADDR.to_le_bytes());
    assert_eq!(cmd.target(), (Some(ADDR), None));
    assert!(Command::ReadBufferSize.expect().is_command_complete());

    let cmd = Command::LeCreateConnection {
        peer_addr: ADDR,
        peer_random: true,
        params: LeConnParams::default(),
    };
    let b = cmd.encode().unwrap();
    let b = b.as_ref();
    assert_eq!(&b[..3], &[0x0D, 0x20, 25]);
    assert_eq!(b.len(), CMD_HDR + 25);
    assert_eq!(&b[3..5], &[0x60, 0x00]);
    assert_eq!(&b[7..9], &[0x00, 0x01]);
    assert_eq!(&b[9..15], &ADDR.to_le_bytes());
    assert_eq!(&b[24..], &[0, 0, 0, 0]);
    let x = cmd.expect();
    assert!(x.completes(EventType::Le(SubeventCode::ConnectionComplete)));
    assert!(x.completes(EventType::Le(SubeventCode::EnhancedConnectionComplete)));
    assert!(!x.completes(EventType::Hci(EventCode::ConnectionComplete)));
}

#[test]
fn vendor() {
    let cmd = Command::Vendor {
        ocf: 0x01,
        params: vec![0; 256],
        expect: Expect::default(),
    };
    assert_eq!(cmd.opcode(), Opcode::vendor(0x01));
    assert!(cmd.opcode().is_vendor());
    assert_matches!(cmd.encode(), Err(Error::CommandTooLong { len: 256, .. }));
    assert_eq!(format!("{}", Opcode::vendor(0x01)), "Opcode(0xFC01)");
    assert_eq!(format!("{}", Opcode::RESET), "Reset(0x0C03)");
}

#[test]
fn data() {
    let h = ConnHandle::new(0x0042).unwrap();
    let b = acl_packet(h, Boundary::FirstFlushable, &[1, 2, 3]).unwrap();
    assert_eq!(b.as_ref(), &[0x42, 0x20, 3, 0, 1, 2, 3]);
    let (hdr, payload) = DataHeader::unpack_acl(b.as_ref()).unwrap();
    assert_eq!(hdr.handle, h);
    assert_eq!(hdr.boundary, Boundary::FirstFlushable);
    assert_eq!(payload, &[1, 2, 3]);
    assert_matches!(
        DataHeader::unpack_acl(&[0x42, 0x20, 4, 0, 1]),
        Err(Error::InvalidPacket(_))
    );

    let b = sco_packet(h, &[9; 4]).unwrap();
    assert_eq!(b.as_ref(), &[0x42, 0x00, 4, 9, 9, 9, 9]);
    assert_eq!(DataHeader::unpack_sco(b.as_ref()).unwrap().1, &[9; 4]);
    assert_matches!(
        sco_packet(h, &[0; 256]),
        Err(Error::PayloadTooLong { len: 256 })
    );
}
