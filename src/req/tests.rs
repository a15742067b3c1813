use std::time::Duration;

use matches::assert_matches;
use tokio::time::Instant;

use crate::dev::RawAddr;
use crate::hci::{Command, Opcode};
use crate::req::*;
use crate::Error;

const ADDR: RawAddr = RawAddr::from_le_bytes([1, 2, 3, 4, 5, 6]);

fn req(cmd: Command) -> Request {
    Request::new(Submission::new(cmd), Duration::from_secs(1), Instant::now()).unwrap()
}

fn name_req() -> Request {
    req(Command::RemoteNameRequest {
        addr: ADDR,
        page_scan_repetition_mode: 1,
        clock_offset: 0,
    })
}

#[test]
fn create_dispose() {
    let mut p = Pool::new(2);
    let a = p.create(req(Command::Reset)).unwrap();
    let b = p.create(req(Command::ReadBdAddr)).unwrap();
    assert_matches!(p.create(req(Command::Reset)), Err(Error::OutOfRequests));
    assert_eq!(p.len(), 2);
    assert_eq!(p.get(a).unwrap().opcode(), Opcode::RESET);
    assert_eq!(p.get(a).unwrap().state(), State::Idle);

    p.dispose(a).unwrap();
    assert_matches!(p.dispose(a), Err(Error::NotFound));
    assert_matches!(p.get(a), Err(Error::NotFound));

    // Freed slot is reused with a new sequence number
    let c = p.create(req(Command::Reset)).unwrap();
    assert_eq!(c.slot(), a.slot());
    assert_ne!(c, a);
    assert_matches!(p.dispose(a), Err(Error::NotFound));
    assert_eq!(p.allocated(), [b, c]);
}

#[test]
fn dispose_busy() {
    let mut p = Pool::new(1);
    let a = p.create(req(Command::Reset)).unwrap();
    p.set_state(a, State::Busy).unwrap();
    assert_matches!(p.dispose(a), Err(Error::InvalidState));
    assert_eq!(p.set_state(a, State::Idle).unwrap(), State::Busy);
    p.dispose(a).unwrap();
    assert!(p.is_empty());
}

#[test]
fn queues() {
    let mut p = Pool::new(8);
    let ids: Vec<_> = (0..4).map(|_| p.create(name_req()).unwrap()).collect();
    for &id in &ids {
        p.set_state(id, State::Waiting).unwrap();
    }
    assert_eq!(p.queued(Queue::Wait), ids);
    p.set_state(ids[1], State::Busy).unwrap();
    p.set_state(ids[2], State::Busy).unwrap();
    assert_eq!(p.queued(Queue::Wait), [ids[0], ids[3]]);
    assert_eq!(p.queued(Queue::Busy), [ids[1], ids[2]]);
    assert_eq!(p.queue_len(Queue::Busy), 2);

    let k = Key {
        opcode: Opcode::REMOTE_NAME_REQUEST,
        addr: Some(ADDR),
        handle: None,
    };
    assert_eq!(p.find_queued(Queue::Busy, &k, true), Some(ids[1]));
    let other = Key {
        addr: Some(RawAddr::default()),
        ..k
    };
    assert_eq!(p.find_queued(Queue::Busy, &other, true), None);
    assert_eq!(p.find_queued(Queue::Busy, &other, false), Some(ids[1]));

    p.set_state(ids[1], State::Idle).unwrap();
    assert_eq!(p.find_queued(Queue::Busy, &k, true), Some(ids[2]));
    assert_eq!(p.queued(Queue::Wait), [ids[0], ids[3]]);
}

#[test]
fn completion_result() {
    let id = {
        let mut p = Pool::new(1);
        p.create(req(Command::Reset)).unwrap()
    };
    let c = Completion {
        id,
        opcode: Opcode::RESET,
        outcome: Outcome::Complete(crate::hci::Status::CommandDisallowed),
        params: Vec::new(),
    };
    assert_matches!(
        c.result(),
        Err(Error::HardwareRejected {
            status: crate::hci::Status::CommandDisallowed,
            ..
        })
    );
    let c = Completion {
        outcome: Outcome::TimedOut,
        ..c
    };
    assert_matches!(c.into_result(), Err(Error::TimedOut));
}
